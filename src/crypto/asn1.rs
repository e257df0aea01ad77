//! # Minimal ASN.1 DER Codec
//!
//! Just enough DER to move RSA keys between PKCS8/SPKI and JWK.
//!
//! ## Element Layout
//!
//! ```text
//! ┌──────────┬──────────────────────────────┬─────────────────────────┐
//! │ tag (1B) │ length                       │ content (length bytes)  │
//! └──────────┴──────────────────────────────┴─────────────────────────┘
//!
//!   length < 0x80 : single byte (short form)
//!   length ≥ 0x80 : 0x80 | n, then n big-endian length bytes (long form)
//! ```
//!
//! ## Tag Handling
//!
//! | Tag | Kind | Parsed as |
//! |-----|------|-----------|
//! | 0x30 SEQUENCE, 0x31 SET, 0xA0, 0xA1 | container | children |
//! | 0x01, 0x02, 0x05, 0x06, 0x0C, 0x13 | fixed value | leaf |
//! | 0x03 BIT STRING, 0x04 OCTET STRING | ambiguous | children if the payload is DER, leaf otherwise |
//! | anything else | unknown | leaf |
//!
//! INTEGER leaves hold the unsigned magnitude: the leading zero that DER adds
//! to keep a positive number positive is stripped on parse and re-added on
//! pack. Negative integers never occur in RSA keys and are not supported.

use thiserror::Error;

/// Hard ceiling on nesting depth
///
/// PKCS8 RSA keys nest 4 levels deep; anything beyond this is hostile input.
pub const MAX_ASN1_DEPTH: usize = 16;

/// Tag bytes used by the codec
pub mod tag {
    /// BOOLEAN
    pub const BOOLEAN: u8 = 0x01;
    /// INTEGER
    pub const INTEGER: u8 = 0x02;
    /// BIT STRING
    pub const BIT_STRING: u8 = 0x03;
    /// OCTET STRING
    pub const OCTET_STRING: u8 = 0x04;
    /// NULL
    pub const NULL: u8 = 0x05;
    /// OBJECT IDENTIFIER
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    /// UTF8String
    pub const UTF8_STRING: u8 = 0x0C;
    /// PrintableString
    pub const PRINTABLE_STRING: u8 = 0x13;
    /// SEQUENCE (constructed)
    pub const SEQUENCE: u8 = 0x30;
    /// SET (constructed)
    pub const SET: u8 = 0x31;
    /// Context-specific [0] (constructed)
    pub const CONTEXT_0: u8 = 0xA0;
    /// Context-specific [1] (constructed)
    pub const CONTEXT_1: u8 = 0xA1;
}

/// DER parse failure
///
/// Always fatal for the key being parsed: nothing is ever truncated or
/// guessed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Asn1Error {
    /// Input ended inside a tag or length header
    #[error("premature end of input at offset {0}")]
    PrematureEof(usize),

    /// An element declares more content than its parent holds
    #[error("element length {length} exceeds the {available} bytes available")]
    LengthExceedsParent {
        /// Declared content length
        length: usize,
        /// Bytes left in the parent
        available: usize,
    },

    /// Indefinite or oversized long-form length
    #[error("unsupported length encoding 0x{0:02x}")]
    UnsupportedLength(u8),

    /// Nesting deeper than the allowed depth
    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),

    /// Bytes left after the top-level element
    #[error("{0} trailing bytes after the top-level element")]
    TrailingData(usize),
}

/// A parsed DER element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asn1 {
    /// Element whose content is a list of elements
    Constructed {
        /// Tag byte
        tag: u8,
        /// Child elements
        children: Vec<Asn1>,
    },
    /// Element whose content is an opaque value
    Primitive {
        /// Tag byte
        tag: u8,
        /// Content bytes (unsigned magnitude for INTEGER)
        value: Vec<u8>,
    },
}

impl Asn1 {
    /// SEQUENCE of the given children
    pub fn sequence(children: Vec<Asn1>) -> Self {
        Asn1::Constructed {
            tag: tag::SEQUENCE,
            children,
        }
    }

    /// BIT STRING wrapping DER-encoded children
    pub fn bit_string(children: Vec<Asn1>) -> Self {
        Asn1::Constructed {
            tag: tag::BIT_STRING,
            children,
        }
    }

    /// OCTET STRING wrapping DER-encoded children
    pub fn octet_string(children: Vec<Asn1>) -> Self {
        Asn1::Constructed {
            tag: tag::OCTET_STRING,
            children,
        }
    }

    /// INTEGER from an unsigned big-endian magnitude
    pub fn integer(magnitude: &[u8]) -> Self {
        Asn1::Primitive {
            tag: tag::INTEGER,
            value: magnitude.to_vec(),
        }
    }

    /// OBJECT IDENTIFIER from its encoded content bytes
    pub fn oid(encoded: &[u8]) -> Self {
        Asn1::Primitive {
            tag: tag::OBJECT_IDENTIFIER,
            value: encoded.to_vec(),
        }
    }

    /// NULL
    pub fn null() -> Self {
        Asn1::Primitive {
            tag: tag::NULL,
            value: Vec::new(),
        }
    }

    /// Tag byte of this element
    pub fn tag(&self) -> u8 {
        match self {
            Asn1::Constructed { tag, .. } | Asn1::Primitive { tag, .. } => *tag,
        }
    }

    /// Children, if this element is constructed
    pub fn children(&self) -> Option<&[Asn1]> {
        match self {
            Asn1::Constructed { children, .. } => Some(children),
            Asn1::Primitive { .. } => None,
        }
    }

    /// Value, if this element is primitive
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Asn1::Primitive { value, .. } => Some(value),
            Asn1::Constructed { .. } => None,
        }
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse exactly one DER element spanning the whole input
pub fn parse_asn1(bytes: &[u8]) -> Result<Asn1, Asn1Error> {
    let (element, used) = parse_element(bytes, 0, MAX_ASN1_DEPTH)?;
    if used != bytes.len() {
        return Err(Asn1Error::TrailingData(bytes.len() - used));
    }
    Ok(element)
}

/// Read a tag and length header
///
/// Returns (tag, content length, header length).
fn read_header(bytes: &[u8], offset: usize) -> Result<(u8, usize, usize), Asn1Error> {
    if bytes.len() < 2 {
        return Err(Asn1Error::PrematureEof(offset + bytes.len()));
    }
    let element_tag = bytes[0];
    let first = bytes[1];
    if first < 0x80 {
        return Ok((element_tag, first as usize, 2));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > std::mem::size_of::<usize>() {
        return Err(Asn1Error::UnsupportedLength(first));
    }
    if bytes.len() < 2 + count {
        return Err(Asn1Error::PrematureEof(offset + bytes.len()));
    }
    let length = bytes[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((element_tag, length, 2 + count))
}

fn parse_element(
    bytes: &[u8],
    offset: usize,
    depth_left: usize,
) -> Result<(Asn1, usize), Asn1Error> {
    if depth_left == 0 {
        return Err(Asn1Error::DepthExceeded(MAX_ASN1_DEPTH));
    }

    let (element_tag, length, header) = read_header(bytes, offset)?;
    let available = bytes.len() - header;
    if length > available {
        return Err(Asn1Error::LengthExceedsParent { length, available });
    }
    let content = &bytes[header..header + length];
    let content_offset = offset + header;

    let element = match element_tag {
        tag::SEQUENCE | tag::SET | tag::CONTEXT_0 | tag::CONTEXT_1 => Asn1::Constructed {
            tag: element_tag,
            children: parse_children(content, content_offset, depth_left - 1)?,
        },
        tag::BIT_STRING => match content.split_first() {
            Some((0, payload)) => {
                match try_parse_nested(payload, content_offset + 1, depth_left - 1)? {
                    Some(children) => Asn1::Constructed {
                        tag: element_tag,
                        children,
                    },
                    None => primitive(element_tag, content),
                }
            }
            _ => primitive(element_tag, content),
        },
        tag::OCTET_STRING => match try_parse_nested(content, content_offset, depth_left - 1)? {
            Some(children) => Asn1::Constructed {
                tag: element_tag,
                children,
            },
            None => primitive(element_tag, content),
        },
        tag::INTEGER => primitive(element_tag, strip_sign_byte(content)),
        _ => primitive(element_tag, content),
    };

    Ok((element, header + length))
}

fn parse_children(
    mut bytes: &[u8],
    mut offset: usize,
    depth_left: usize,
) -> Result<Vec<Asn1>, Asn1Error> {
    let mut children = Vec::new();
    while !bytes.is_empty() {
        let (child, used) = parse_element(bytes, offset, depth_left)?;
        children.push(child);
        bytes = &bytes[used..];
        offset += used;
    }
    Ok(children)
}

/// Eagerly parse the payload of a BIT/OCTET STRING
///
/// `Ok(None)` means the payload is not DER and the string is a leaf. Depth
/// violations stay fatal even here.
fn try_parse_nested(
    payload: &[u8],
    offset: usize,
    depth_left: usize,
) -> Result<Option<Vec<Asn1>>, Asn1Error> {
    if payload.is_empty() {
        return Ok(None);
    }
    match parse_children(payload, offset, depth_left) {
        Ok(children) => Ok(Some(children)),
        Err(e @ Asn1Error::DepthExceeded(_)) => Err(e),
        Err(_) => Ok(None),
    }
}

fn primitive(element_tag: u8, value: &[u8]) -> Asn1 {
    Asn1::Primitive {
        tag: element_tag,
        value: value.to_vec(),
    }
}

fn strip_sign_byte(content: &[u8]) -> &[u8] {
    match content {
        [0, next, ..] if next & 0x80 != 0 => &content[1..],
        _ => content,
    }
}

// ============================================================================
// PACKING
// ============================================================================

/// Encode an element tree back to DER
pub fn pack(element: &Asn1) -> Vec<u8> {
    let (element_tag, content) = match element {
        Asn1::Constructed { tag, children } => {
            let mut content = Vec::new();
            if *tag == tag::BIT_STRING {
                // Unused-bits count
                content.push(0);
            }
            for child in children {
                content.extend_from_slice(&pack(child));
            }
            (*tag, content)
        }
        Asn1::Primitive { tag, value } if *tag == tag::INTEGER => (*tag, integer_content(value)),
        Asn1::Primitive { tag, value } => (*tag, value.clone()),
    };

    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(element_tag);
    out.extend_from_slice(&encode_length(content.len()));
    out.extend_from_slice(&content);
    out
}

fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let bytes = length.to_be_bytes();
    let significant = &bytes[bytes.iter().take_while(|b| **b == 0).count()..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

fn integer_content(magnitude: &[u8]) -> Vec<u8> {
    let minimal = strip_leading_zeros(magnitude);
    match minimal.first() {
        None => vec![0],
        Some(first) if first & 0x80 != 0 => {
            let mut content = Vec::with_capacity(minimal.len() + 1);
            content.push(0);
            content.extend_from_slice(minimal);
            content
        }
        Some(_) => minimal.to_vec(),
    }
}

/// Minimal unsigned representation (no leading zero bytes)
pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();
    &bytes[zeros..]
}

// ============================================================================
// TESTS
// ============================================================================
