//! # Error Handling
//!
//! Error types for the whole crate.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Configuration Errors                                              │
//! │  │   └── InvalidConfig          - Rejected configuration value         │
//! │  │                                                                      │
//! │  ├── Key Material Errors                                               │
//! │  │   ├── MalformedKeyMaterial   - ASN.1 / JWK parse failure (fatal)    │
//! │  │   ├── MissingKeyMaterial     - Caller supplied no usable key pair   │
//! │  │   ├── NoUsableKey            - No available or recoverable key      │
//! │  │   └── KeyGenerationFailed    - RSA key generation failed            │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed       - RSA / AES encryption failed          │
//! │  │   ├── DecryptionFailed       - RSA / AES decryption failed          │
//! │  │   └── SigningFailed          - Signature could not be produced      │
//! │  │                                                                      │
//! │  ├── Exchange Data Errors                                              │
//! │  │   ├── TamperedExchangeData   - Signature mismatch                   │
//! │  │   ├── UnverifiableExchangeData - No key to open the signature key   │
//! │  │   └── ExchangeDataNotFound   - Unknown exchange data id             │
//! │  │                                                                      │
//! │  ├── Recovery Errors                                                   │
//! │  │   ├── InvalidShamirParameters - Bad (shares, threshold) pair        │
//! │  │   ├── InvalidShare           - Share could not be decoded           │
//! │  │   └── InsufficientShares     - Fewer shares than the threshold      │
//! │  │                                                                      │
//! │  ├── Collaborator Errors                                               │
//! │  │   ├── Conflict               - Optimistic lock (`rev`) mismatch     │
//! │  │   ├── NotFound               - Entity missing on the backend        │
//! │  │   ├── ApiError               - REST collaborator failure            │
//! │  │   ├── StorageReadError       - Storage facade read failure          │
//! │  │   └── StorageWriteError      - Storage facade write failure         │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── SerializationError                                            │
//! │      ├── DeserializationError                                          │
//! │      └── Internal                                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two expected outcomes are *not* errors on the normal path:
//! insufficient Shamir shares surface as
//! [`ShamirError::InsufficientShares`](crate::crypto::ShamirError) (and keep
//! their counts as [`Error::InsufficientShares`] when converted) and missing
//! recovery data surfaces as
//! [`RecoveryResult::Failure`](crate::recovery::RecoveryResult), so callers can
//! retry with more shares or prompt for another recovery key.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// The error is `Clone` so that the result of a single in-flight load can be
/// handed to every caller waiting on it (see [`crate::cache::AsyncCache`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (100-199)
    // ========================================================================

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Key Material Errors (200-299)
    // ========================================================================

    /// DER / JWK key material could not be parsed
    #[error("Malformed key material: {0}")]
    MalformedKeyMaterial(String),

    /// The caller did not provide any usable key pair
    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),

    /// No available or recoverable key for a data owner
    #[error("No usable key for data owner {0}")]
    NoUsableKey(String),

    /// Invalid key (wrong algorithm, mismatching parts)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signing failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // ========================================================================
    // Exchange Data Errors (400-499)
    // ========================================================================

    /// Exchange data signatures do not match its content
    #[error("Exchange data {0} has been tampered with")]
    TamperedExchangeData(String),

    /// None of the available keys can open the exchange data signature key
    #[error("Exchange data {0} cannot be verified with the available keys")]
    UnverifiableExchangeData(String),

    /// Exchange data does not exist
    #[error("Exchange data not found: {0}")]
    ExchangeDataNotFound(String),

    // ========================================================================
    // Recovery Errors (500-599)
    // ========================================================================

    /// Invalid Shamir parameters
    #[error("Invalid Shamir parameters: {0}")]
    InvalidShamirParameters(String),

    /// A Shamir share could not be decoded
    #[error("Invalid Shamir share: {0}")]
    InvalidShare(String),

    /// Fewer distinct Shamir shares than their threshold
    #[error("Insufficient Shamir shares: need {needed}, got {got}")]
    InsufficientShares {
        /// Threshold embedded in the shares
        needed: usize,
        /// Distinct shares supplied
        got: usize,
    },

    // ========================================================================
    // Collaborator Errors (600-699)
    // ========================================================================

    /// Optimistic locking failure on a `rev`
    #[error("Revision conflict on {0}")]
    Conflict(String),

    /// Entity missing on the backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// REST collaborator failure
    #[error("API error: {0}")]
    ApiError(String),

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Numeric error code
    ///
    /// - 100-199: Configuration
    /// - 200-299: Key material
    /// - 300-399: Crypto
    /// - 400-499: Exchange data
    /// - 500-599: Recovery
    /// - 600-699: Collaborators
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 100,

            Error::MalformedKeyMaterial(_) => 200,
            Error::MissingKeyMaterial(_) => 201,
            Error::NoUsableKey(_) => 202,
            Error::InvalidKey(_) => 203,
            Error::KeyGenerationFailed(_) => 204,

            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed(_) => 301,
            Error::SigningFailed(_) => 302,

            Error::TamperedExchangeData(_) => 400,
            Error::UnverifiableExchangeData(_) => 401,
            Error::ExchangeDataNotFound(_) => 402,

            Error::InvalidShamirParameters(_) => 500,
            Error::InvalidShare(_) => 501,
            Error::InsufficientShares { .. } => 502,

            Error::Conflict(_) => 600,
            Error::NotFound(_) => 601,
            Error::ApiError(_) => 602,
            Error::StorageReadError(_) => 603,
            Error::StorageWriteError(_) => 604,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying the whole operation
    /// (the core itself never retries).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::ApiError(_))
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Error::NoUsableKey(_))
    }

    /// Check if this error marks an entity that must not be trusted
    pub fn is_untrusted_data(&self) -> bool {
        matches!(
            self,
            Error::TamperedExchangeData(_) | Error::UnverifiableExchangeData(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        // Only errors raised while reading input carry a position
        if err.is_syntax() || err.is_eof() || err.line() > 0 {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<crate::crypto::Asn1Error> for Error {
    fn from(err: crate::crypto::Asn1Error) -> Self {
        Error::MalformedKeyMaterial(err.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::InvalidKey(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("test".into()).code(), 100);
        assert_eq!(Error::MalformedKeyMaterial("test".into()).code(), 200);
        assert_eq!(Error::EncryptionFailed("test".into()).code(), 300);
        assert_eq!(Error::TamperedExchangeData("ed".into()).code(), 400);
        assert_eq!(Error::InvalidShare("test".into()).code(), 501);
        assert_eq!(Error::Conflict("test".into()).code(), 600);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Conflict("ed-1".into()).is_recoverable());
        assert!(Error::ApiError("timeout".into()).is_recoverable());
        assert!(!Error::MalformedKeyMaterial("eof".into()).is_recoverable());
        assert!(!Error::TamperedExchangeData("ed-1".into()).is_recoverable());
    }

    #[test]
    fn test_untrusted_data() {
        assert!(Error::TamperedExchangeData("ed-1".into()).is_untrusted_data());
        assert!(Error::UnverifiableExchangeData("ed-1".into()).is_untrusted_data());
        assert!(!Error::NoUsableKey("hcp-1".into()).is_untrusted_data());
        assert!(Error::NoUsableKey("hcp-1".into()).requires_user_action());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(matches!(err, Error::DeserializationError(_)));
        assert_eq!(err.code(), 902);

        let err: Error = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, Error::DeserializationError(_)));

        // Map keys must serialize as strings
        let unwritable: std::collections::BTreeMap<Vec<u8>, u8> = [(vec![1u8], 1)].into_iter().collect();
        let err: Error = serde_json::to_string(&unwritable).unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
        assert_eq!(err.code(), 901);
    }

    #[test]
    fn test_asn1_error_is_malformed_key_material() {
        let err: Error = crate::crypto::Asn1Error::PrematureEof(3).into();
        assert!(matches!(err, Error::MalformedKeyMaterial(_)));
        assert!(!err.is_recoverable());
    }
}
