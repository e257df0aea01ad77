//! # Shamir Secret Sharing
//!
//! Splits a hex secret into shares so that any `threshold` of them rebuild
//! it while fewer reveal nothing.
//!
//! ## Scheme
//!
//! Every byte of the secret is the constant term of its own random
//! polynomial of degree `threshold - 1` over GF(2^8) (AES polynomial
//! x^8 + x^4 + x^3 + x + 1). Share `i` holds the polynomials evaluated at
//! x = i; combining interpolates them back at x = 0.
//!
//! ## Share Layout
//!
//! ```text
//! ┌───────┬─────────────┬──────────────────────────────────────────┐
//! │ x (1) │ threshold(1)│ f_0(x) f_1(x) ... f_{len-1}(x)           │
//! └───────┴─────────────┴──────────────────────────────────────────┘
//!                       hex encoded as a whole
//! ```
//!
//! Embedding the threshold lets [`combine`] tell "not enough shares" apart
//! from a result, instead of returning something wrong. Shares written
//! without the threshold byte are not accepted: a zero threshold or a share
//! shorter than the header is rejected as [`ShamirError::InvalidShare`].

use std::collections::BTreeMap;

use rand::RngCore;
use thiserror::Error;

use crate::error::Error;

/// Largest number of shares (x must be a non-zero byte)
pub const MAX_SHARES: usize = 255;

/// Shamir failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShamirError {
    /// Fewer distinct shares than the threshold they were made with
    #[error("need {needed} shares, got {got}")]
    InsufficientShares {
        /// Threshold embedded in the shares
        needed: usize,
        /// Distinct shares supplied
        got: usize,
    },

    /// `(num_shares, threshold)` out of range, or the secret is not hex
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A share is not hex, too short, or disagrees with the others
    #[error("invalid share: {0}")]
    InvalidShare(String),
}

impl From<ShamirError> for Error {
    fn from(err: ShamirError) -> Self {
        match err {
            ShamirError::InsufficientShares { needed, got } => {
                Error::InsufficientShares { needed, got }
            }
            ShamirError::InvalidParameters(reason) => Error::InvalidShamirParameters(reason),
            ShamirError::InvalidShare(reason) => Error::InvalidShare(reason),
        }
    }
}

// ============================================================================
// GF(2^8)
// ============================================================================

struct Tables {
    exp: [u8; 512],
    log: [u8; 256],
}

const fn build_tables() -> Tables {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        // Multiply by the generator 0x03
        x ^= x << 1;
        if x & 0x100 != 0 {
            x ^= 0x11B;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    Tables { exp, log }
}

static GF: Tables = build_tables();

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF.exp[GF.log[a as usize] as usize + GF.log[b as usize] as usize]
}

fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0);
    if a == 0 {
        return 0;
    }
    GF.exp[GF.log[a as usize] as usize + 255 - GF.log[b as usize] as usize]
}

fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, c| gf_mul(acc, x) ^ c)
}

// ============================================================================
// SPLIT / COMBINE
// ============================================================================

/// Split a hex secret into `num_shares` hex shares
///
/// Any `threshold` of the returned shares rebuild the secret.
pub fn share(
    secret_hex: &str,
    num_shares: usize,
    threshold: usize,
) -> Result<Vec<String>, ShamirError> {
    if threshold == 0 || threshold > num_shares || num_shares > MAX_SHARES {
        return Err(ShamirError::InvalidParameters(format!(
            "need 1 <= threshold ({}) <= shares ({}) <= {}",
            threshold, num_shares, MAX_SHARES
        )));
    }
    let secret = hex::decode(secret_hex)
        .map_err(|e| ShamirError::InvalidParameters(format!("secret is not hex: {}", e)))?;

    let mut shares: Vec<Vec<u8>> = (1..=num_shares)
        .map(|x| {
            let mut bytes = Vec::with_capacity(secret.len() + 2);
            bytes.push(x as u8);
            bytes.push(threshold as u8);
            bytes
        })
        .collect();

    let mut coefficients = vec![0u8; threshold];
    for byte in &secret {
        coefficients[0] = *byte;
        rand::rngs::OsRng.fill_bytes(&mut coefficients[1..]);
        for share in shares.iter_mut() {
            let x = share[0];
            share.push(evaluate(&coefficients, x));
        }
    }
    coefficients.iter_mut().for_each(|c| *c = 0);

    Ok(shares.into_iter().map(hex::encode).collect())
}

/// Rebuild a hex secret from shares
///
/// Order does not matter and duplicates count once.
pub fn combine<S: AsRef<str>>(shares: &[S]) -> Result<String, ShamirError> {
    let mut points: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    let mut threshold = None;
    let mut length = None;

    for share in shares {
        let bytes = hex::decode(share.as_ref())
            .map_err(|e| ShamirError::InvalidShare(format!("not hex: {}", e)))?;
        let (x, share_threshold, ys) = match bytes.as_slice() {
            [x, t, ys @ ..] if *x != 0 && *t != 0 => (*x, *t as usize, ys.to_vec()),
            _ => return Err(ShamirError::InvalidShare("missing header".into())),
        };

        if *threshold.get_or_insert(share_threshold) != share_threshold {
            return Err(ShamirError::InvalidShare("thresholds disagree".into()));
        }
        if *length.get_or_insert(ys.len()) != ys.len() {
            return Err(ShamirError::InvalidShare("lengths disagree".into()));
        }
        match points.get(&x) {
            Some(existing) if *existing != ys => {
                return Err(ShamirError::InvalidShare(format!(
                    "two different shares for x = {}",
                    x
                )))
            }
            Some(_) => {}
            None => {
                points.insert(x, ys);
            }
        }
    }

    let needed = threshold.unwrap_or(1);
    if points.len() < needed || points.is_empty() {
        return Err(ShamirError::InsufficientShares {
            needed,
            got: points.len(),
        });
    }

    let used: Vec<(u8, &Vec<u8>)> = points.iter().take(needed).map(|(x, ys)| (*x, ys)).collect();
    let weights: Vec<u8> = used
        .iter()
        .map(|(xi, _)| {
            used.iter()
                .filter(|(xj, _)| xj != xi)
                .fold(1u8, |acc, (xj, _)| gf_mul(acc, gf_div(*xj, xj ^ xi)))
        })
        .collect();

    let secret: Vec<u8> = (0..length.unwrap_or(0))
        .map(|i| {
            used.iter()
                .zip(&weights)
                .fold(0u8, |acc, ((_, ys), w)| acc ^ gf_mul(ys[i], *w))
        })
        .collect();

    Ok(hex::encode(secret))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &str = "308204bd020100300d06092a864886f70d0101010500";

    #[test]
    fn test_field_inverse() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_div(1, a)), 1, "inverse of {}", a);
        }
        // Known AES product
        assert_eq!(gf_mul(0x57, 0x83), 0xC1);
    }

    #[test]
    fn test_any_threshold_subset_recovers() {
        let shares = share(SECRET, 5, 3).unwrap();

        assert_eq!(combine(&shares[0..3]).unwrap(), SECRET);
        assert_eq!(combine(&shares[2..5]).unwrap(), SECRET);
        assert_eq!(
            combine(&[&shares[4], &shares[0], &shares[2]]).unwrap(),
            SECRET
        );
        assert_eq!(combine(&shares).unwrap(), SECRET);
    }

    #[test]
    fn test_below_threshold_is_insufficient() {
        let shares = share(SECRET, 5, 3).unwrap();

        assert_eq!(
            combine(&shares[0..2]),
            Err(ShamirError::InsufficientShares { needed: 3, got: 2 })
        );
        // Duplicates do not count twice
        assert_eq!(
            combine(&[&shares[0], &shares[1], &shares[1]]),
            Err(ShamirError::InsufficientShares { needed: 3, got: 2 })
        );
        assert!(matches!(
            combine::<String>(&[]),
            Err(ShamirError::InsufficientShares { got: 0, .. })
        ));
    }

    #[test]
    fn test_empty_secret_is_not_a_sentinel() {
        let shares = share("", 3, 2).unwrap();
        assert_eq!(combine(&shares[..2]).unwrap(), "");
    }

    #[test]
    fn test_share_without_threshold_is_rejected() {
        let shares = share(SECRET, 3, 2).unwrap();
        // x = 1 followed directly by the y bytes
        let headerless = format!("01{}", &shares[0][4..]);
        let zero_threshold = format!("0100{}", &shares[0][4..]);

        for bad in [headerless.as_str(), zero_threshold.as_str(), "01"] {
            assert!(
                matches!(combine(&[bad, shares[1].as_str()]), Err(ShamirError::InvalidShare(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_error_conversion_keeps_share_counts() {
        let err: Error = ShamirError::InsufficientShares { needed: 3, got: 1 }.into();
        assert!(matches!(err, Error::InsufficientShares { needed: 3, got: 1 }));
        assert_eq!(err.code(), 502);

        let err: Error = ShamirError::InvalidShare("not hex".into()).into();
        assert_eq!(err.code(), 501);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(share(SECRET, 2, 3), Err(ShamirError::InvalidParameters(_))));
        assert!(matches!(share(SECRET, 3, 0), Err(ShamirError::InvalidParameters(_))));
        assert!(matches!(share(SECRET, 256, 2), Err(ShamirError::InvalidParameters(_))));
        assert!(matches!(share("xyz", 3, 2), Err(ShamirError::InvalidParameters(_))));
    }

    #[test]
    fn test_mixed_shares_rejected() {
        let a = share(SECRET, 3, 2).unwrap();
        let b = share(SECRET, 3, 3).unwrap();
        assert!(matches!(
            combine(&[&a[0], &b[1]]),
            Err(ShamirError::InvalidShare(_))
        ));
        assert!(matches!(combine(&["01"]), Err(ShamirError::InvalidShare(_))));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ShamirError::InvalidParameters("t".into()).into();
        assert!(matches!(err, Error::InvalidShamirParameters(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_threshold_subsets_recover(
            secret in proptest::collection::vec(any::<u8>(), 0..48),
            num_shares in 2usize..8,
            threshold_seed in any::<usize>(),
            rotation in any::<usize>(),
        ) {
            let threshold = 2 + threshold_seed % (num_shares - 1);
            let secret_hex = hex::encode(&secret);
            let mut shares = share(&secret_hex, num_shares, threshold).unwrap();
            shares.rotate_left(rotation % num_shares);

            prop_assert_eq!(combine(&shares[..threshold]).unwrap(), secret_hex);
            let below = combine(&shares[..threshold - 1]);
            prop_assert_eq!(
                below,
                Err(ShamirError::InsufficientShares { needed: threshold, got: threshold - 1 })
            );
        }
    }
}
