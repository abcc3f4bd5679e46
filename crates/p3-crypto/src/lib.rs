//! # p3-crypto
//!
//! Cryptographic primitives for the p3 Sphinx packet format.
//!
//! The suite is fixed: one curve (NIST P-256) and one hash (BLAKE3). Nothing
//! in this crate negotiates algorithms, and callers never see a key type
//! they have to narrow at runtime.
//!
//! ## Modules
//!
//! - [`blake3`] - Domain-separated BLAKE3 hashing, header MAC and replay-tag hashing
//! - [`p256`] - P-256 keys, ECDH, scalar blinding and curve parameters

pub mod blake3;
pub mod p256;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Bytes do not decode to a valid, non-identity point on P-256.
    #[error("group element is not a valid curve point")]
    InvalidCurvePoint,

    /// Bytes do not decode to a valid non-zero scalar below the curve order.
    #[error("invalid secret scalar")]
    InvalidScalar,

    /// A blinding operation produced the identity or a zero scalar.
    #[error("degenerate blinding result")]
    DegenerateBlinding,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::InvalidKeyLength {
            expected: 33,
            actual: 12,
        };
        assert!(err.to_string().contains("expected 33"));
        assert!(err.to_string().contains("got 12"));
    }
}
