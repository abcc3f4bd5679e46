//! # p3-sphinx
//!
//! Sphinx path-key schedule and relay processing.
//!
//! A sender derives one shared secret per hop by repeatedly blinding an
//! ephemeral P-256 key; each relay re-derives its hop's secret from the group
//! element it receives, rejects replays, authenticates the header and blinds
//! the element again for the next hop.
//!
//! - [`schedule`] - Sender-side path-key schedule and per-hop subkeys
//! - [`blinding`] - Full and public-only group-element blinding
//! - [`packet`] - Versioned header/packet wire format and header MAC
//! - [`route`] - Per-hop routing info and packet construction
//! - [`replay`] - Replay-tag store with time-windowed eviction
//! - [`relay`] - Relay context: authenticate, de-duplicate, forward
//! - [`config`] - Relay configuration (TOML)
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Curve | P-256 |
//! | Maximum hops | 15 |
//! | Packet version | 1 |
//! | Group element size | 33 bytes (SEC1 compressed) |
//! | Header MAC size | 32 bytes |

pub mod blinding;
pub mod config;
pub mod packet;
pub mod relay;
pub mod replay;
pub mod route;
pub mod schedule;

use p3_crypto::CryptoError;

/// Maximum circuit length. Paths longer than this are rejected.
pub const NUM_MAX_HOPS: usize = 15;

/// Wire format version written into every packet.
pub const PACKET_VERSION: u8 = 1;

/// Size of a header MAC in bytes.
pub const MAC_SIZE: usize = 32;

/// Size of an encoded group element in bytes.
pub const GROUP_ELEMENT_SIZE: usize = p3_crypto::p256::COMPRESSED_POINT_SIZE;

/// Maximum size of a header's routing info in bytes.
pub const MAX_ROUTING_INFO_SIZE: usize = 8192;

/// Maximum size of a packet body in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 65536;

/// Maximum size of a next-hop address in bytes.
pub const MAX_ADDRESS_SIZE: usize = 255;

/// Error types for Sphinx operations.
#[derive(Debug, thiserror::Error)]
pub enum SphinxError {
    /// Caller-supplied input is out of range (empty or oversized path, oversize fields).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The packet's shared secret has already been consumed by this relay.
    #[error("packet already processed (replay detected)")]
    ReplayDetected,

    /// The header MAC does not match the derived shared secret.
    #[error("header MAC not valid for derived shared secret")]
    AuthenticationFailed,

    /// Wire encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The header's group element is not a valid curve point.
    #[error("group element is not on the curve")]
    InvalidCurvePoint,

    /// The replay store is full of unexpired tags.
    #[error("replay store at capacity ({capacity} tags)")]
    ReplayStoreFull { capacity: usize },

    /// Invalid relay configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cryptographic error from p3-crypto.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for SphinxError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidCurvePoint => SphinxError::InvalidCurvePoint,
            other => SphinxError::Crypto(other),
        }
    }
}

/// Convenience result type for Sphinx operations.
pub type Result<T> = std::result::Result<T, SphinxError>;

/// Check that a path length is within `1..=NUM_MAX_HOPS`.
pub(crate) fn check_path_len(num_hops: usize) -> Result<()> {
    if num_hops == 0 {
        return Err(SphinxError::InvalidInput(
            "a set of relay public keys must be provided".into(),
        ));
    }
    if num_hops > NUM_MAX_HOPS {
        return Err(SphinxError::InvalidInput(format!(
            "path has {num_hops} hops (maximum {NUM_MAX_HOPS})"
        )));
    }
    Ok(())
}
