//! NIST P-256 key agreement and scalar blinding.
//!
//! Sphinx re-blinds the packet's group element at every hop. This module
//! provides the curve operations that requires, fixed to one curve:
//!
//! - [`P256SecretKey`] / [`P256PublicKey`] - typed keys. A public key can
//!   only be built from a valid, non-identity point, so every element that
//!   reaches ECDH has already passed the curve-membership check.
//! - [`P256SecretKey::diffie_hellman`] - ECDH, yielding a [`SharedSecret`]
//!   (the affine x-coordinate of the shared point).
//! - [`compute_blinding_factor`] - `BLAKE3::derive_key("p3 v1 sphinx-blinding-factor",
//!   element || secret)` reduced modulo the group order.
//! - [`P256SecretKey::blind`] / [`P256PublicKey::blind`] - multiply the
//!   private scalar or the public point by a blinding factor.

use std::fmt;

use p256::ecdh;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, NonZeroScalar, PublicKey, Scalar, SecretKey, U256};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blake3::{self, contexts};
use crate::{CryptoError, Result};

/// Size of a SEC1 compressed P-256 point.
pub const COMPRESSED_POINT_SIZE: usize = 33;

/// Size of a P-256 scalar or field element.
pub const SCALAR_SIZE: usize = 32;

/// Big-endian order `n` of the P-256 base point.
pub const P256_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84, 0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63, 0x25, 0x51,
];

/// Parameters of the curve a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurveParams {
    /// Curve name.
    pub name: &'static str,
    /// Big-endian group order.
    pub order: [u8; 32],
    /// Scalar and field element size in bytes.
    pub scalar_size: usize,
    /// Size of a compressed point on the wire.
    pub compressed_point_size: usize,
}

/// Parameters of the one curve this build supports.
pub const fn curve_params() -> CurveParams {
    CurveParams {
        name: "P-256",
        order: P256_ORDER,
        scalar_size: SCALAR_SIZE,
        compressed_point_size: COMPRESSED_POINT_SIZE,
    }
}

/// A P-256 secret key: a non-zero scalar below the group order.
#[derive(Clone)]
pub struct P256SecretKey {
    inner: SecretKey,
}

/// A P-256 public key, guaranteed to be a valid non-identity curve point.
#[derive(Clone, PartialEq, Eq)]
pub struct P256PublicKey {
    inner: PublicKey,
}

/// An ECDH shared secret (the x-coordinate of the shared point).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

/// A non-zero scalar used to re-blind a group element for the next hop.
#[derive(Clone, Copy)]
pub struct BlindingFactor {
    scalar: NonZeroScalar,
}

impl P256SecretKey {
    /// Generate a new random secret key.
    pub fn random() -> Self {
        Self {
            inner: SecretKey::random(&mut OsRng),
        }
    }

    /// Create from a big-endian scalar.
    ///
    /// Fails for zero and for values not below the group order.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = SecretKey::from_bytes(&FieldBytes::from(*bytes))
            .map_err(|_| CryptoError::InvalidScalar)?;
        Ok(Self { inner })
    }

    /// Create from a big-endian scalar slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: SCALAR_SIZE,
                actual: bytes.len(),
            })?;
        Self::from_bytes(&arr)
    }

    /// Get the big-endian scalar bytes of this key.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.inner.to_bytes());
        out
    }

    /// Compute the corresponding public key.
    pub fn public_key(&self) -> P256PublicKey {
        P256PublicKey {
            inner: self.inner.public_key(),
        }
    }

    /// Parameters of the curve this key lives on.
    pub fn curve(&self) -> CurveParams {
        curve_params()
    }

    /// Perform Diffie-Hellman key agreement.
    pub fn diffie_hellman(&self, their_public: &P256PublicKey) -> SharedSecret {
        let shared = ecdh::diffie_hellman(self.inner.to_nonzero_scalar(), their_public.inner.as_affine());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(shared.raw_secret_bytes());
        SharedSecret { bytes }
    }

    /// Multiply the private scalar by a blinding factor modulo the group order.
    ///
    /// The result's public key equals `self.public_key().blind(factor)`.
    pub fn blind(&self, factor: &BlindingFactor) -> Result<Self> {
        let product: Scalar = *self.inner.to_nonzero_scalar() * *factor.scalar;
        let scalar: Option<NonZeroScalar> = NonZeroScalar::new(product).into();
        let scalar = scalar.ok_or(CryptoError::DegenerateBlinding)?;
        Ok(Self {
            inner: SecretKey::from(scalar),
        })
    }
}

impl fmt::Debug for P256SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("P256SecretKey([redacted])")
    }
}

impl P256PublicKey {
    /// Decode a SEC1-encoded point (compressed or uncompressed).
    ///
    /// Rejects encodings that are malformed, off the curve, or the identity.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidCurvePoint)?;
        Ok(Self { inner })
    }

    /// Decode a compressed point as carried in a packet header.
    ///
    /// Only the `0x02`/`0x03` tags are accepted, so each point has exactly
    /// one header encoding.
    pub fn from_bytes(bytes: &[u8; COMPRESSED_POINT_SIZE]) -> Result<Self> {
        if !matches!(bytes[0], 0x02 | 0x03) {
            return Err(CryptoError::InvalidCurvePoint);
        }
        Self::from_sec1_bytes(bytes)
    }

    /// Get the SEC1 compressed encoding.
    pub fn to_bytes(&self) -> [u8; COMPRESSED_POINT_SIZE] {
        let encoded = self.inner.to_encoded_point(true);
        let mut out = [0u8; COMPRESSED_POINT_SIZE];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Multiply the point by a blinding factor.
    ///
    /// Only the public half is computed; no private scalar is involved.
    pub fn blind(&self, factor: &BlindingFactor) -> Result<Self> {
        let point = self.inner.to_projective() * *factor.scalar;
        let inner =
            PublicKey::from_affine(point.to_affine()).map_err(|_| CryptoError::DegenerateBlinding)?;
        Ok(Self { inner })
    }
}

impl fmt::Debug for P256PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P256PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([redacted])")
    }
}

impl BlindingFactor {
    /// Reduce 32 bytes modulo the group order into a blinding factor.
    pub fn from_digest(digest: &[u8; 32]) -> Result<Self> {
        let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(*digest));
        let scalar: Option<NonZeroScalar> = NonZeroScalar::new(scalar).into();
        let scalar = scalar.ok_or(CryptoError::DegenerateBlinding)?;
        Ok(Self { scalar })
    }

    /// Big-endian scalar bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        let bytes = FieldBytes::from(self.scalar);
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        out
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor([redacted])")
    }
}

/// Compute the blinding factor binding a group element to a hop's secret.
///
/// `scalar = BLAKE3::derive_key("p3 v1 sphinx-blinding-factor",
/// LE32(33) || element || LE32(32) || secret) mod n`
pub fn compute_blinding_factor(
    element: &P256PublicKey,
    secret: &SharedSecret,
) -> Result<BlindingFactor> {
    let element_bytes = element.to_bytes();
    let input = blake3::encode_multi_field(&[&element_bytes, secret.as_bytes()]);
    let digest = blake3::derive_key(contexts::SPHINX_BLINDING_FACTOR, &input);
    BlindingFactor::from_digest(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key(byte: u8) -> P256SecretKey {
        P256SecretKey::from_bytes(&[byte; 32]).expect("valid scalar")
    }

    #[test]
    fn test_key_generation() {
        let secret = P256SecretKey::random();
        let public = secret.public_key();
        let bytes = public.to_bytes();
        assert!(bytes[0] == 0x02 || bytes[0] == 0x03);
    }

    #[test]
    fn test_diffie_hellman_agreement() {
        let alice = P256SecretKey::random();
        let bob = P256SecretKey::random();

        let alice_shared = alice.diffie_hellman(&bob.public_key());
        let bob_shared = bob.diffie_hellman(&alice.public_key());

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let secret = P256SecretKey::random();
        let restored = P256SecretKey::from_bytes(&secret.to_bytes()).expect("restore");
        assert_eq!(secret.public_key(), restored.public_key());

        let public = secret.public_key();
        let decoded = P256PublicKey::from_bytes(&public.to_bytes()).expect("decode");
        assert_eq!(public, decoded);
    }

    #[test]
    fn test_rejects_zero_and_order_scalars() {
        assert!(matches!(
            P256SecretKey::from_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidScalar)
        ));
        assert!(matches!(
            P256SecretKey::from_bytes(&P256_ORDER),
            Err(CryptoError::InvalidScalar)
        ));
        assert!(matches!(
            P256SecretKey::from_slice(&[1u8; 31]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn test_order_constant_reduces_to_zero() {
        let reduced = <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(P256_ORDER));
        assert_eq!(reduced, Scalar::ZERO);
        assert!(matches!(
            BlindingFactor::from_digest(&P256_ORDER),
            Err(CryptoError::DegenerateBlinding)
        ));
    }

    #[test]
    fn test_rejects_invalid_points() {
        // x-coordinate above the field modulus.
        let mut off_field = [0xffu8; COMPRESSED_POINT_SIZE];
        off_field[0] = 0x02;
        assert!(matches!(
            P256PublicKey::from_bytes(&off_field),
            Err(CryptoError::InvalidCurvePoint)
        ));

        // Non-compressed SEC1 tags, including the compact form of a valid point.
        for tag in [0x00, 0x04, 0x05, 0x06, 0x07] {
            let mut bad_tag = fixed_key(0x11).public_key().to_bytes();
            bad_tag[0] = tag;
            assert!(
                matches!(
                    P256PublicKey::from_bytes(&bad_tag),
                    Err(CryptoError::InvalidCurvePoint)
                ),
                "tag {tag:#04x} accepted"
            );
        }

        // SEC1 identity encoding.
        assert!(matches!(
            P256PublicKey::from_sec1_bytes(&[0x00]),
            Err(CryptoError::InvalidCurvePoint)
        ));
        assert!(P256PublicKey::from_sec1_bytes(&[]).is_err());
    }

    #[test]
    fn test_blinding_commutes_with_public_key() {
        let secret = fixed_key(0x42);
        let relay = fixed_key(0x07);
        let shared = secret.diffie_hellman(&relay.public_key());
        let factor = compute_blinding_factor(&secret.public_key(), &shared).expect("factor");

        let full = secret.blind(&factor).expect("blind secret");
        let public_only = secret.public_key().blind(&factor).expect("blind public");

        assert_eq!(full.public_key(), public_only);
        assert_ne!(public_only, secret.public_key());
    }

    #[test]
    fn test_blinding_factor_deterministic() {
        let secret = fixed_key(0x01);
        let shared = SharedSecret::from_bytes([0x33; 32]);
        let f1 = compute_blinding_factor(&secret.public_key(), &shared).expect("f1");
        let f2 = compute_blinding_factor(&secret.public_key(), &shared).expect("f2");
        assert_eq!(f1.to_bytes(), f2.to_bytes());

        let other = SharedSecret::from_bytes([0x34; 32]);
        let f3 = compute_blinding_factor(&secret.public_key(), &other).expect("f3");
        assert_ne!(f1.to_bytes(), f3.to_bytes());
    }

    #[test]
    fn test_curve_params() {
        let params = fixed_key(0x09).curve();
        assert_eq!(params, curve_params());
        assert_eq!(params.name, "P-256");
        assert_eq!(params.compressed_point_size, 33);
        assert_eq!(params.order, hex_literal::hex!(
            "ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551"
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let secret = fixed_key(0x55);
        assert_eq!(format!("{secret:?}"), "P256SecretKey([redacted])");
        let shared = SharedSecret::from_bytes([0xaa; 32]);
        assert!(!format!("{shared:?}").contains("aa"));
    }
}
