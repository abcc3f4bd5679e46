//! Group-element blinding.
//!
//! Two modes, both deterministic in (element or scalar, blinding factor):
//!
//! - [`derive_group_element_pair`] - sender side. Multiplies the private
//!   scalar and returns both halves, because the sender has to keep blinding
//!   forward along the path.
//! - [`blind_group_element`] - relay side. Multiplies the public point only.
//!   Relays use this exclusively and never hold a private scalar of the chain.

use p3_crypto::p256::{self, BlindingFactor, P256PublicKey, P256SecretKey, SharedSecret};

use crate::Result;

/// Blind a private scalar, returning the new `(public, private)` pair.
pub fn derive_group_element_pair(
    secret: &P256SecretKey,
    factor: &BlindingFactor,
) -> Result<(P256PublicKey, P256SecretKey)> {
    let blinded = secret.blind(factor)?;
    Ok((blinded.public_key(), blinded))
}

/// Blind a public group element without touching any private scalar.
pub fn blind_group_element(
    element: &P256PublicKey,
    factor: &BlindingFactor,
) -> Result<P256PublicKey> {
    Ok(element.blind(factor)?)
}

/// Compute the element the next hop receives from the current one.
///
/// `next = element * H(element, secret)`
pub fn next_group_element(element: &P256PublicKey, secret: &SharedSecret) -> Result<P256PublicKey> {
    let factor = p256::compute_blinding_factor(element, secret)?;
    blind_group_element(element, &factor)
}
