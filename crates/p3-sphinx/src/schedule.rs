//! Sender-side path-key schedule.
//!
//! Given the ordered relay public keys of a path and one ephemeral session
//! key, the sender derives a shared secret for every hop:
//!
//! ```text
//! x_0 = session scalar,           alpha_0 = x_0 * G
//! s_i = ECDH(relay_pk_i, x_i)
//! b_i = H(alpha_i, s_i)
//! x_{i+1} = x_i * b_i mod n,      alpha_{i+1} = x_{i+1} * G
//! ```
//!
//! Relay `i` receives `alpha_i` and recomputes `s_i = ECDH(alpha_i, relay_sk_i)`
//! without learning anything about the other hops.
//!
//! ## Per-hop subkeys
//!
//! Each shared secret is expanded with domain-separated BLAKE3 into
//! [`HopKeys`]:
//! - **mac**: `BLAKE3::derive_key("p3 v1 sphinx-hop-mac", secret)`
//! - **stream**: `BLAKE3::derive_key("p3 v1 sphinx-hop-stream", secret)`
//! - **pad**: `BLAKE3::derive_key("p3 v1 sphinx-hop-pad", secret)`
//! - **nonce**: `BLAKE3::derive_key("p3 v1 sphinx-hop-nonce", secret)[:12]`

use p3_crypto::blake3::contexts;
use p3_crypto::p256::{self, P256PublicKey, P256SecretKey, SharedSecret};
use tracing::debug;

use crate::blinding::derive_group_element_pair;
use crate::{check_path_len, Result};

/// Per-hop keys derived from a shared secret.
#[derive(Clone)]
pub struct HopKeys {
    /// Header MAC key.
    pub mac: [u8; 32],
    /// Stream cipher key for the payload layer.
    pub stream: [u8; 32],
    /// Key for padding generation.
    pub pad: [u8; 32],
    /// Nonce for the payload layer.
    pub nonce: [u8; 12],
}

impl HopKeys {
    /// Expand a hop's shared secret into its subkeys.
    pub fn derive(secret: &SharedSecret) -> Self {
        let secret = secret.as_bytes();
        let nonce_full = p3_crypto::blake3::derive_key(contexts::SPHINX_HOP_NONCE, secret);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&nonce_full[..12]);

        Self {
            mac: p3_crypto::blake3::derive_key(contexts::SPHINX_HOP_MAC, secret),
            stream: p3_crypto::blake3::derive_key(contexts::SPHINX_HOP_STREAM, secret),
            pad: p3_crypto::blake3::derive_key(contexts::SPHINX_HOP_PAD, secret),
            nonce,
        }
    }
}

/// Shared secrets and group elements for every hop of one path.
pub struct PathKeySchedule {
    group_elements: Vec<P256PublicKey>,
    shared_secrets: Vec<SharedSecret>,
}

impl PathKeySchedule {
    /// Derive the schedule for `relay_public_keys` under `session_key`.
    ///
    /// Fails with [`SphinxError::InvalidInput`](crate::SphinxError::InvalidInput)
    /// when the path is empty or longer than [`NUM_MAX_HOPS`](crate::NUM_MAX_HOPS).
    pub fn derive(relay_public_keys: &[P256PublicKey], session_key: &P256SecretKey) -> Result<Self> {
        check_path_len(relay_public_keys.len())?;
        let num_hops = relay_public_keys.len();

        let mut group_elements = Vec::with_capacity(num_hops);
        let mut shared_secrets = Vec::with_capacity(num_hops);

        let mut private_element = session_key.clone();
        let mut group_element = session_key.public_key();

        for (hop, relay_pk) in relay_public_keys.iter().enumerate() {
            if hop > 0 {
                // The factor comes from the previous hop's element and secret.
                let prev_secret = &shared_secrets[hop - 1];
                let factor = p256::compute_blinding_factor(&group_element, prev_secret)?;
                let (next_public, next_private) =
                    derive_group_element_pair(&private_element, &factor)?;
                group_element = next_public;
                private_element = next_private;
            }

            let shared_secret = private_element.diffie_hellman(relay_pk);
            group_elements.push(group_element.clone());
            shared_secrets.push(shared_secret);
        }

        debug!("Derived path-key schedule for {} hops", num_hops);

        Ok(Self {
            group_elements,
            shared_secrets,
        })
    }

    /// Number of hops in the schedule.
    pub fn len(&self) -> usize {
        self.shared_secrets.len()
    }

    /// Always false for a successfully derived schedule.
    pub fn is_empty(&self) -> bool {
        self.shared_secrets.is_empty()
    }

    /// Shared secrets in hop order (index 0 = first hop).
    pub fn shared_secrets(&self) -> &[SharedSecret] {
        &self.shared_secrets
    }

    /// Group elements in hop order; element `i` is the one hop `i` receives.
    pub fn group_elements(&self) -> &[P256PublicKey] {
        &self.group_elements
    }

    /// Subkeys for hop `hop`, if it exists.
    pub fn hop_keys(&self, hop: usize) -> Option<HopKeys> {
        self.shared_secrets.get(hop).map(HopKeys::derive)
    }

    /// Consume the schedule, returning only the shared secrets.
    pub fn into_shared_secrets(self) -> Vec<SharedSecret> {
        self.shared_secrets
    }
}

/// Generate all shared secrets for a path.
pub fn generate_shared_secrets(
    relay_public_keys: &[P256PublicKey],
    session_key: &P256SecretKey,
) -> Result<Vec<SharedSecret>> {
    PathKeySchedule::derive(relay_public_keys, session_key).map(PathKeySchedule::into_shared_secrets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blinding::next_group_element;
    use crate::{SphinxError, NUM_MAX_HOPS};

    fn relays(n: usize) -> Vec<P256SecretKey> {
        (0..n).map(|_| P256SecretKey::random()).collect()
    }

    fn publics(keys: &[P256SecretKey]) -> Vec<P256PublicKey> {
        keys.iter().map(P256SecretKey::public_key).collect()
    }

    #[test]
    fn test_schedule_length() {
        let session = P256SecretKey::random();
        for n in 1..=NUM_MAX_HOPS {
            let keys = relays(n);
            let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");
            assert_eq!(schedule.len(), n);
            assert_eq!(schedule.group_elements().len(), n);
            assert!(!schedule.is_empty());
        }
    }

    #[test]
    fn test_empty_path_rejected() {
        let session = P256SecretKey::random();
        assert!(matches!(
            PathKeySchedule::derive(&[], &session),
            Err(SphinxError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_shared_secrets(&[], &session),
            Err(SphinxError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_oversized_path_rejected() {
        let session = P256SecretKey::random();
        let keys = relays(NUM_MAX_HOPS + 1);
        assert!(matches!(
            PathKeySchedule::derive(&publics(&keys), &session),
            Err(SphinxError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_first_element_is_session_public() {
        let session = P256SecretKey::random();
        let keys = relays(3);
        let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");
        assert_eq!(schedule.group_elements()[0], session.public_key());
    }

    #[test]
    fn test_relays_agree_on_secrets() {
        let session = P256SecretKey::random();
        let keys = relays(4);
        let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");

        for (hop, relay) in keys.iter().enumerate() {
            let element = &schedule.group_elements()[hop];
            let relay_secret = relay.diffie_hellman(element);
            assert_eq!(
                relay_secret.as_bytes(),
                schedule.shared_secrets()[hop].as_bytes(),
                "hop {hop} disagrees"
            );
        }
    }

    #[test]
    fn test_relay_blinding_reproduces_next_element() {
        let session = P256SecretKey::random();
        let keys = relays(3);
        let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");

        for hop in 0..2 {
            let element = &schedule.group_elements()[hop];
            let secret = keys[hop].diffie_hellman(element);
            let next = next_group_element(element, &secret).expect("blind");
            assert_eq!(&next, &schedule.group_elements()[hop + 1]);
        }
    }

    #[test]
    fn test_group_elements_distinct() {
        let session = P256SecretKey::random();
        let keys = relays(5);
        let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");
        let elements = schedule.group_elements();
        for pair in elements.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_deterministic_for_fixed_keys() {
        let session = P256SecretKey::from_bytes(&[0x11; 32]).expect("session");
        let keys: Vec<P256SecretKey> = [0x21u8, 0x22, 0x23]
            .iter()
            .map(|b| P256SecretKey::from_bytes(&[*b; 32]).expect("relay"))
            .collect();

        let a = generate_shared_secrets(&publics(&keys), &session).expect("a");
        let b = generate_shared_secrets(&publics(&keys), &session).expect("b");
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.as_bytes(), y.as_bytes());
        }
    }

    #[test]
    fn test_hop_keys() {
        let keys = HopKeys::derive(&SharedSecret::from_bytes([0x42; 32]));
        let again = HopKeys::derive(&SharedSecret::from_bytes([0x42; 32]));
        assert_eq!(keys.mac, again.mac);
        assert_eq!(keys.nonce, again.nonce);
        assert_ne!(keys.mac, keys.stream);
        assert_ne!(keys.mac, keys.pad);
        assert_ne!(keys.stream, keys.pad);

        let other = HopKeys::derive(&SharedSecret::from_bytes([0x43; 32]));
        assert_ne!(keys.mac, other.mac);
    }

    #[test]
    fn test_hop_keys_out_of_range() {
        let session = P256SecretKey::random();
        let keys = relays(2);
        let schedule = PathKeySchedule::derive(&publics(&keys), &session).expect("derive");
        assert!(schedule.hop_keys(1).is_some());
        assert!(schedule.hop_keys(2).is_none());
    }
}
