//! Domain-separated BLAKE3 hashing for the p3 Sphinx format.
//!
//! Every hash the packet format needs (blinding factors, replay tags, per-hop
//! subkeys, header MACs) goes through BLAKE3 with a registered context
//! string, so an output from one role can never be replayed into another.
//!
//! ## Modes
//!
//! - [`hash`] - Pure hashing
//! - [`derive_key`] - Key derivation: blinding factors, replay tags, hop subkeys
//! - [`keyed_hash`] - Keyed MAC over header bytes, checked with [`verify_keyed_hash`]

/// Registered BLAKE3 context strings.
///
/// Using an unregistered context string is a protocol violation.
pub mod contexts {
    pub const SPHINX_BLINDING_FACTOR: &str = "p3 v1 sphinx-blinding-factor";
    pub const SPHINX_REPLAY_TAG: &str = "p3 v1 sphinx-replay-tag";
    pub const SPHINX_HOP_MAC: &str = "p3 v1 sphinx-hop-mac";
    pub const SPHINX_HOP_STREAM: &str = "p3 v1 sphinx-hop-stream";
    pub const SPHINX_HOP_PAD: &str = "p3 v1 sphinx-hop-pad";
    pub const SPHINX_HOP_NONCE: &str = "p3 v1 sphinx-hop-nonce";

    /// All registered context strings.
    pub const ALL_CONTEXTS: &[&str] = &[
        SPHINX_BLINDING_FACTOR,
        SPHINX_REPLAY_TAG,
        SPHINX_HOP_MAC,
        SPHINX_HOP_STREAM,
        SPHINX_HOP_PAD,
        SPHINX_HOP_NONCE,
    ];
}

/// Size in bytes of every BLAKE3 output used by the format.
pub const OUTPUT_SIZE: usize = 32;

/// Compute BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "p3 v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    *hasher.finalize().as_bytes()
}

/// Compute a keyed BLAKE3 hash (MAC).
///
/// The key must be exactly 32 bytes, typically derived via [`derive_key`].
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Check a keyed BLAKE3 tag in constant time.
///
/// Comparison goes through [`::blake3::Hash`], whose equality does not
/// short-circuit on the first differing byte.
pub fn verify_keyed_hash(key: &[u8; 32], message: &[u8], tag: &[u8; 32]) -> bool {
    ::blake3::keyed_hash(key, message) == ::blake3::Hash::from(*tag)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
///
/// Every multi-field hash input in the format is built this way so that field
/// boundaries cannot be shifted between inputs.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_context_strings_registered() {
        for ctx in contexts::ALL_CONTEXTS {
            assert!(
                ctx.starts_with("p3 v1 "),
                "Context string '{ctx}' has wrong prefix"
            );
        }
    }

    #[test]
    fn test_context_strings_unique() {
        let mut seen = std::collections::HashSet::new();
        for ctx in contexts::ALL_CONTEXTS {
            assert!(seen.insert(*ctx), "duplicate context '{ctx}'");
        }
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"p3 test vector 1"), hash(b"p3 test vector 1"));
        assert_ne!(hash(b"input1"), hash(b"input2"));
    }

    #[test]
    fn test_derive_key_different_contexts() {
        let key1 = derive_key(contexts::SPHINX_HOP_MAC, &[0u8; 32]);
        let key2 = derive_key(contexts::SPHINX_REPLAY_TAG, &[0u8; 32]);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_keyed_hash_verify() {
        let key = derive_key(contexts::SPHINX_HOP_MAC, b"secret");
        let tag = keyed_hash(&key, b"header bytes");
        assert!(verify_keyed_hash(&key, b"header bytes", &tag));

        let mut bad = tag;
        bad[31] ^= 0x01;
        assert!(!verify_keyed_hash(&key, b"header bytes", &bad));
        assert!(!verify_keyed_hash(&key, b"header bytez", &tag));

        let other_key = derive_key(contexts::SPHINX_HOP_MAC, b"other");
        assert!(!verify_keyed_hash(&other_key, b"header bytes", &tag));
    }

    #[test]
    fn test_multi_field_encoding() {
        let encoded = encode_multi_field(&[b"hello", b"world"]);
        assert_eq!(encoded.len(), 4 + 5 + 4 + 5);
        assert_eq!(&encoded[0..4], &5u32.to_le_bytes());
        assert_eq!(&encoded[4..9], b"hello");
        assert_eq!(&encoded[9..13], &5u32.to_le_bytes());
        assert_eq!(&encoded[13..18], b"world");
    }

    #[test]
    fn test_multi_field_boundaries_matter() {
        let a = encode_multi_field(&[b"ab", b"c"]);
        let b = encode_multi_field(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
