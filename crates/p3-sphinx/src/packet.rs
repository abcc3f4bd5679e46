//! Versioned binary wire format for headers and packets.
//!
//! All lengths are little-endian u32, matching
//! [`encode_multi_field`](p3_crypto::blake3::encode_multi_field).
//!
//! ```text
//! Header = group_element[33] || hmac[32] || LE32(len) || routing_info[len]
//! Packet = version[1] || Header || LE32(len) || payload[len]
//! ```
//!
//! The header MAC covers `encode_multi_field([version, group_element, routing_info])`
//! under the hop's [`HopKeys::mac`] key.
//!
//! Decoding keeps the group element as raw bytes. Curve validation is the
//! relay's first processing step, so an off-curve element surfaces as
//! [`SphinxError::InvalidCurvePoint`] rather than as a codec error.

use std::io::Write;

use p3_crypto::p256::P256PublicKey;

use crate::schedule::HopKeys;
use crate::{
    Result, SphinxError, GROUP_ELEMENT_SIZE, MAC_SIZE, MAX_PAYLOAD_SIZE, MAX_ROUTING_INFO_SIZE,
    PACKET_VERSION,
};

/// A Sphinx header as seen by one hop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// SEC1 compressed group element for this hop.
    pub group_element: [u8; GROUP_ELEMENT_SIZE],
    /// Routing info authenticated for this hop.
    pub routing_info: Vec<u8>,
    /// MAC over the authenticated fields.
    pub hmac: [u8; MAC_SIZE],
}

/// Top-level wire unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Wire format version.
    pub version: u8,
    /// Header for the receiving hop.
    pub header: Header,
    /// Packet body, opaque to this layer.
    pub payload: Vec<u8>,
}

impl Header {
    /// Build a header, computing its MAC under `keys`.
    pub fn sealed(group_element: &P256PublicKey, routing_info: Vec<u8>, keys: &HopKeys) -> Self {
        let group_element = group_element.to_bytes();
        let hmac = compute_header_mac(keys, &group_element, &routing_info);
        Self {
            group_element,
            routing_info,
            hmac,
        }
    }

    /// Decode and validate the group element.
    pub fn group_element(&self) -> Result<P256PublicKey> {
        Ok(P256PublicKey::from_bytes(&self.group_element)?)
    }

    /// Bytes covered by the header MAC.
    pub fn authenticated_bytes(&self) -> Vec<u8> {
        authenticated_bytes(&self.group_element, &self.routing_info)
    }

    /// Check the header MAC in constant time.
    pub fn verify_mac(&self, keys: &HopKeys) -> bool {
        p3_crypto::blake3::verify_keyed_hash(&keys.mac, &self.authenticated_bytes(), &self.hmac)
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        GROUP_ELEMENT_SIZE + MAC_SIZE + 4 + self.routing_info.len()
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Deserialize from bytes. Trailing bytes are rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let header = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.group_element);
        out.extend_from_slice(&self.hmac);
        out.extend_from_slice(&(self.routing_info.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.routing_info);
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        let group_element = reader.array::<GROUP_ELEMENT_SIZE>("group element")?;
        let hmac = reader.array::<MAC_SIZE>("hmac")?;
        let routing_info = reader.length_prefixed("routing info", MAX_ROUTING_INFO_SIZE)?;
        Ok(Self {
            group_element,
            routing_info: routing_info.to_vec(),
            hmac,
        })
    }
}

impl Packet {
    /// Create a packet with the current wire version.
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self {
            version: PACKET_VERSION,
            header,
            payload,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.header.encoded_len() + 4 + self.payload.len());
        out.push(self.version);
        self.header.encode_into(&mut out);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Write the encoded packet to `w`.
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes())
            .map_err(|e| SphinxError::Encoding(format!("write packet: {e}")))
    }

    /// Deserialize from bytes.
    ///
    /// Rejects unknown versions, truncated input, oversize fields and
    /// trailing bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let version = reader.u8("version")?;
        if version != PACKET_VERSION {
            return Err(SphinxError::Encoding(format!(
                "unsupported packet version {version} (expected {PACKET_VERSION})"
            )));
        }
        let header = Header::decode_from(&mut reader)?;
        let payload = reader.length_prefixed("payload", MAX_PAYLOAD_SIZE)?.to_vec();
        reader.finish()?;
        Ok(Self {
            version,
            header,
            payload,
        })
    }
}

/// Bytes covered by a header MAC.
pub fn authenticated_bytes(group_element: &[u8; GROUP_ELEMENT_SIZE], routing_info: &[u8]) -> Vec<u8> {
    p3_crypto::blake3::encode_multi_field(&[&[PACKET_VERSION], group_element, routing_info])
}

/// Compute the MAC for a header's authenticated fields.
pub fn compute_header_mac(
    keys: &HopKeys,
    group_element: &[u8; GROUP_ELEMENT_SIZE],
    routing_info: &[u8],
) -> [u8; MAC_SIZE] {
    p3_crypto::blake3::keyed_hash(&keys.mac, &authenticated_bytes(group_element, routing_info))
}

/// Cursor over an input buffer with bounds-checked reads.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| SphinxError::Encoding(format!("truncated {field}")))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub(crate) fn u32_le(&mut self, field: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, field)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub(crate) fn length_prefixed(&mut self, field: &str, max: usize) -> Result<&'a [u8]> {
        let len = self.u32_le(field)? as usize;
        if len > max {
            return Err(SphinxError::Encoding(format!(
                "{field} length {len} exceeds maximum {max}"
            )));
        }
        self.take(len, field)
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(SphinxError::Encoding(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p3_crypto::p256::{P256SecretKey, SharedSecret};

    fn sample_header() -> (Header, HopKeys) {
        let element = P256SecretKey::from_bytes(&[0x31; 32]).expect("key").public_key();
        let keys = HopKeys::derive(&SharedSecret::from_bytes([0x09; 32]));
        (Header::sealed(&element, b"routing".to_vec(), &keys), keys)
    }

    #[test]
    fn test_packet_roundtrip() {
        let (header, _) = sample_header();
        let packet = Packet::new(header, b"hello".to_vec());
        let bytes = packet.to_bytes();
        assert_eq!(bytes[0], PACKET_VERSION);
        assert_eq!(Packet::from_bytes(&bytes).expect("decode"), packet);

        let mut written = Vec::new();
        packet.encode(&mut written).expect("encode");
        assert_eq!(written, bytes);
    }

    #[test]
    fn test_header_layout() {
        let (header, _) = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 33 + 32 + 4 + 7);
        assert_eq!(&bytes[..33], &header.group_element);
        assert_eq!(&bytes[33..65], &header.hmac);
        assert_eq!(&bytes[65..69], &7u32.to_le_bytes());
        assert_eq!(Header::from_bytes(&bytes).expect("decode"), header);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let (header, _) = sample_header();
        let mut bytes = Packet::new(header, Vec::new()).to_bytes();
        bytes[0] = 2;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(SphinxError::Encoding(_))
        ));
    }

    #[test]
    fn test_rejects_truncation_and_trailing_bytes() {
        let (header, _) = sample_header();
        let bytes = Packet::new(header, b"body".to_vec()).to_bytes();

        for cut in [0, 1, 34, 70, bytes.len() - 1] {
            assert!(
                matches!(Packet::from_bytes(&bytes[..cut]), Err(SphinxError::Encoding(_))),
                "cut at {cut} accepted"
            );
        }

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            Packet::from_bytes(&extended),
            Err(SphinxError::Encoding(_))
        ));
    }

    #[test]
    fn test_rejects_oversize_lengths() {
        let (mut header, _) = sample_header();
        header.routing_info = Vec::new();
        let mut bytes = header.to_bytes();
        let oversize = (MAX_ROUTING_INFO_SIZE as u32 + 1).to_le_bytes();
        bytes[65..69].copy_from_slice(&oversize);
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(SphinxError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_keeps_invalid_group_element() {
        let (mut header, _) = sample_header();
        header.group_element = [0xff; GROUP_ELEMENT_SIZE];
        let decoded = Header::from_bytes(&header.to_bytes()).expect("codec accepts raw bytes");
        assert!(matches!(
            decoded.group_element(),
            Err(SphinxError::InvalidCurvePoint)
        ));
    }

    #[test]
    fn test_mac_verification() {
        let (header, keys) = sample_header();
        assert!(header.verify_mac(&keys));

        let mut tampered = header.clone();
        tampered.routing_info[0] ^= 0x80;
        assert!(!tampered.verify_mac(&keys));

        let other_keys = HopKeys::derive(&SharedSecret::from_bytes([0x0a; 32]));
        assert!(!header.verify_mac(&other_keys));
    }
}
