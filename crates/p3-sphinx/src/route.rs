//! Per-hop routing info and sender-side packet construction.
//!
//! Each hop's header carries routing info telling the relay what to do after
//! it has authenticated the header:
//!
//! ```text
//! Final   = 0x00
//! Forward = 0x01 || LE32(len) || next_address || next_mac[32] || LE32(len) || inner
//! ```
//!
//! The sender builds routing info inside-out. The last hop gets `Final`; hop
//! `i` gets `Forward { address(i+1), mac(i+1), routing(i+1) }`, and `mac(i)`
//! authenticates hop `i`'s group element and routing info. A relay that
//! forwards therefore hands the next hop a header whose MAC the sender
//! computed in advance.

use p3_crypto::p256::{P256PublicKey, P256SecretKey};
use tracing::debug;

use crate::packet::{Header, Packet, Reader};
use crate::schedule::{HopKeys, PathKeySchedule};
use crate::{
    check_path_len, Result, SphinxError, MAC_SIZE, MAX_ADDRESS_SIZE, MAX_PAYLOAD_SIZE,
    MAX_ROUTING_INFO_SIZE,
};

const TAG_FINAL: u8 = 0x00;
const TAG_FORWARD: u8 = 0x01;

/// One relay on a path.
#[derive(Clone, Debug)]
pub struct RelayHop {
    /// The relay's long-term public key.
    pub public_key: P256PublicKey,
    /// Address the previous hop forwards to.
    pub address: String,
}

impl RelayHop {
    /// Create a hop description.
    pub fn new(public_key: P256PublicKey, address: impl Into<String>) -> Self {
        Self {
            public_key,
            address: address.into(),
        }
    }
}

/// Instruction decoded from an authenticated header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingInfo {
    /// This hop is the destination.
    Final,
    /// Forward to another relay.
    Forward {
        /// Address of the next relay.
        next_address: String,
        /// MAC the next relay will check.
        next_mac: [u8; MAC_SIZE],
        /// Routing info for the next relay.
        inner: Vec<u8>,
    },
}

impl RoutingInfo {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RoutingInfo::Final => vec![TAG_FINAL],
            RoutingInfo::Forward {
                next_address,
                next_mac,
                inner,
            } => {
                let mut out =
                    Vec::with_capacity(1 + 4 + next_address.len() + MAC_SIZE + 4 + inner.len());
                out.push(TAG_FORWARD);
                out.extend_from_slice(&(next_address.len() as u32).to_le_bytes());
                out.extend_from_slice(next_address.as_bytes());
                out.extend_from_slice(next_mac);
                out.extend_from_slice(&(inner.len() as u32).to_le_bytes());
                out.extend_from_slice(inner);
                out
            }
        }
    }

    /// Deserialize from bytes. Trailing bytes are rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let info = match reader.u8("routing tag")? {
            TAG_FINAL => RoutingInfo::Final,
            TAG_FORWARD => {
                let address = reader.length_prefixed("next address", MAX_ADDRESS_SIZE)?;
                let next_address = String::from_utf8(address.to_vec())
                    .map_err(|_| SphinxError::Encoding("next address is not UTF-8".into()))?;
                let next_mac = reader.array::<MAC_SIZE>("next mac")?;
                let inner = reader
                    .length_prefixed("inner routing info", MAX_ROUTING_INFO_SIZE)?
                    .to_vec();
                RoutingInfo::Forward {
                    next_address,
                    next_mac,
                    inner,
                }
            }
            other => {
                return Err(SphinxError::Encoding(format!(
                    "unknown routing tag 0x{other:02x}"
                )))
            }
        };
        reader.finish()?;
        Ok(info)
    }
}

/// Build a packet for `hops` with a fresh ephemeral session key.
pub fn new_packet(hops: &[RelayHop], payload: Vec<u8>) -> Result<Packet> {
    new_packet_with_session(hops, payload, &P256SecretKey::random())
}

/// Build a packet from relay public keys alone.
///
/// Forwarding addresses are left empty; callers that route by address
/// should use [`new_packet`].
pub fn new_packet_from_keys(circuit_public_keys: &[P256PublicKey], payload: Vec<u8>) -> Result<Packet> {
    let hops: Vec<RelayHop> = circuit_public_keys
        .iter()
        .map(|pk| RelayHop::new(pk.clone(), String::new()))
        .collect();
    new_packet(&hops, payload)
}

/// Build a packet for `hops` under an explicit session key.
///
/// The returned packet is addressed to `hops[0]`.
pub fn new_packet_with_session(
    hops: &[RelayHop],
    payload: Vec<u8>,
    session_key: &P256SecretKey,
) -> Result<Packet> {
    check_path_len(hops.len())?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(SphinxError::InvalidInput(format!(
            "payload is {} bytes (maximum {MAX_PAYLOAD_SIZE})",
            payload.len()
        )));
    }
    if let Some(hop) = hops.iter().find(|h| h.address.len() > MAX_ADDRESS_SIZE) {
        return Err(SphinxError::InvalidInput(format!(
            "relay address is {} bytes (maximum {MAX_ADDRESS_SIZE})",
            hop.address.len()
        )));
    }

    let relay_keys: Vec<P256PublicKey> = hops.iter().map(|h| h.public_key.clone()).collect();
    let schedule = PathKeySchedule::derive(&relay_keys, session_key)?;

    let header = build_header(hops, &schedule)?;
    debug!(
        "Built packet for {} hops ({} routing bytes, {} payload bytes)",
        hops.len(),
        header.routing_info.len(),
        payload.len()
    );

    Ok(Packet::new(header, payload))
}

/// Build the first hop's header from a derived schedule.
///
/// Routing info is not padded: it shrinks at every hop, so an observer can
/// tell a relay's position on the path from the header length.
fn build_header(hops: &[RelayHop], schedule: &PathKeySchedule) -> Result<Header> {
    let last = hops.len() - 1;
    let mut header = Header::sealed(
        &schedule.group_elements()[last],
        RoutingInfo::Final.to_bytes(),
        &HopKeys::derive(&schedule.shared_secrets()[last]),
    );

    for hop in (0..last).rev() {
        let routing = RoutingInfo::Forward {
            next_address: hops[hop + 1].address.clone(),
            next_mac: header.hmac,
            inner: header.routing_info,
        }
        .to_bytes();
        if routing.len() > MAX_ROUTING_INFO_SIZE {
            return Err(SphinxError::InvalidInput(format!(
                "routing info for hop {hop} is {} bytes (maximum {MAX_ROUTING_INFO_SIZE})",
                routing.len()
            )));
        }
        header = Header::sealed(
            &schedule.group_elements()[hop],
            routing,
            &HopKeys::derive(&schedule.shared_secrets()[hop]),
        );
    }

    Ok(header)
}
