//! Relay-side packet processing.
//!
//! A [`RelayContext`] holds one relay identity: its long-term secret key and
//! its replay store. It is `Send + Sync`; share it behind an `Arc` across
//! every connection the relay serves.
//!
//! ## Pipeline
//!
//! 1. Decode the header's group element; reject off-curve points
//! 2. `secret = ECDH(group_element, relay_sk)`
//! 3. `tag = H(secret)`; reject if already consumed
//! 4. Verify the header MAC under `HopKeys(secret).mac` (constant time)
//! 5. `next_element = group_element * H(group_element, secret)`
//! 6. Decode routing info: forward a rewritten header, or return the body
//!
//! Steps 3 and 4 run in the order chosen by [`ReplayOrdering`]. Every failure
//! is returned to the caller and leaves the context usable for later packets.

use std::sync::Arc;

use p3_crypto::p256::{P256PublicKey, P256SecretKey, SharedSecret};
use tracing::{debug, info, warn};

use crate::blinding::next_group_element;
use crate::config::{RelayConfig, ReplayOrdering};
use crate::packet::{Header, Packet};
use crate::replay::{MemoryReplayStore, ReplayStore, ReplayTag};
use crate::route::RoutingInfo;
use crate::schedule::HopKeys;
use crate::{Result, SphinxError};

/// Result of authenticating one header at this relay.
pub struct VerifiedHop {
    /// This hop's shared secret.
    pub shared_secret: SharedSecret,
    /// Subkeys expanded from the shared secret.
    pub hop_keys: HopKeys,
    /// The replay tag this header consumed.
    pub replay_tag: ReplayTag,
    /// Group element for the next hop.
    pub next_group_element: P256PublicKey,
}

/// Packet and address to send on to the next relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NextHop {
    /// The rewritten packet.
    pub packet: Packet,
    /// Where to send it.
    pub address: String,
}

/// Outcome of processing a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessedPacket {
    /// Forward to the next relay.
    Forward(NextHop),
    /// This relay is the destination; carries the packet body.
    Final(Vec<u8>),
}

/// Long-lived processing state of one relay identity.
pub struct RelayContext {
    secret_key: P256SecretKey,
    public_key: P256PublicKey,
    replay_store: Arc<dyn ReplayStore>,
    ordering: ReplayOrdering,
}

impl RelayContext {
    /// Create a context with the default configuration.
    pub fn new(secret_key: P256SecretKey) -> Self {
        Self::with_replay_store(
            secret_key,
            Arc::new(MemoryReplayStore::default()),
            ReplayOrdering::default(),
        )
    }

    /// Create a context with an in-memory replay store built from `config`.
    pub fn with_config(secret_key: P256SecretKey, config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MemoryReplayStore::from_config(&config.replay));
        Ok(Self::with_replay_store(secret_key, store, config.replay.ordering))
    }

    /// Create a context over an injected replay store.
    pub fn with_replay_store(
        secret_key: P256SecretKey,
        replay_store: Arc<dyn ReplayStore>,
        ordering: ReplayOrdering,
    ) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
            replay_store,
            ordering,
        }
    }

    /// This relay's public key.
    pub fn public_key(&self) -> &P256PublicKey {
        &self.public_key
    }

    /// The replay store backing this context.
    pub fn replay_store(&self) -> &Arc<dyn ReplayStore> {
        &self.replay_store
    }

    /// Replay tag commit ordering.
    pub fn ordering(&self) -> ReplayOrdering {
        self.ordering
    }

    /// Replace the relay key and forget every consumed tag.
    ///
    /// Headers built for the old key no longer authenticate, so the cleared
    /// tags cannot be matched again. A store shared with other contexts is
    /// flushed for all of them.
    pub fn rotate_key(&mut self, secret_key: P256SecretKey) {
        self.public_key = secret_key.public_key();
        self.secret_key = secret_key;
        self.replay_store.flush();
        info!("Rotated relay key, replay store flushed");
    }

    /// Authenticate a header and consume its replay tag.
    ///
    /// On success the shared secret is fresh and authenticated, ready for
    /// whichever layer decrypts the hop's payload.
    pub fn process_header(&self, header: &Header) -> Result<VerifiedHop> {
        let group_element = header.group_element().inspect_err(|_| {
            warn!("Dropping packet: group element is not a valid curve point");
        })?;

        let shared_secret = self.secret_key.diffie_hellman(&group_element);
        let replay_tag = ReplayTag::from_secret(&shared_secret);
        let hop_keys = HopKeys::derive(&shared_secret);

        match self.ordering {
            ReplayOrdering::BeforeAuthentication => {
                self.consume_tag(replay_tag)?;
                self.authenticate(header, &hop_keys, &replay_tag)?;
            }
            ReplayOrdering::AfterAuthentication => {
                self.authenticate(header, &hop_keys, &replay_tag)?;
                self.consume_tag(replay_tag)?;
            }
        }

        let next_group_element = next_group_element(&group_element, &shared_secret)?;

        debug!("Accepted header (tag: {})", replay_tag.short_hex());

        Ok(VerifiedHop {
            shared_secret,
            hop_keys,
            replay_tag,
            next_group_element,
        })
    }

    /// Process a packet: authenticate, de-duplicate, then forward or deliver.
    pub fn process_packet(&self, packet: &Packet) -> Result<ProcessedPacket> {
        if packet.version != crate::PACKET_VERSION {
            return Err(SphinxError::Encoding(format!(
                "unsupported packet version {}",
                packet.version
            )));
        }

        let hop = self.process_header(&packet.header)?;

        match RoutingInfo::from_bytes(&packet.header.routing_info)? {
            RoutingInfo::Final => {
                debug!("Packet reached its destination ({} bytes)", packet.payload.len());
                Ok(ProcessedPacket::Final(packet.payload.clone()))
            }
            RoutingInfo::Forward {
                next_address,
                next_mac,
                inner,
            } => {
                let header = Header {
                    group_element: hop.next_group_element.to_bytes(),
                    routing_info: inner,
                    hmac: next_mac,
                };
                debug!("Forwarding packet to {}", next_address);
                Ok(ProcessedPacket::Forward(NextHop {
                    packet: Packet::new(header, packet.payload.clone()),
                    address: next_address,
                }))
            }
        }
    }

    /// Process an encoded packet.
    pub fn process_bytes(&self, data: &[u8]) -> Result<ProcessedPacket> {
        let packet = Packet::from_bytes(data)?;
        self.process_packet(&packet)
    }

    fn consume_tag(&self, tag: ReplayTag) -> Result<()> {
        if self.replay_store.insert_if_absent(tag)? {
            Ok(())
        } else {
            warn!("Packet already processed, discarding (tag: {})", tag.short_hex());
            Err(SphinxError::ReplayDetected)
        }
    }

    fn authenticate(&self, header: &Header, keys: &HopKeys, tag: &ReplayTag) -> Result<()> {
        if header.verify_mac(keys) {
            Ok(())
        } else {
            warn!(
                "Header MAC not valid for derived shared secret (tag: {})",
                tag.short_hex()
            );
            Err(SphinxError::AuthenticationFailed)
        }
    }
}
