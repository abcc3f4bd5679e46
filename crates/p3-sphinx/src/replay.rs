//! Replay detection for relays.
//!
//! A relay remembers a tag for every shared secret it has consumed:
//! `tag = BLAKE3::derive_key("p3 v1 sphinx-replay-tag", secret)`. A packet
//! whose tag is already present is a replay and is dropped.
//!
//! The store sits behind the [`ReplayStore`] trait so relays can inject their
//! own backend. [`MemoryReplayStore`] is the default:
//!
//! - check-and-insert happens under one lock, so of two concurrent packets
//!   carrying the same secret exactly one is accepted
//! - tags are kept forever by default; an optional retention window expires
//!   them, which is only sound when the relay key rotates within the window
//! - a capacity cap bounds memory; when it is reached and nothing has
//!   expired, new packets are refused instead of evicting live tags

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use p3_crypto::blake3::contexts;
use p3_crypto::p256::SharedSecret;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::ReplayConfig;
use crate::{Result, SphinxError};

/// Hash of a consumed shared secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplayTag([u8; 32]);

impl ReplayTag {
    /// Derive the tag for a hop's shared secret.
    pub fn from_secret(secret: &SharedSecret) -> Self {
        Self(p3_crypto::blake3::derive_key(
            contexts::SPHINX_REPLAY_TAG,
            secret.as_bytes(),
        ))
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes in hex, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for ReplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplayTag({}…)", self.short_hex())
    }
}

/// Set of consumed replay tags shared by all processing calls of one relay.
pub trait ReplayStore: Send + Sync {
    /// Atomically insert `tag` if it is not already present.
    ///
    /// Returns `Ok(true)` if the tag was inserted and `Ok(false)` if it was
    /// already present. Implementations must make the check and the insert
    /// a single linearizable step.
    fn insert_if_absent(&self, tag: ReplayTag) -> Result<bool>;

    /// Whether `tag` is currently recorded.
    fn contains(&self, tag: &ReplayTag) -> bool;

    /// Number of recorded tags.
    fn len(&self) -> usize;

    /// Whether no tags are recorded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every tag. Only safe together with a relay key rotation
    /// ([`RelayContext::rotate_key`](crate::relay::RelayContext::rotate_key)).
    fn flush(&self);
}

/// In-memory replay store with time-windowed eviction.
pub struct MemoryReplayStore {
    tags: Mutex<HashMap<ReplayTag, Instant>>,
    /// Retention window. `None` keeps tags forever.
    window: Option<Duration>,
    max_entries: usize,
}

impl MemoryReplayStore {
    /// Create a store with a retention window and capacity.
    pub fn new(window: Option<Duration>, max_entries: usize) -> Self {
        Self {
            tags: Mutex::new(HashMap::new()),
            window,
            max_entries,
        }
    }

    /// Create a store that never forgets a tag and has no capacity cap.
    pub fn unbounded() -> Self {
        Self::new(None, usize::MAX)
    }

    /// Create a store from relay configuration.
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.window(), config.max_entries)
    }

    /// Retention window, if any.
    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// [`ReplayStore::insert_if_absent`] against an explicit clock reading.
    pub fn insert_if_absent_at(&self, tag: ReplayTag, now: Instant) -> Result<bool> {
        let mut tags = self.tags.lock();

        match tags.get(&tag) {
            Some(seen) if !self.is_expired(*seen, now) => return Ok(false),
            Some(_) => {
                tags.insert(tag, now);
                return Ok(true);
            }
            None => {}
        }

        if tags.len() >= self.max_entries {
            let pruned = self.prune(&mut tags, now);
            if pruned > 0 {
                debug!("Pruned {} expired replay tags", pruned);
            }
            if tags.len() >= self.max_entries {
                return Err(SphinxError::ReplayStoreFull {
                    capacity: self.max_entries,
                });
            }
        }

        tags.insert(tag, now);
        Ok(true)
    }

    /// [`ReplayStore::contains`] against an explicit clock reading.
    pub fn contains_at(&self, tag: &ReplayTag, now: Instant) -> bool {
        self.tags
            .lock()
            .get(tag)
            .is_some_and(|seen| !self.is_expired(*seen, now))
    }

    /// Drop every expired tag, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let mut tags = self.tags.lock();
        self.prune(&mut tags, Instant::now())
    }

    fn prune(&self, tags: &mut HashMap<ReplayTag, Instant>, now: Instant) -> usize {
        let before = tags.len();
        tags.retain(|_, seen| !self.is_expired(*seen, now));
        before - tags.len()
    }

    fn is_expired(&self, seen: Instant, now: Instant) -> bool {
        self.window
            .is_some_and(|window| now.saturating_duration_since(seen) >= window)
    }
}

impl Default for MemoryReplayStore {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default())
    }
}

impl ReplayStore for MemoryReplayStore {
    fn insert_if_absent(&self, tag: ReplayTag) -> Result<bool> {
        self.insert_if_absent_at(tag, Instant::now())
    }

    fn contains(&self, tag: &ReplayTag) -> bool {
        self.contains_at(tag, Instant::now())
    }

    fn len(&self) -> usize {
        self.tags.lock().len()
    }

    fn flush(&self) {
        self.tags.lock().clear();
    }
}
