//! Integration test crate for the p3 Sphinx core.
//!
//! This crate has no library code. Its tests drive packets from a sender
//! through chains of independent relay contexts, checking that every party
//! agrees on the per-hop secrets and that relays reject replays and
//! tampering.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p p3-integration-tests
//! ```
