//! # Network
//!
//! Everything that talks to other nodes: the peer registry with health
//! flags, the HTTP peer client, and the sync layer implementing
//! longest-valid-chain resolution, gossip fan-out, auto-heal, and
//! recursive bootstrap discovery.

pub mod client;
pub mod peers;
pub mod sync;

pub use client::{BlockDelivery, PeerClient, PeerError};
pub use peers::PeerRegistry;
pub use sync::SyncOutcome;
