//! # Peer Registry
//!
//! The process-wide set of known peer URLs with a health flag each.
//! URLs are normalized before insertion so `http://node-2:5000` and
//! `http://node-2:5000/` cannot coexist, and a node never registers
//! itself. Failing peers are marked unhealthy but never removed — probes
//! keep retrying them indefinitely and flip the flag back on success.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

/// Health record for one peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerState {
    pub healthy: bool,
}

/// Thread-safe registry of peer URLs. Clones share the same underlying
/// set, so background tasks can carry their own handle.
#[derive(Clone)]
pub struct PeerRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    self_url: String,
    peers: DashMap<String, PeerState>,
}

/// Canonical form of a peer URL: trimmed, no trailing slash.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl PeerRegistry {
    pub fn new(self_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                self_url: normalize_url(&self_url.into()),
                peers: DashMap::new(),
            }),
        }
    }

    pub fn self_url(&self) -> &str {
        &self.inner.self_url
    }

    /// Adds a peer, returning the normalized URL when it is genuinely new.
    /// Self-registration and duplicates are no-ops.
    pub fn register(&self, url: &str) -> Option<String> {
        let url = normalize_url(url);
        if url.is_empty() || url == self.inner.self_url {
            debug!(%url, "ignoring self or empty peer registration");
            return None;
        }
        if self.inner.peers.contains_key(&url) {
            return None;
        }
        info!(peer = %url, "peer registered");
        self.inner.peers.insert(url.clone(), PeerState { healthy: true });
        Some(url)
    }

    pub fn remove(&self, url: &str) {
        self.inner.peers.remove(&normalize_url(url));
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.peers.contains_key(&normalize_url(url))
    }

    /// Flips a peer's health flag. Logs only on transitions.
    pub fn mark(&self, url: &str, healthy: bool) {
        if let Some(mut state) = self.inner.peers.get_mut(&normalize_url(url)) {
            if state.healthy != healthy {
                info!(peer = %url, healthy, "peer health changed");
            }
            state.healthy = healthy;
        }
    }

    pub fn is_healthy(&self, url: &str) -> bool {
        self.inner
            .peers
            .get(&normalize_url(url))
            .map(|s| s.healthy)
            .unwrap_or(false)
    }

    /// Every known peer URL, sorted for stable output.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    /// Only the peers currently marked healthy.
    pub fn healthy_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .inner
            .peers
            .iter()
            .filter(|e| e.value().healthy)
            .map(|e| e.key().clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.peers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new("http://localhost:5000")
    }

    #[test]
    fn registers_and_normalizes() {
        let peers = registry();
        assert_eq!(
            peers.register("http://node-2:5000/ "),
            Some("http://node-2:5000".to_string())
        );
        assert!(peers.contains("http://node-2:5000"));
        assert!(peers.contains("http://node-2:5000/"));
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn never_registers_itself() {
        let peers = registry();
        assert_eq!(peers.register("http://localhost:5000"), None);
        assert_eq!(peers.register("http://localhost:5000/"), None);
        assert!(peers.is_empty());
    }

    #[test]
    fn duplicate_registration_is_a_noop() {
        let peers = registry();
        assert!(peers.register("http://node-2:5000").is_some());
        assert!(peers.register("http://node-2:5000").is_none());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn health_flag_flips_without_removal() {
        let peers = registry();
        peers.register("http://node-2:5000");
        assert!(peers.is_healthy("http://node-2:5000"));

        peers.mark("http://node-2:5000", false);
        assert!(!peers.is_healthy("http://node-2:5000"));
        assert!(peers.contains("http://node-2:5000"));
        assert!(peers.healthy_urls().is_empty());

        peers.mark("http://node-2:5000", true);
        assert_eq!(peers.healthy_urls(), vec!["http://node-2:5000"]);
    }

    #[test]
    fn urls_are_sorted() {
        let peers = registry();
        peers.register("http://node-3:5000");
        peers.register("http://node-2:5000");
        assert_eq!(
            peers.urls(),
            vec!["http://node-2:5000", "http://node-3:5000"]
        );
    }
}
