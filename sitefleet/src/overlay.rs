//! Trait boundaries to the collaborators this system sits on top of but does
//! not implement: the overlay network that exposes a site's listener under a
//! per-hostname address, the content store backing a site's files, and the
//! identity provider resolving a caller's capability grants.
//!
//! These are out of scope for this system (see the design notes) but the
//! Fleet Manager and the authn middleware still need a seam to call through,
//! so each is expressed as an `async_trait` object-safe trait with a minimal
//! in-memory test double.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use parking_lot::Mutex;

/// Resolves a site's static content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, site: &str, path: &str) -> Option<Bytes>;
}

/// Exposes a site's local HTTP listener under the overlay network, and tears
/// the exposure down when the site stops or flips to private.
#[async_trait]
pub trait OverlayEndpoint: Send + Sync {
    /// Publish `local_addr` under `site`'s overlay hostname. `public`
    /// controls whether the exposure is reachable anonymously or requires
    /// overlay-network membership.
    async fn publish(&self, site: &str, local_addr: SocketAddr, public: bool) -> Result<(), String>;

    /// Tear down the exposure published for `site`.
    async fn close(&self, site: &str) -> Result<(), String>;
}

/// Resolves a caller's capability grants from their overlay-network identity.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Look up the raw capability-grant JSON stored under `capability_name`
    /// for `remote`. Returns an empty array's JSON (or any input
    /// `parse_grants` accepts as "no grants") for an unrecognized caller
    /// rather than an error — the authn middleware treats "no grants" and
    /// "unknown identity" the same way (deny). The authn middleware parses
    /// the result with [`crate::capability::parse_grants`]; a malformed
    /// bucket surfaces as `Error::CapabilityParse`, distinct from a lookup
    /// failure.
    async fn grants_for(&self, remote: SocketAddr, capability_name: &str) -> Result<String, String>;
}

/// Serves a single site's content over HTTP, composed into the per-site
/// router by the Fleet Manager's site-starter. A single handler instance
/// serves every site, so every method is scoped by `site`.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    async fn handle(&self, site: &str, path: &str) -> Option<(Bytes, &'static str)>;

    /// Whether responses served for `site` should be recorded by the
    /// Request Recorder. Consulted per-request (not just at site-start)
    /// since `EnsureServer`'s up-to-date path invalidates config without
    /// restarting the site, so this is the only place a live toggle of the
    /// flag takes effect without a public-flag flip.
    async fn analytics_enabled(&self, site: &str) -> bool;

    /// Drop any cached per-site config (e.g. webhook URL, analytics flag)
    /// this handler holds for `site`, forcing the next read to refetch.
    /// Called by `EnsureServer` when a site's config changed but its
    /// public flag didn't, so no restart is needed.
    async fn invalidate_config(&self, site: &str);

    /// Record whether `site` is currently exposed publicly, mirroring the
    /// flag the overlay endpoint was told at publish time.
    async fn set_public(&self, site: &str, public: bool);
}

/// In-memory test double for [`ContentStore`] and [`ContentHandler`].
#[derive(Default)]
pub struct InMemoryContentStore {
    files: Mutex<HashMap<(String, String), (Bytes, &'static str)>>,
    analytics_enabled: Mutex<HashMap<String, bool>>,
    public: Mutex<HashMap<String, bool>>,
    invalidations: Mutex<HashMap<String, u32>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, site: &str, path: &str, body: impl Into<Bytes>, content_type: &'static str) {
        self.files
            .lock()
            .insert((site.to_string(), path.to_string()), (body.into(), content_type));
    }

    pub fn set_analytics_enabled(&self, site: &str, enabled: bool) {
        self.analytics_enabled.lock().insert(site.to_string(), enabled);
    }

    pub fn is_public(&self, site: &str) -> Option<bool> {
        self.public.lock().get(site).copied()
    }

    pub fn invalidation_count(&self, site: &str) -> u32 {
        *self.invalidations.lock().get(site).unwrap_or(&0)
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get(&self, site: &str, path: &str) -> Option<Bytes> {
        self.files
            .lock()
            .get(&(site.to_string(), path.to_string()))
            .map(|(body, _)| body.clone())
    }
}

#[async_trait]
impl ContentHandler for InMemoryContentStore {
    async fn handle(&self, site: &str, path: &str) -> Option<(Bytes, &'static str)> {
        self.files.lock().get(&(site.to_string(), path.to_string())).cloned()
    }

    async fn analytics_enabled(&self, site: &str) -> bool {
        *self.analytics_enabled.lock().get(site).unwrap_or(&true)
    }

    async fn invalidate_config(&self, site: &str) {
        *self.invalidations.lock().entry(site.to_string()).or_insert(0) += 1;
    }

    async fn set_public(&self, site: &str, public: bool) {
        self.public.lock().insert(site.to_string(), public);
    }
}

/// No-op overlay endpoint, for tests that don't exercise the overlay
/// publish/close lifecycle itself.
#[derive(Default)]
pub struct NullOverlayEndpoint {
    published: Mutex<HashMap<String, (SocketAddr, bool)>>,
}

impl NullOverlayEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_published(&self, site: &str) -> bool {
        self.published.lock().contains_key(site)
    }
}

#[async_trait]
impl OverlayEndpoint for NullOverlayEndpoint {
    async fn publish(&self, site: &str, local_addr: SocketAddr, public: bool) -> Result<(), String> {
        self.published.lock().insert(site.to_string(), (local_addr, public));
        Ok(())
    }

    async fn close(&self, site: &str) -> Result<(), String> {
        self.published.lock().remove(site);
        Ok(())
    }
}

/// Identity client test double returning a fixed grant set per remote
/// address, serialized to the raw JSON [`IdentityClient::grants_for`]
/// returns. `capability_name` is ignored — this double has one bucket.
#[derive(Default)]
pub struct StaticIdentityClient {
    grants: Mutex<HashMap<SocketAddr, Vec<crate::capability::Grant>>>,
}

impl StaticIdentityClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, remote: SocketAddr, grants: Vec<crate::capability::Grant>) {
        self.grants.lock().insert(remote, grants);
    }
}

#[async_trait]
impl IdentityClient for StaticIdentityClient {
    async fn grants_for(&self, remote: SocketAddr, _capability_name: &str) -> Result<String, String> {
        let grants = self.grants.lock().get(&remote).cloned().unwrap_or_default();
        serde_json::to_string(&grants).map_err(|e| e.to_string())
    }
}

/// Shared collaborator handles passed into the Fleet Manager's site-starter.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentHandler>,
    pub overlay: Arc<dyn OverlayEndpoint>,
    pub identity: Arc<dyn IdentityClient>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Access, Grant};

    #[tokio::test]
    async fn test_in_memory_content_store_round_trip() {
        let store = InMemoryContentStore::new();
        store.put("docs", "/index.html", "hello", "text/html");
        let body = store.get("docs", "/index.html").await.unwrap();
        assert_eq!(&body[..], b"hello");
        assert!(store.get("docs", "/missing").await.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_content_store_tracks_public_analytics_and_invalidation() {
        let store = InMemoryContentStore::new();
        assert!(store.analytics_enabled("docs").await);
        store.set_analytics_enabled("docs", false);
        assert!(!store.analytics_enabled("docs").await);

        store.set_public("docs", true).await;
        assert_eq!(store.is_public("docs"), Some(true));

        assert_eq!(store.invalidation_count("docs"), 0);
        store.invalidate_config("docs").await;
        assert_eq!(store.invalidation_count("docs"), 1);
    }

    #[tokio::test]
    async fn test_null_overlay_endpoint_publish_close() {
        let overlay = NullOverlayEndpoint::new();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        overlay.publish("docs", addr, true).await.unwrap();
        assert!(overlay.is_published("docs"));
        overlay.close("docs").await.unwrap();
        assert!(!overlay.is_published("docs"));
    }

    #[tokio::test]
    async fn test_static_identity_client_unknown_remote_is_empty() {
        let identity = StaticIdentityClient::new();
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let raw = identity.grants_for(addr, "sites").await.unwrap();
        assert_eq!(crate::capability::parse_grants(&raw).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_static_identity_client_known_remote() {
        let identity = StaticIdentityClient::new();
        let addr: SocketAddr = "127.0.0.1:9091".parse().unwrap();
        identity.set(
            addr,
            vec![Grant {
                access: Access::Admin,
                sites: vec![],
            }],
        );
        let raw = identity.grants_for(addr, "sites").await.unwrap();
        let grants = crate::capability::parse_grants(&raw).unwrap();
        assert_eq!(grants.len(), 1);
    }
}
