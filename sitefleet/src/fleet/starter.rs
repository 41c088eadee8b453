//! Site starter: builds and launches one site's server.
//!
//! This is the "(replaceable) site-starter" the Fleet Manager invokes
//! outside its lock. The default implementation composes the authn
//! middleware, a content handler, and an optional status-capturing Recorder
//! wrapper into a per-site router, binds a local listener, and hands the
//! listener's address to the overlay endpoint for exposure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::middleware::authn::{authn_middleware, AuthnMode, AuthnState, CallerGrants};
use crate::overlay::{Collaborators, ContentHandler};
use crate::recorder::{Recorder, RequestEvent};
use crate::server;

/// A site's server once started: its local address (handed to the overlay
/// endpoint) and the means to shut it down.
pub struct RunningSite {
    site: String,
    local_addr: SocketAddr,
    overlay: Arc<dyn crate::overlay::OverlayEndpoint>,
    content: Arc<dyn ContentHandler>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningSite {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A cloned handle to this site's content handler, for callers that need
    /// to act on it (e.g. invalidate cached config) without tearing the site
    /// down.
    pub fn content_handle(&self) -> Arc<dyn ContentHandler> {
        self.content.clone()
    }

    /// Graceful HTTP shutdown with a 5-second deadline (log-only on
    /// failure), then close the overlay endpoint.
    pub async fn close(self) {
        self.shutdown.cancel();
        match tokio::time::timeout(server::SHUTDOWN_DEADLINE, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(site = %self.site, "site server task panicked during shutdown: {e}"),
            Err(_) => tracing::warn!(site = %self.site, "site server did not shut down within the graceful deadline"),
        }
        if let Err(e) = self.overlay.close(&self.site).await {
            tracing::warn!(site = %self.site, "overlay endpoint close failed: {e}");
        }
    }
}

#[async_trait]
pub trait SiteStarter: Send + Sync {
    async fn start(&self, site: &str, public: bool, analytics_enabled: bool) -> Result<RunningSite, String>;
}

struct SiteContext {
    site: String,
    content: Arc<dyn ContentHandler>,
    recorder: Option<Arc<Recorder>>,
    analytics_enabled: bool,
}

async fn serve_content(
    State(ctx): State<Arc<SiteContext>>,
    Path(path): Path<String>,
    axum::Extension(_grants): axum::Extension<CallerGrants>,
) -> Response {
    let response = match ctx.content.handle(&ctx.site, &path).await {
        Some((body, content_type)) => ([("content-type", content_type)], body).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "not found").into_response(),
    };

    // `ctx.analytics_enabled` is the value the site was started with;
    // `content.analytics_enabled` is re-queried live so a config change that
    // disables analytics without flipping the public flag (which would
    // restart the site) takes effect on the next request.
    if ctx.analytics_enabled && ctx.content.analytics_enabled(&ctx.site).await {
        if let Some(recorder) = &ctx.recorder {
            recorder.record(RequestEvent::new(&ctx.site, format!("/{path}"), response.status().as_u16()));
        }
    }

    response
}

/// The default site-starter: binds a local TCP listener, composes the
/// standard per-site router, and publishes the listener under the overlay
/// endpoint's per-site hostname.
pub struct HttpSiteStarter {
    collaborators: Collaborators,
    recorder: Option<Arc<Recorder>>,
    capability_name: String,
}

impl HttpSiteStarter {
    pub fn new(collaborators: Collaborators, recorder: Option<Arc<Recorder>>, capability_name: impl Into<String>) -> Self {
        Self {
            collaborators,
            recorder,
            capability_name: capability_name.into(),
        }
    }
}

#[async_trait]
impl SiteStarter for HttpSiteStarter {
    async fn start(&self, site: &str, public: bool, analytics_enabled: bool) -> Result<RunningSite, String> {
        let ctx = Arc::new(SiteContext {
            site: site.to_string(),
            content: self.collaborators.content.clone(),
            recorder: self.recorder.clone(),
            analytics_enabled,
        });

        let authn_state = AuthnState {
            identity: self.collaborators.identity.clone(),
            mode: if public { AuthnMode::AllowAnonymous } else { AuthnMode::RequireCapability },
            capability_name: self.capability_name.clone(),
        };

        let router = Router::new()
            .route("/{*path}", get(serve_content))
            .with_state(ctx)
            .layer(middleware::from_fn_with_state(authn_state, authn_middleware));
        let router = server::layered_router(router);

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| format!("{site}: listen failed: {e}"))?;
        let local_addr = listener.local_addr().map_err(|e| format!("{site}: local_addr failed: {e}"))?;

        self.collaborators
            .overlay
            .publish(site, local_addr, public)
            .await
            .map_err(|e| format!("{site}: overlay publish failed: {e}"))?;
        self.collaborators.content.set_public(site, public).await;

        // The shared `server::serve` helper takes a plain `Router`, but the
        // authn middleware needs `ConnectInfo<SocketAddr>` on each request,
        // which only `into_make_service_with_connect_info` provides.
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let site_owned = site.to_string();
        let handle = tokio::spawn(async move {
            let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service)
                .with_graceful_shutdown(async move { shutdown_for_task.cancelled().await })
                .await
            {
                tracing::error!(site = %site_owned, "site server exited with error: {e}");
            }
        });

        Ok(RunningSite {
            site: site.to_string(),
            local_addr,
            overlay: self.collaborators.overlay.clone(),
            content: self.collaborators.content.clone(),
            shutdown,
            handle,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records how many times, and with what identity, each site was
    /// started — used to assert starter-invocation invariants without a
    /// real network.
    pub struct CountingStarter {
        counts: Mutex<HashMap<String, u32>>,
        last_identity: Mutex<HashMap<String, u64>>,
        next_identity: std::sync::atomic::AtomicU64,
        delay: Duration,
        content: Arc<crate::overlay::InMemoryContentStore>,
    }

    impl CountingStarter {
        pub fn new() -> Self {
            Self {
                counts: Mutex::new(HashMap::new()),
                last_identity: Mutex::new(HashMap::new()),
                next_identity: std::sync::atomic::AtomicU64::new(1),
                delay: Duration::from_millis(0),
                content: Arc::new(crate::overlay::InMemoryContentStore::new()),
            }
        }

        pub fn slow() -> Self {
            Self {
                delay: Duration::from_millis(50),
                ..Self::new()
            }
        }

        pub fn start_count(&self, site: &str) -> u32 {
            *self.counts.lock().unwrap().get(site).unwrap_or(&0)
        }

        pub fn last_identity(&self, site: &str) -> u64 {
            *self.last_identity.lock().unwrap().get(site).unwrap_or(&0)
        }

        pub fn content(&self) -> Arc<crate::overlay::InMemoryContentStore> {
            self.content.clone()
        }
    }

    #[async_trait]
    impl SiteStarter for CountingStarter {
        async fn start(&self, site: &str, _public: bool, _analytics_enabled: bool) -> Result<RunningSite, String> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            *self.counts.lock().unwrap().entry(site.to_string()).or_insert(0) += 1;
            let identity = self.next_identity.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.last_identity.lock().unwrap().insert(site.to_string(), identity);

            let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| e.to_string())?;
            let local_addr = listener.local_addr().map_err(|e| e.to_string())?;
            let shutdown = CancellationToken::new();
            let shutdown_for_task = shutdown.clone();
            let handle = tokio::spawn(async move {
                let router = Router::new().route("/", get(|| async { "ok" }));
                let _ = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown_for_task.cancelled().await })
                    .await;
            });

            Ok(RunningSite {
                site: site.to_string(),
                local_addr,
                overlay: Arc::new(crate::overlay::NullOverlayEndpoint::new()),
                content: self.content.clone(),
                shutdown,
                handle,
            })
        }
    }

    pub struct FailingStarter;

    #[async_trait]
    impl SiteStarter for FailingStarter {
        async fn start(&self, site: &str, _public: bool, _analytics_enabled: bool) -> Result<RunningSite, String> {
            Err(format!("{site}: simulated start failure"))
        }
    }
}
