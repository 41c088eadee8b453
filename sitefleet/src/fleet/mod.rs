//! Site Fleet Manager: per-site server lifecycle under a single fleet-wide
//! cap, with race-safe create/restart-on-public-flip/stop.

pub mod starter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::notifier::{Notifier, WebhookConfig};
pub use starter::{RunningSite, SiteStarter};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("maximum site limit ({0}) reached")]
    FleetFull(usize),
    #[error("site start failed: {0}")]
    StartFailed(String),
}

/// The subset of a site's configuration the Fleet Manager consumes each
/// time `ensure_server` runs.
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub public: Option<bool>,
    pub webhook: WebhookConfig,
    pub analytics_enabled: bool,
}

impl SiteConfig {
    pub fn want_public(&self) -> bool {
        self.public.unwrap_or(false)
    }
}

/// Reads a site's current configuration. Backed by whatever store holds
/// site definitions; out of scope here (see `overlay`-style collaborator
/// traits), so this crate only depends on the trait.
#[async_trait]
pub trait SiteConfigProvider: Send + Sync {
    async fn config_for(&self, site: &str) -> SiteConfig;
}

/// A running per-site entity, tracked in [`FleetState::servers`] for at
/// most one instance per site name at any instant.
pub struct SiteServer {
    pub site: String,
    pub is_public: bool,
    running: RunningSite,
}

impl SiteServer {
    /// Graceful HTTP shutdown with a 5-second deadline (log-only on
    /// failure), then close the overlay endpoint.
    pub async fn close(self) {
        self.running.close().await;
    }

    /// A cloned handle to the running site's content handler.
    pub fn content_handle(&self) -> Arc<dyn crate::overlay::ContentHandler> {
        self.running.content_handle()
    }
}

struct FleetState {
    servers: HashMap<String, SiteServer>,
    starting: HashMap<String, Arc<Notify>>,
}

impl FleetState {
    fn new() -> Self {
        Self {
            servers: HashMap::new(),
            starting: HashMap::new(),
        }
    }
}

pub struct FleetManager {
    state: Mutex<FleetState>,
    max_sites: usize,
    config_provider: Arc<dyn SiteConfigProvider>,
    starter: Arc<dyn SiteStarter>,
    notifier: Option<Arc<Notifier>>,
}

impl FleetManager {
    pub fn new(max_sites: usize, config_provider: Arc<dyn SiteConfigProvider>, starter: Arc<dyn SiteStarter>) -> Self {
        Self {
            state: Mutex::new(FleetState::new()),
            max_sites,
            config_provider,
            starter,
            notifier: None,
        }
    }

    /// Attach a Webhook Notifier: a fresh or public-flipped Site Server
    /// fires the site's configured endpoint with a `"deploy"` or
    /// `"config_change"` event, per the data-flow note that deployment and
    /// site-config changes notify the site's webhook.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn notify(&self, event: &str, site: &str, config: &SiteConfig) {
        if let Some(notifier) = &self.notifier {
            notifier.fire(event, site, &config.webhook, serde_json::json!({ "site": site, "public": config.want_public() }));
        }
    }

    /// Idempotent: ensures a running Site Server for `site` whose
    /// `is_public` matches the current merged site config.
    ///
    /// Site config is read before the fleet lock is taken, since it's an
    /// I/O-bound call and the lock must never be held across a suspension
    /// point (see the concurrency model). This doesn't widen the race the
    /// spec's open question already calls out: the final re-check in step
    /// 9, below, is the sole defense either way.
    pub async fn ensure_server(&self, site: &str) -> Result<(), FleetError> {
        let config = self.config_provider.config_for(site).await;
        let want_public = config.want_public();

        enum Decision {
            Wait(Arc<Notify>),
            UpToDate(Arc<dyn crate::overlay::ContentHandler>),
            Replace(SiteServer),
            Fresh,
        }

        let decision = {
            let mut state = self.state.lock();
            if let Some(notify) = state.starting.get(site).cloned() {
                Decision::Wait(notify)
            } else if let Some(existing) = state.servers.get(site) {
                if existing.is_public == want_public {
                    Decision::UpToDate(existing.content_handle())
                } else {
                    let old = state.servers.remove(site).expect("just matched this key");
                    state.starting.insert(site.to_string(), Arc::new(Notify::new()));
                    Decision::Replace(old)
                }
            } else if state.servers.len() >= self.max_sites {
                return Err(FleetError::FleetFull(self.max_sites));
            } else {
                state.starting.insert(site.to_string(), Arc::new(Notify::new()));
                Decision::Fresh
            }
        };

        let (old, event) = match decision {
            Decision::Wait(notify) => {
                let notified = notify.notified();
                notified.await;
                return Ok(());
            }
            Decision::UpToDate(content) => {
                content.invalidate_config(site).await;
                return Ok(());
            }
            Decision::Replace(old) => (Some(old), "config_change"),
            Decision::Fresh => (None, "deploy"),
        };

        if let Some(old) = old {
            old.close().await;
        }

        let start_result = self.starter.start(site, want_public, config.analytics_enabled).await;

        let notify = {
            let mut state = self.state.lock();
            state.starting.remove(site)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        let running = match start_result {
            Ok(running) => running,
            Err(e) => return Err(FleetError::StartFailed(e)),
        };

        let surplus = {
            let mut state = self.state.lock();
            if state.servers.len() >= self.max_sites {
                Some(running)
            } else {
                state.servers.insert(
                    site.to_string(),
                    SiteServer {
                        site: site.to_string(),
                        is_public: want_public,
                        running,
                    },
                );
                None
            }
        };

        if let Some(surplus) = surplus {
            surplus.close().await;
            return Err(FleetError::FleetFull(self.max_sites));
        }

        self.notify(event, site, &config);

        Ok(())
    }

    /// Stop and remove `site`'s server if present; a no-op otherwise.
    pub async fn stop_server(&self, site: &str) {
        let removed = {
            let mut state = self.state.lock();
            state.servers.remove(site)
        };
        if let Some(server) = removed {
            server.close().await;
        }
    }

    /// Iterate `sites`, calling `ensure_server` for each; warns per-site but
    /// does not abort on individual failure.
    pub async fn start_existing_sites(&self, sites: &[String]) {
        for site in sites {
            if let Err(e) = self.ensure_server(site).await {
                tracing::warn!(site, error = %e, "fleet: failed to start existing site");
            }
        }
    }

    pub fn is_running(&self, site: &str) -> bool {
        self.state.lock().servers.contains_key(site)
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().servers.len()
    }

    /// Snapshot the map under the lock, clear it, then close each server
    /// outside the lock.
    pub async fn close(&self) {
        let servers: Vec<SiteServer> = {
            let mut state = self.state.lock();
            state.servers.drain().map(|(_, server)| server).collect()
        };
        for server in servers {
            server.close().await;
        }
    }
}
