//! Application state shared across the management API's handlers.
//!
//! The Capability Engine is stateless (pure functions over a parsed grant
//! list) and so has no place here; the Recorder, Notifier, and Fleet Manager
//! are each long-lived and shared, so each gets an `Arc` handle.

use std::sync::Arc;

use crate::config::Config;
use crate::fleet::FleetManager;
use crate::notifier::Notifier;
use crate::recorder::Recorder;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    recorder: Arc<Recorder>,
    notifier: Arc<Notifier>,
    fleet: Arc<FleetManager>,
}

impl AppState {
    pub fn new(config: Config, recorder: Arc<Recorder>, notifier: Arc<Notifier>, fleet: Arc<FleetManager>) -> Self {
        Self {
            config: Arc::new(config),
            recorder,
            notifier,
            fleet,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn fleet(&self) -> &Arc<FleetManager> {
        &self.fleet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::starter::tests::CountingStarter;
    use crate::fleet::SiteConfig;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    struct EmptyConfigProvider;

    #[async_trait]
    impl crate::fleet::SiteConfigProvider for EmptyConfigProvider {
        async fn config_for(&self, _site: &str) -> SiteConfig {
            SiteConfig::default()
        }
    }

    #[tokio::test]
    async fn test_app_state_exposes_collaborators() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let recorder = Arc::new(Recorder::open(pool.clone(), 16).await.unwrap());
        let notifier = Arc::new(Notifier::open(pool, 4, vec![]).await.unwrap());
        let fleet = Arc::new(FleetManager::new(4, Arc::new(EmptyConfigProvider), Arc::new(CountingStarter::new())));

        let state = AppState::new(Config::default(), recorder, notifier, fleet);
        assert_eq!(state.config().service.name, "sitefleet");
        assert_eq!(state.fleet().running_count(), 0);
    }
}
