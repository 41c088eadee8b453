//! # sitefleet
//!
//! Runtime plane for a multi-site overlay-network deployment: a glob-pattern
//! Capability Engine, a bounded-queue Request Recorder, a retrying
//! HMAC-signed Webhook Notifier, and a Site Fleet Manager that keeps each
//! site's server running under a fleet-wide cap.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sitefleet::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod config;
pub mod database;
pub mod error;
pub mod fleet;
pub mod ids;
pub mod middleware;
pub mod notifier;
pub mod observability;
pub mod overlay;
pub mod recorder;
pub mod server;
pub mod state;

#[cfg(feature = "tls")]
pub mod tls;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capability::{can_create_site, can_delete_site, can_scrape_metrics, parse_grants, Access, Grant};
    pub use crate::config::{Config, FleetConfig, NotifierConfig, RecorderConfig, ServiceConfig};
    pub use crate::error::{Error, Result};
    pub use crate::fleet::{FleetError, FleetManager, SiteConfig, SiteConfigProvider};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::middleware::{
        authn_middleware, request_id_layer, request_id_propagation_layer, sensitive_headers_layer, AuthnMode,
        AuthnState, CallerGrants, RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
    };
    pub use crate::notifier::{Notifier, NotifierError, WebhookConfig};
    pub use crate::observability::init_tracing;
    pub use crate::overlay::{Collaborators, ContentHandler, IdentityClient, OverlayEndpoint};
    pub use crate::recorder::{Recorder, RecorderError, RequestEvent, StatusCounts};
    pub use crate::server::{layered_router, serve};
    pub use crate::state::AppState;

    #[cfg(feature = "tls")]
    pub use crate::tls::*;

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};
    pub use tokio;
    pub use async_trait::async_trait;
    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};
    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
    pub use uuid::Uuid;
    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};
    pub use http::{Method, Uri};
}
