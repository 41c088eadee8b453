//! Per-site HTTP server bootstrap.
//!
//! The teacher framework runs one global [`axum::serve`] for the whole
//! process; this system instead starts one independent server per site (see
//! [`crate::fleet`]), so the middleware stack that used to live on a single
//! [`Server`] is exposed here as a router-decorating function the Fleet
//! Manager's site-starter applies to each site's [`Router`].

use std::time::Duration;

use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer};

/// Request body size limit applied to every per-site router (static content
/// sites have no reason to accept large request bodies).
const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Per-request timeout applied to every per-site router.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Graceful-shutdown deadline for a Site Server's HTTP listener.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Apply the standard middleware stack to a per-site router: CORS,
/// compression, timeout, body-limit, trace, request-id propagation, and
/// panic recovery. Mirrors the layering order of the framework's former
/// single global server, now applied once per site.
pub fn layered_router(router: Router) -> Router {
    router
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::with_status_code(
            http::StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new()),
        )
        .layer(sensitive_headers_layer())
        .layer(request_id_propagation_layer())
        .layer(request_id_layer())
        .layer(CatchPanicLayer::new())
}

/// Serve `router` on `listener` until `shutdown` resolves, then drain with a
/// [`SHUTDOWN_DEADLINE`] timeout. Generic over [`axum::serve::Listener`] so
/// the same helper backs both the TLS-only and anonymous-exposure overlay
/// listener variants chosen by the site-starter.
pub async fn serve<L>(listener: L, router: Router, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()>
where
    L: axum::serve::Listener,
    L::Addr: std::fmt::Debug,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
