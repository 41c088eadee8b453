//! Per-request middleware.

pub mod authn;
pub mod request_tracking;

pub use authn::{authn_middleware, AuthnMode, AuthnState, CallerGrants};
pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
    PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
