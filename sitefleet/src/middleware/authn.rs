//! Identity resolution middleware: looks the caller up by remote address
//! through the overlay network's identity client, parses their capability
//! grants, and stores them on the request for downstream extractors.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::capability::{self, Grant};
use crate::error::Error;
use crate::overlay::IdentityClient;

/// Whether a route requires a recognized capability grant or merely wants it
/// attached when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthnMode {
    /// No grants is a valid outcome; handlers decide what an anonymous
    /// caller may do. Used for a public site's content routes.
    AllowAnonymous,
    /// No grants is a 403. Used for the management API and the metrics
    /// endpoint.
    RequireCapability,
}

#[derive(Clone)]
pub struct AuthnState {
    pub identity: Arc<dyn IdentityClient>,
    pub mode: AuthnMode,
    /// Capability bucket consulted via `IdentityClient::grants_for` — the
    /// Fleet Manager's `FleetConfig::capability_name`.
    pub capability_name: String,
}

/// Resolved grants for the current request, inserted into request
/// extensions by [`authn_middleware`].
#[derive(Debug, Clone, Default)]
pub struct CallerGrants(pub Vec<Grant>);

/// Look the caller up by remote address, parse their grants, and either
/// reject or attach them to the request depending on `state.mode`.
///
/// If the request already carries [`CallerGrants`] — a test harness or an
/// upstream layer injecting a caller's grants directly — the lookup is
/// skipped and those grants are reused as-is.
///
/// An identity-lookup failure (`Error::IdentityLookup`), a malformed
/// capability bucket (`Error::CapabilityParse`), and an empty grant set
/// under `RequireCapability` (`Error::Forbidden`) all resolve to distinct
/// error variants, but every one of them denies the request.
pub async fn authn_middleware(
    State(state): State<AuthnState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Error> {
    let grants = if let Some(injected) = request.extensions().get::<CallerGrants>() {
        injected.0.clone()
    } else {
        let raw = state
            .identity
            .grants_for(remote, &state.capability_name)
            .await
            .map_err(Error::IdentityLookup)?;
        capability::parse_grants(&raw).map_err(Error::CapabilityParse)?
    };

    if grants.is_empty() && state.mode == AuthnMode::RequireCapability {
        return Err(Error::Forbidden(format!("no capability grants for {remote}")));
    }

    request.extensions_mut().insert(CallerGrants(grants));
    Ok(next.run(request).await)
}
