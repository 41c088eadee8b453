//! Capability Engine: parses grant JSON and evaluates view/deploy/admin/metrics
//! decisions against a target site name with glob-pattern site scoping.
//!
//! Pure and synchronous end to end — grants are small, request-lifetime
//! values, so there is nothing to cache and nothing to retry. Every function
//! here either returns an answer or, for malformed input, fails closed.

use serde::{Deserialize, Serialize};

/// Access level granted to an identity. Ordered `View < Deploy < Admin` for
/// site-scoped checks; `Metrics` is a separate, unscoped capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    View,
    Deploy,
    Admin,
    Metrics,
}

/// A single capability grant: an access level plus an optional set of
/// site-name glob patterns it applies to. An empty pattern list means "all
/// sites".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub access: Access,
    #[serde(default)]
    pub sites: Vec<String>,
}

impl Grant {
    /// Whether this grant's site pattern list matches `site`.
    ///
    /// An empty list matches every site. Otherwise a pattern matches if it
    /// equals `site` literally, or if it compiles as a glob and matches.
    /// Malformed patterns never match and never propagate an error — they
    /// fail closed.
    fn matches_site(&self, site: &str) -> bool {
        if self.sites.is_empty() {
            return true;
        }
        self.sites.iter().any(|pattern| {
            pattern == site || glob::Pattern::new(pattern).map(|p| p.matches(site)).unwrap_or(false)
        })
    }
}

/// Parse a JSON-encoded sequence of capability grants.
///
/// The wire format is `[{"access":"view|deploy|admin|metrics","sites":["<glob>", ...]}]`
/// with `sites` optional (defaulting to empty, i.e. "all sites").
pub fn parse_grants(raw: &str) -> Result<Vec<Grant>, String> {
    serde_json::from_str(raw).map_err(|e| format!("malformed capability grant: {e}"))
}

fn site_grants_at_least<'a, 'b>(grants: &'a [Grant], site: &'b str, min: Access) -> impl Iterator<Item = &'a Grant> + use<'a, 'b> {
    grants
        .iter()
        .filter(move |g| g.access != Access::Metrics && g.access >= min && g.matches_site(site))
}

/// An admin grant (scoped or unscoped) satisfies view, deploy, and admin
/// checks for any site it matches. A deploy grant satisfies deploy and view.
pub fn can_view(grants: &[Grant], site: &str) -> bool {
    site_grants_at_least(grants, site, Access::View).next().is_some()
}

pub fn can_deploy(grants: &[Grant], site: &str) -> bool {
    site_grants_at_least(grants, site, Access::Deploy).next().is_some()
}

/// Site deletion and site creation are admin-only operations.
pub fn can_delete_site(grants: &[Grant], site: &str) -> bool {
    is_admin(grants, site)
}

pub fn can_create_site(grants: &[Grant], name: &str) -> bool {
    is_admin(grants, name)
}

/// Any grant with access in {admin, metrics} permits scraping the metrics
/// endpoint; site scope is ignored for this check.
pub fn can_scrape_metrics(grants: &[Grant]) -> bool {
    grants.iter().any(|g| matches!(g.access, Access::Admin | Access::Metrics))
}

/// Any admin grant at all, scoped or unscoped.
pub fn has_admin_cap(grants: &[Grant]) -> bool {
    grants.iter().any(|g| g.access == Access::Admin)
}

/// An admin grant whose site list matches `site`.
pub fn is_admin(grants: &[Grant], site: &str) -> bool {
    grants.iter().any(|g| g.access == Access::Admin && g.matches_site(site))
}
