//! Pre-flight SSRF defense: reject destinations that resolve to a private,
//! loopback, link-local, or CGNAT IP literal before any connection attempt.
//!
//! Hostnames that aren't already IP literals are permitted — DNS rebinding
//! at connect time is a known gap the design notes call out rather than
//! solve here.

use std::net::IpAddr;

/// Check `url`'s host. Returns `Err("private address: <host>")` if the host
/// is an IP literal in a disallowed range.
pub fn check_not_private(url: &reqwest::Url) -> Result<(), String> {
    let host = url.host_str().ok_or_else(|| "missing host".to_string())?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_or_reserved(ip) {
            return Err(format!("private address: {host}"));
        }
    }
    Ok(())
}

fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || (v4.octets()[0] == 100 && (64..=127).contains(&v4.octets()[1])) // 100.64/10 CGNAT
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7
        }
    }
}
