//! Host canonicalization shared by list storage and admission.
//!
//! List entries and candidate URLs go through the same rules so that
//! `"HTTPS://Example.COM/"` and `"example.com"` compare equal. Hosts are
//! resolved with the WHATWG URL parser, the same one browsers navigate with,
//! so backslashes, numeric IPv4 forms and IDN hosts land on the host the
//! browser would actually visit.

use crate::error::{StoreError, StoreResult};
use std::net::{IpAddr, Ipv6Addr};
use url::{Host, ParseError, Url};

/// Canonical form of a user-entered domain: lowercase host only, no scheme,
/// userinfo, port, path, wildcard prefix or surrounding dots.
pub fn normalize_domain(raw: &str) -> StoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::invalid_domain(raw, "empty after normalization"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(StoreError::invalid_domain(raw, "contains whitespace"));
    }

    let bare = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    let Some(host) = extract_host(bare.trim_start_matches('.')) else {
        return Err(StoreError::invalid_domain(raw, "no valid host name"));
    };

    // `https://*.example.com` keeps its wildcard through URL parsing.
    let host = host.strip_prefix("*.").unwrap_or(&host).trim_matches('.');
    if host.is_empty() {
        return Err(StoreError::invalid_domain(raw, "empty after normalization"));
    }
    if host.parse::<IpAddr>().is_err() && host.split('.').any(str::is_empty) {
        return Err(StoreError::invalid_domain(raw, "contains an empty label"));
    }

    Ok(host.to_string())
}

/// Host part of a candidate URL, canonicalized like a list entry.
///
/// Accepts absolute URLs as well as bare `host[:port]/...`. Returns `None`
/// for anything without a usable host (`about:blank`, `mailto:`, empty or
/// malformed authority).
pub fn extract_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ip) = raw.parse::<Ipv6Addr>() {
        return Some(ip.to_string());
    }

    let parsed = match Url::parse(raw) {
        Ok(url) if looks_like_host_and_port(&url) => with_default_scheme(raw)?,
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => with_default_scheme(raw)?,
        Err(_) => return None,
    };

    match parsed.host()? {
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            (!domain.is_empty()).then_some(domain)
        }
    }
}

/// Exact or dot-boundary subdomain match: `shop.example.com` matches
/// `example.com`, `notexample.com` does not. IP literals only match exactly.
pub fn host_matches(host: &str, entry: &str) -> bool {
    if host == entry {
        return true;
    }
    if host.parse::<IpAddr>().is_ok() || entry.parse::<IpAddr>().is_ok() {
        return false;
    }
    host.strip_suffix(entry)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

/// `example.com:8080/x` parses as scheme `example.com` with an opaque path.
fn looks_like_host_and_port(url: &Url) -> bool {
    url.host().is_none()
        && url.cannot_be_a_base()
        && url
            .path()
            .split(['/', '?', '#'])
            .next()
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

fn with_default_scheme(raw: &str) -> Option<Url> {
    let absolute = if raw.starts_with(['/', '\\']) {
        format!("https:{raw}")
    } else {
        format!("https://{raw}")
    };
    Url::parse(&absolute).ok()
}
