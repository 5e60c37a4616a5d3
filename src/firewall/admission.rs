//! Pure admission decisions over a policy snapshot.

use super::domain::{extract_host, host_matches};
use super::FirewallPolicy;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Admit,
    Deny(DenyReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    /// Host matched this deny-list entry.
    DenyListed { entry: String },
    /// Allow-list is non-empty and no entry matched.
    NotAllowListed,
    /// No host could be extracted from the candidate.
    UnparseableUrl,
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_admitted()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admit => f.write_str("admit"),
            Self::Deny(DenyReason::DenyListed { entry }) => {
                write!(f, "deny (matches deny-list entry '{entry}')")
            }
            Self::Deny(DenyReason::NotAllowListed) => f.write_str("deny (not in allow-list)"),
            Self::Deny(DenyReason::UnparseableUrl) => f.write_str("deny (no host in URL)"),
        }
    }
}

/// Decide whether `candidate_url` may be visited under `policy`.
///
/// A disabled policy admits everything. Otherwise the deny-list is consulted
/// first and always wins; an empty allow-list admits anything not denied.
pub fn decide(policy: &FirewallPolicy, candidate_url: &str) -> Verdict {
    if !policy.enabled {
        return Verdict::Admit;
    }

    let Some(host) = extract_host(candidate_url) else {
        tracing::debug!(url = candidate_url, "Admission denied: no host");
        return Verdict::Deny(DenyReason::UnparseableUrl);
    };

    if let Some(entry) = policy
        .deny_list
        .iter()
        .find(|entry| host_matches(&host, entry))
    {
        tracing::debug!(host = %host, entry = %entry, "Admission denied: deny-listed");
        return Verdict::Deny(DenyReason::DenyListed {
            entry: entry.clone(),
        });
    }

    if policy.allow_list.is_empty()
        || policy
            .allow_list
            .iter()
            .any(|entry| host_matches(&host, entry))
    {
        return Verdict::Admit;
    }

    tracing::debug!(host = %host, "Admission denied: not allow-listed");
    Verdict::Deny(DenyReason::NotAllowListed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool, allow: &[&str], deny: &[&str]) -> FirewallPolicy {
        FirewallPolicy {
            enabled,
            allow_list: allow.iter().map(ToString::to_string).collect(),
            deny_list: deny.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn deny_overrides_allow_for_subdomain() {
        let p = policy(true, &["example.com"], &["shop.example.com"]);
        assert_eq!(
            decide(&p, "https://shop.example.com/cart"),
            Verdict::Deny(DenyReason::DenyListed {
                entry: "shop.example.com".into()
            })
        );
        assert_eq!(decide(&p, "https://example.com/"), Verdict::Admit);
        assert_eq!(
            decide(&p, "https://other.com/"),
            Verdict::Deny(DenyReason::NotAllowListed)
        );
    }

    #[test]
    fn disabled_policy_admits_deny_listed_hosts() {
        let p = policy(false, &[], &["evil.com"]);
        assert!(decide(&p, "https://evil.com").is_admitted());
        assert!(decide(&p, "about:blank").is_admitted());
    }

    #[test]
    fn empty_allow_list_admits_everything_not_denied() {
        let p = policy(true, &[], &["evil.com"]);
        assert!(decide(&p, "https://good.org/x").is_admitted());
        assert!(decide(&p, "https://cdn.evil.com/x").is_denied());
    }

    #[test]
    fn suffix_match_needs_dot_boundary() {
        let p = policy(true, &["example.com"], &[]);
        assert!(decide(&p, "https://notexample.com").is_denied());
        assert!(decide(&p, "https://a.example.com").is_admitted());
    }

    #[test]
    fn candidate_is_normalized_like_entries() {
        let p = policy(true, &[], &["example.com"]);
        assert!(decide(&p, "HTTPS://EXAMPLE.COM:443/").is_denied());
        assert!(decide(&p, "example.com").is_denied());
    }

    #[test]
    fn hostless_url_is_denied_when_enabled() {
        let p = policy(true, &[], &[]);
        assert_eq!(
            decide(&p, "about:blank"),
            Verdict::Deny(DenyReason::UnparseableUrl)
        );
    }

    #[test]
    fn verdict_serializes_with_reason_tag() {
        let json = serde_json::to_value(Verdict::Deny(DenyReason::DenyListed {
            entry: "evil.com".into(),
        }))
        .unwrap();
        assert_eq!(json["verdict"], "deny");
        assert_eq!(json["reason"], "deny_listed");
        assert_eq!(json["entry"], "evil.com");
    }
}
