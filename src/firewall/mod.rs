//! Navigation firewall: persisted allow/deny lists plus the admission check.
//!
//! Every list mutation runs as one atomic ledger write. Adding a domain to one
//! list removes it from the other in that same write, so no caller can ever
//! observe a domain in both lists.

pub mod admission;
pub mod domain;

pub use admission::{decide, DenyReason, Verdict};
pub use domain::{extract_host, host_matches, normalize_domain};

use crate::bus::{ChangeBus, ChangeEvent, SubscriptionGuard, SubscriptionHandle};
use crate::error::{StoreError, StoreResult};
use crate::ledger::{Ledger, Record};
use crate::settings::{Correction, Schema, SettingsStore, UpdateOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FirewallPolicy {
    /// Enforce the lists. When off, every URL is admitted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Normalized domains; insertion order is kept.
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for FirewallPolicy {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            allow_list: Vec::new(),
            deny_list: Vec::new(),
        }
    }
}

impl FirewallPolicy {
    pub fn decide(&self, candidate_url: &str) -> Verdict {
        admission::decide(self, candidate_url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl Record for FirewallPolicy {
    const KEY: &'static str = "firewall";
}

impl Schema for FirewallPolicy {
    type Patch = FirewallPatch;

    fn apply(&mut self, patch: &FirewallPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }

    /// Re-normalize entries, drop duplicates and unusable ones, and resolve any
    /// domain present in both lists in favour of the deny list.
    fn normalize(&mut self) -> Vec<Correction> {
        let mut corrections = Vec::new();
        self.deny_list = canonical_list(&self.deny_list, "deny_list", &mut corrections);
        let allow = canonical_list(&self.allow_list, "allow_list", &mut corrections);

        let denied: HashSet<&str> = self.deny_list.iter().map(String::as_str).collect();
        self.allow_list = allow
            .into_iter()
            .filter(|entry| {
                let overlap = denied.contains(entry.as_str());
                if overlap {
                    corrections.push(Correction::new(
                        "allow_list",
                        entry,
                        "removed; also present in deny_list",
                    ));
                }
                !overlap
            })
            .collect();

        corrections
    }
}

fn canonical_list(
    entries: &[String],
    field: &'static str,
    corrections: &mut Vec<Correction>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for raw in entries {
        match normalize_domain(raw) {
            Ok(entry) => {
                if entry != *raw {
                    corrections.push(Correction::new(field, &entry, "normalized"));
                }
                if seen.insert(entry.clone()) {
                    out.push(entry);
                } else {
                    corrections.push(Correction::new(field, entry, "duplicate dropped"));
                }
            }
            Err(_) => corrections.push(Correction::new(field, raw, "invalid entry dropped")),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Allow,
    Deny,
}

impl ListKind {
    fn add(self, policy: &mut FirewallPolicy, domain: &str) {
        let (target, other) = match self {
            Self::Allow => (&mut policy.allow_list, &mut policy.deny_list),
            Self::Deny => (&mut policy.deny_list, &mut policy.allow_list),
        };
        other.retain(|entry| entry != domain);
        if !target.iter().any(|entry| entry == domain) {
            target.push(domain.to_string());
        }
    }

    fn remove(self, policy: &mut FirewallPolicy, domain: &str) {
        let target = match self {
            Self::Allow => &mut policy.allow_list,
            Self::Deny => &mut policy.deny_list,
        };
        target.retain(|entry| entry != domain);
    }
}

/// Persistence and mutation semantics for the [`FirewallPolicy`] record.
#[derive(Clone)]
pub struct FirewallPolicyStore {
    inner: SettingsStore<FirewallPolicy>,
}

impl FirewallPolicyStore {
    pub fn new(ledger: Arc<Ledger>, bus: Arc<ChangeBus>) -> Self {
        Self {
            inner: SettingsStore::new(ledger, bus),
        }
    }

    /// Current policy. A stored record that predates current normalization
    /// rules is returned in canonical form; the record itself is not rewritten.
    pub async fn get_firewall(&self) -> StoreResult<FirewallPolicy> {
        let mut policy = self.inner.get_settings().await?;
        let corrections = policy.normalize();
        if !corrections.is_empty() {
            tracing::debug!(
                corrections = corrections.len(),
                "Stored firewall policy re-normalized on load"
            );
        }
        Ok(policy)
    }

    /// Toggle enforcement. Lists are left untouched.
    pub async fn update_firewall(
        &self,
        patch: FirewallPatch,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        self.inner.update_settings(patch).await
    }

    pub async fn add_to_allow_list(
        &self,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        self.add(ListKind::Allow, raw_domain).await
    }

    pub async fn add_to_deny_list(
        &self,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        self.add(ListKind::Deny, raw_domain).await
    }

    pub async fn remove_from_allow_list(
        &self,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        self.remove(ListKind::Allow, raw_domain).await
    }

    pub async fn remove_from_deny_list(
        &self,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        self.remove(ListKind::Deny, raw_domain).await
    }

    /// Admission check against the current policy.
    pub async fn check(&self, candidate_url: &str) -> StoreResult<Verdict> {
        Ok(self.get_firewall().await?.decide(candidate_url))
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(callback)
    }

    pub fn subscribe_scoped<F>(&self, callback: F) -> SubscriptionGuard
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_scoped(callback)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.inner.unsubscribe(handle);
    }

    async fn add(
        &self,
        kind: ListKind,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        // Rejected before any write.
        let domain = normalize_domain(raw_domain)?;
        self.inner
            .modify(move |policy| kind.add(policy, &domain))
            .await
    }

    async fn remove(
        &self,
        kind: ListKind,
        raw_domain: &str,
    ) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        let domain = match normalize_domain(raw_domain) {
            Ok(domain) => domain,
            // Nothing that fails normalization can be in a list.
            Err(StoreError::InvalidDomain { .. }) => return self.unchanged().await,
            Err(err) => return Err(err),
        };
        self.inner
            .modify(move |policy| kind.remove(policy, &domain))
            .await
    }

    async fn unchanged(&self) -> StoreResult<UpdateOutcome<FirewallPolicy>> {
        let record = self.inner.get_record().await?;
        let mut value = record.value;
        value.normalize();
        Ok(UpdateOutcome {
            value,
            version: record.version,
            corrections: Vec::new(),
            changed: false,
        })
    }
}
