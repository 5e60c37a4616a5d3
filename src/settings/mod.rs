//! Typed settings stores over the ledger.
//!
//! A [`SettingsStore`] owns one [`Schema`]: it merges partial updates into the
//! current value, lets the schema correct any cross-field invariant in the same
//! atomic write, publishes the change, and hands back the authoritative result.
//!
//! Callers that optimistically applied only their raw patch to a local copy
//! must reconcile against [`UpdateOutcome`] (or re-read with
//! [`SettingsStore::get_settings`]) once the call settles. The store never
//! pushes a corrected value to a caller on its own, because the correction may
//! differ from what was requested.

pub mod analytics;
pub mod general;

pub use analytics::{AnalyticsSettings, AnalyticsSettingsPatch};
pub use general::{GeneralSettings, GeneralSettingsPatch};

use crate::bus::{ChangeBus, ChangeEvent, SubscriptionGuard, SubscriptionHandle};
use crate::error::{StoreError, StoreResult};
use crate::ledger::{ConfigRecord, Ledger, Record};
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// A settings payload with its own patch type and invariants.
pub trait Schema: Record {
    /// Partial update; `None` fields leave the current value alone.
    type Patch: Debug + Clone + Send + Sync + 'static;

    /// Merge `patch` into `self` verbatim.
    fn apply(&mut self, patch: &Self::Patch);

    /// Bring `self` back inside the schema's invariants.
    fn normalize(&mut self) -> Vec<Correction> {
        Vec::new()
    }
}

/// A silent adjustment made to keep a value inside its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub field: &'static str,
    pub applied: String,
    pub reason: &'static str,
}

impl Correction {
    pub fn new(field: &'static str, applied: impl ToString, reason: &'static str) -> Self {
        Self {
            field,
            applied: applied.to_string(),
            reason,
        }
    }
}

/// Authoritative state after an update settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome<S> {
    pub value: S,
    pub version: u64,
    /// Adjustments made on top of the requested patch.
    pub corrections: Vec<Correction>,
    /// `false` when the update was a no-op and nothing was written.
    pub changed: bool,
}

impl<S: Clone + PartialEq> UpdateOutcome<S> {
    pub fn was_corrected(&self) -> bool {
        !self.corrections.is_empty()
    }

    /// Replace an optimistic local copy with the stored value.
    /// Returns `true` if the local copy was out of date.
    pub fn reconcile(&self, local: &mut S) -> bool {
        if *local == self.value {
            return false;
        }
        *local = self.value.clone();
        true
    }
}

pub struct SettingsStore<S> {
    ledger: Arc<Ledger>,
    bus: Arc<ChangeBus>,
    _schema: PhantomData<fn() -> S>,
}

impl<S> Clone for SettingsStore<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            bus: Arc::clone(&self.bus),
            _schema: PhantomData,
        }
    }
}

impl<S: Schema> SettingsStore<S> {
    pub fn new(ledger: Arc<Ledger>, bus: Arc<ChangeBus>) -> Self {
        Self {
            ledger,
            bus,
            _schema: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        S::KEY
    }

    pub async fn get_settings(&self) -> StoreResult<S> {
        Ok(self.ledger.get::<S>().await?.value)
    }

    pub async fn get_record(&self) -> StoreResult<ConfigRecord<S>> {
        self.ledger.get::<S>().await
    }

    pub async fn update_settings(&self, patch: S::Patch) -> StoreResult<UpdateOutcome<S>> {
        self.modify(move |value| value.apply(&patch)).await
    }

    /// Run an arbitrary edit under the ledger's per-key atomicity, normalize,
    /// persist and publish.
    ///
    /// The write and its publish run on a spawned task. Dropping the returned
    /// future detaches that task instead of cancelling it, so a write the
    /// medium may already have committed is still announced to subscribers.
    pub(crate) async fn modify<F>(&self, edit: F) -> StoreResult<UpdateOutcome<S>>
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(commit_and_publish(ledger, bus, edit))
            .await
            .map_err(|error| {
                StoreError::unavailable(
                    S::KEY,
                    anyhow::Error::new(error).context("settings write task failed"),
                )
            })?
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(S::KEY, callback)
    }

    pub fn subscribe_scoped<F>(&self, callback: F) -> SubscriptionGuard
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe_scoped(S::KEY, callback)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }
}

async fn commit_and_publish<S, F>(
    ledger: Arc<Ledger>,
    bus: Arc<ChangeBus>,
    mut edit: F,
) -> StoreResult<UpdateOutcome<S>>
where
    S: Schema,
    F: FnMut(&mut S) + Send,
{
    // The mutator may re-run after a lost race; keep only the last run's corrections.
    let mut corrections = Vec::new();
    let result = ledger
        .put(|mut value: S| {
            edit(&mut value);
            corrections = value.normalize();
            value
        })
        .await?;

    if result.changed {
        if !corrections.is_empty() {
            tracing::debug!(
                key = S::KEY,
                corrections = corrections.len(),
                "Settings update corrected to satisfy schema invariants"
            );
        }
        bus.publish(S::KEY, result.record.version);
    } else {
        corrections.clear();
    }

    Ok(UpdateOutcome {
        value: result.record.value,
        version: result.record.version,
        corrections,
        changed: result.changed,
    })
}
