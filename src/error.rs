/// Errors surfaced to callers of the ledger and the typed stores.
///
/// Schema corrections (clamped ranges, forced-off highlights and similar) are
/// never reported here; they come back as [`crate::settings::Correction`]
/// entries on a successful update.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persistence medium could not be reached. Nothing was written.
    #[error("storage unavailable for '{key}': {source}")]
    StorageUnavailable {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Domain normalization produced nothing usable. Rejected before any write.
    #[error("invalid domain '{raw}': {reason}")]
    InvalidDomain { raw: String, reason: &'static str },

    /// The stored payload no longer decodes into its schema.
    #[error("record '{key}' could not be decoded: {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every write attempt lost a version race against another ledger instance.
    #[error("write to '{key}' lost {attempts} consecutive version races")]
    WriteConflict { key: String, attempts: u32 },
}

impl StoreError {
    pub(crate) fn unavailable(key: &str, source: anyhow::Error) -> Self {
        Self::StorageUnavailable {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_domain(raw: &str, reason: &'static str) -> Self {
        Self::InvalidDomain {
            raw: raw.to_string(),
            reason,
        }
    }

    /// True when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::WriteConflict { .. }
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
