use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pastewords_contract::{TransferCode, TransferId, TransferRecord, TransferState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt transfer row for code {code}: {reason}")]
    Corrupt { code: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {millis} ms")]
    Timeout { millis: u64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backing store for transfer records.
///
/// Every method either fully applies or has no effect. The conditional
/// methods report whether they matched instead of failing, so callers can
/// tell a lost race from a broken store.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert `record` unless a live record already holds its code.
    ///
    /// A row left in `Consumed` state counts as absent and is replaced.
    /// Returns `false` when another live record owns the code.
    async fn create_if_absent(&self, record: &TransferRecord) -> StoreResult<bool>;

    /// Point lookup by normalized code. May return a `Consumed` leftover;
    /// callers decide how to treat it.
    async fn get(&self, code: &TransferCode) -> StoreResult<Option<TransferRecord>>;

    /// Replace the stored record with `record` iff the stored one has the
    /// same code and `transfer_id` and is currently in `expected`.
    async fn conditional_update(
        &self,
        expected: TransferState,
        record: &TransferRecord,
    ) -> StoreResult<bool>;

    /// Remove the record for `code` iff it still carries `transfer_id`.
    async fn delete(&self, code: &TransferCode, transfer_id: TransferId) -> StoreResult<bool>;

    /// Remove `Empty` records created before `cutoff` and every `Consumed`
    /// leftover. `Filled` records are never touched.
    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;
}
