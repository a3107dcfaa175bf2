use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pastewords_contract::{TransferCode, TransferId, TransferRecord, TransferState};
use pastewords_storage::{MemoryTransferStore, StoreError, StoreResult, TransferStore};

/// Memory store with switchable faults around the writes `resolve` makes.
#[derive(Debug, Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryTransferStore,
    /// Delay after an applied `conditional_update` before it returns.
    ack_delay_ms: AtomicU64,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay_update_ack(&self, delay: Duration) {
        self.ack_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferStore for FaultyStore {
    async fn create_if_absent(&self, record: &TransferRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn get(&self, code: &TransferCode) -> StoreResult<Option<TransferRecord>> {
        self.inner.get(code).await
    }

    async fn conditional_update(
        &self,
        expected: TransferState,
        record: &TransferRecord,
    ) -> StoreResult<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update refused".to_string()));
        }
        let applied = self.inner.conditional_update(expected, record).await?;
        let delay = self.ack_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(applied)
    }

    async fn delete(&self, code: &TransferCode, transfer_id: TransferId) -> StoreResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delete refused".to_string()));
        }
        self.inner.delete(code, transfer_id).await
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.purge_stale(cutoff).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}
