use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pastewords_contract::{TransferCode, TransferId, TransferRecord, TransferState};

use crate::store::{StoreError, StoreResult, TransferStore};

/// Process-local store. Each operation runs under one mutex acquisition,
/// which gives the same all-or-nothing semantics as the SQLite statements.
#[derive(Debug, Default)]
pub struct MemoryTransferStore {
    records: Mutex<HashMap<TransferCode, TransferRecord>>,
    offline: AtomicBool,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until
    /// switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> StoreResult<MutexGuard<'_, HashMap<TransferCode, TransferRecord>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn create_if_absent(&self, record: &TransferRecord) -> StoreResult<bool> {
        let mut records = self.records()?;
        match records.get(&record.code) {
            Some(existing) if existing.is_live() => Ok(false),
            _ => {
                records.insert(record.code.clone(), record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, code: &TransferCode) -> StoreResult<Option<TransferRecord>> {
        Ok(self.records()?.get(code).cloned())
    }

    async fn conditional_update(
        &self,
        expected: TransferState,
        record: &TransferRecord,
    ) -> StoreResult<bool> {
        let mut records = self.records()?;
        match records.get_mut(&record.code) {
            Some(stored)
                if stored.transfer_id == record.transfer_id && stored.state == expected =>
            {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, code: &TransferCode, transfer_id: TransferId) -> StoreResult<bool> {
        let mut records = self.records()?;
        let matches = records
            .get(code)
            .is_some_and(|stored| stored.transfer_id == transfer_id);
        if matches {
            records.remove(code);
        }
        Ok(matches)
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|_, record| match record.state {
            TransferState::Consumed => false,
            TransferState::Empty => record.created_at >= cutoff,
            TransferState::Filled => true,
        });
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.records().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastewords_contract::Payload;

    fn code(raw: &str) -> TransferCode {
        TransferCode::parse(raw, 16).expect("code")
    }

    fn payload() -> Payload {
        Payload {
            file_name: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn live_code_is_not_recreated() {
        let store = MemoryTransferStore::new();
        let first = TransferRecord::reserve(code("willow"));
        assert!(store.create_if_absent(&first).await.unwrap());
        assert!(!store
            .create_if_absent(&TransferRecord::reserve(code("willow")))
            .await
            .unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn consumed_code_can_be_recreated() {
        let store = MemoryTransferStore::new();
        let first = TransferRecord::reserve(code("willow"));
        store.create_if_absent(&first).await.unwrap();
        let filled = first.fill(payload());
        store
            .conditional_update(TransferState::Empty, &filled)
            .await
            .unwrap();
        store
            .conditional_update(TransferState::Filled, &filled.consume())
            .await
            .unwrap();

        let second = TransferRecord::reserve(code("willow"));
        assert!(store.create_if_absent(&second).await.unwrap());
        let loaded = store.get(&code("willow")).await.unwrap().unwrap();
        assert_eq!(loaded.transfer_id, second.transfer_id);
    }

    #[tokio::test]
    async fn delete_checks_transfer_id() {
        let store = MemoryTransferStore::new();
        let record = TransferRecord::reserve(code("willow"));
        store.create_if_absent(&record).await.unwrap();

        assert!(!store
            .delete(&code("willow"), TransferRecord::reserve(code("willow")).transfer_id)
            .await
            .unwrap());
        assert!(store.delete(&code("willow"), record.transfer_id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryTransferStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        store.ping().await.unwrap();
    }
}
