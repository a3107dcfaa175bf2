use std::{future::Future, sync::Arc, time::Duration};

use pastewords_contract::{Payload, TransferCode, TransferRecord, TransferState};
use pastewords_storage::{StoreError, TransferStore};
use tracing::{debug, info, warn};

use crate::{error::BrokerError, limits::BrokerLimits};

/// Drives records through `Empty -> Filled -> Consumed`.
///
/// Each edge is taken with a single conditional write, so of any number of
/// concurrent callers racing on one record exactly one wins the edge.
#[derive(Clone)]
pub struct TransferLifecycle {
    store: Arc<dyn TransferStore>,
    max_payload_bytes: usize,
    store_timeout: Duration,
}

impl TransferLifecycle {
    pub fn new(store: Arc<dyn TransferStore>, limits: &BrokerLimits) -> Self {
        Self {
            store,
            max_payload_bytes: limits.max_payload_bytes,
            store_timeout: limits.store_timeout,
        }
    }

    /// Attach `payload` to the `Empty` record currently holding `code`.
    pub async fn attach(
        &self,
        code: &TransferCode,
        payload: Payload,
    ) -> Result<TransferRecord, BrokerError> {
        self.check_size(&payload)?;
        let current = bounded(self.store_timeout, self.store.get(code))
            .await?
            .ok_or(BrokerError::NotFound)?;
        self.fill(current, payload).await
    }

    /// Attach `payload` to a record the caller reserved itself. Fails with
    /// `NotFound` if that exact record is no longer in the store.
    pub async fn attach_reserved(
        &self,
        reserved: &TransferRecord,
        payload: Payload,
    ) -> Result<TransferRecord, BrokerError> {
        self.check_size(&payload)?;
        self.fill(reserved.clone(), payload).await
    }

    /// Hand out the payload for `code` and retire the record.
    ///
    /// The `Filled -> Consumed` write is what grants delivery; the physical
    /// delete afterwards is cleanup and its failure is only logged.
    pub async fn resolve(&self, code: &TransferCode) -> Result<Payload, BrokerError> {
        let current = bounded(self.store_timeout, self.store.get(code))
            .await?
            .ok_or(BrokerError::NotFound)?;

        match current.state {
            TransferState::Empty => return Err(BrokerError::NotReady),
            TransferState::Consumed => return Err(BrokerError::NotFound),
            TransferState::Filled => {}
        }

        let consumed = current.consume();
        let won = match bounded(
            self.store_timeout,
            self.store.conditional_update(TransferState::Filled, &consumed),
        )
        .await
        {
            Ok(won) => won,
            Err(error) => self.confirm_consumed(&consumed, error).await?,
        };
        if !won {
            debug!(transfer_id = %current.transfer_id, "lost resolve race");
            return Err(BrokerError::NotFound);
        }

        let transfer_id = current.transfer_id;
        let payload = current.payload.ok_or_else(|| {
            BrokerError::Store(StoreError::Corrupt {
                code: code.to_string(),
                reason: "filled record without payload".to_string(),
            })
        })?;

        match bounded(self.store_timeout, self.store.delete(code, transfer_id)).await {
            Ok(_) => {}
            Err(error) => {
                warn!(%transfer_id, %error, "consumed record left for sweeper");
            }
        }

        info!(%transfer_id, size_bytes = payload.size_bytes(), "transfer delivered");
        Ok(payload)
    }

    /// The consuming write failed or timed out but may still have been
    /// applied. Only our own `Consumed` successor (same id, same update
    /// stamp) counts as a win; anything else returns the original error.
    async fn confirm_consumed(
        &self,
        consumed: &TransferRecord,
        error: BrokerError,
    ) -> Result<bool, BrokerError> {
        match bounded(self.store_timeout, self.store.get(&consumed.code)).await {
            Ok(Some(stored))
                if stored.transfer_id == consumed.transfer_id
                    && stored.state == TransferState::Consumed
                    && stored.updated_at == consumed.updated_at =>
            {
                warn!(
                    transfer_id = %consumed.transfer_id,
                    %error,
                    "consume applied despite store error"
                );
                Ok(true)
            }
            _ => Err(error),
        }
    }

    /// Best-effort removal of a record whose sender gave up.
    pub async fn abandon(&self, record: &TransferRecord) -> Result<bool, BrokerError> {
        let removed = bounded(
            self.store_timeout,
            self.store.delete(&record.code, record.transfer_id),
        )
        .await?;
        if removed {
            info!(transfer_id = %record.transfer_id, "abandoned transfer removed");
        }
        Ok(removed)
    }

    fn check_size(&self, payload: &Payload) -> Result<(), BrokerError> {
        let size = payload.size_bytes();
        if size > self.max_payload_bytes {
            return Err(BrokerError::TooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        Ok(())
    }

    async fn fill(
        &self,
        current: TransferRecord,
        payload: Payload,
    ) -> Result<TransferRecord, BrokerError> {
        match current.state {
            TransferState::Empty => {}
            TransferState::Filled => return Err(BrokerError::AlreadyFilled),
            TransferState::Consumed => return Err(BrokerError::NotFound),
        }

        let filled = current.fill(payload);
        let won = bounded(
            self.store_timeout,
            self.store.conditional_update(TransferState::Empty, &filled),
        )
        .await?;
        if won {
            info!(
                transfer_id = %filled.transfer_id,
                size_bytes = filled.size_bytes(),
                "transfer filled"
            );
            return Ok(filled);
        }

        // Someone else moved the record first; report what they left behind.
        let now = bounded(self.store_timeout, self.store.get(&current.code)).await?;
        match now {
            Some(record)
                if record.transfer_id == current.transfer_id
                    && record.state == TransferState::Filled =>
            {
                Err(BrokerError::AlreadyFilled)
            }
            _ => Err(BrokerError::NotFound),
        }
    }
}

/// Run a store call under the configured deadline.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(BrokerError::from),
        Err(_) => Err(BrokerError::Store(StoreError::Timeout {
            millis: limit.as_millis() as u64,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FaultyStore;
    use pastewords_storage::MemoryTransferStore;

    fn code(raw: &str) -> TransferCode {
        TransferCode::parse(raw, 10).unwrap()
    }

    fn payload(bytes: &[u8]) -> Payload {
        Payload {
            file_name: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    async fn reserved(store: &Arc<MemoryTransferStore>, raw: &str) -> TransferRecord {
        let record = TransferRecord::reserve(code(raw));
        assert!(store.create_if_absent(&record).await.unwrap());
        record
    }

    fn lifecycle(store: &Arc<MemoryTransferStore>, max: usize) -> TransferLifecycle {
        TransferLifecycle::new(
            store.clone(),
            &BrokerLimits {
                max_payload_bytes: max,
                ..BrokerLimits::default()
            },
        )
    }

    #[tokio::test]
    async fn attach_unknown_code_is_not_found() {
        let store = Arc::new(MemoryTransferStore::new());
        let err = lifecycle(&store, 64)
            .attach(&code("nobody"), payload(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound));
    }

    #[tokio::test]
    async fn attach_rejects_oversized_payload_without_writing() {
        let store = Arc::new(MemoryTransferStore::new());
        let record = reserved(&store, "acorn").await;

        let err = lifecycle(&store, 4)
            .attach(&code("acorn"), payload(b"too big"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TooLarge { size: 7, limit: 4 }));

        let stored = store.get(&record.code).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::Empty);
    }

    #[tokio::test]
    async fn second_attach_is_already_filled() {
        let store = Arc::new(MemoryTransferStore::new());
        reserved(&store, "acorn").await;
        let lifecycle = lifecycle(&store, 64);

        lifecycle.attach(&code("acorn"), payload(b"one")).await.unwrap();
        let err = lifecycle
            .attach(&code("acorn"), payload(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyFilled));

        let delivered = lifecycle.resolve(&code("acorn")).await.unwrap();
        assert_eq!(delivered.bytes, b"one");
    }

    #[tokio::test]
    async fn attach_reserved_with_stale_record_is_already_filled() {
        let store = Arc::new(MemoryTransferStore::new());
        let record = reserved(&store, "acorn").await;
        let lifecycle = lifecycle(&store, 64);

        lifecycle.attach_reserved(&record, payload(b"one")).await.unwrap();
        let err = lifecycle
            .attach_reserved(&record, payload(b"two"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyFilled));
    }

    #[tokio::test]
    async fn resolve_empty_record_is_not_ready() {
        let store = Arc::new(MemoryTransferStore::new());
        reserved(&store, "acorn").await;

        let err = lifecycle(&store, 64)
            .resolve(&code("acorn"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotReady));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn resolve_delivers_once_and_removes_record() {
        let store = Arc::new(MemoryTransferStore::new());
        reserved(&store, "acorn").await;
        let lifecycle = lifecycle(&store, 64);
        lifecycle.attach(&code("acorn"), payload(b"data")).await.unwrap();

        let delivered = lifecycle.resolve(&code("acorn")).await.unwrap();
        assert_eq!(delivered, payload(b"data"));
        assert!(store.is_empty());

        let err = lifecycle.resolve(&code("acorn")).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound));
    }

    #[tokio::test]
    async fn consumed_leftover_is_treated_as_gone() {
        let store = Arc::new(MemoryTransferStore::new());
        let record = reserved(&store, "acorn").await;
        let filled = record.fill(payload(b"data"));
        store
            .conditional_update(TransferState::Empty, &filled)
            .await
            .unwrap();
        store
            .conditional_update(TransferState::Filled, &filled.consume())
            .await
            .unwrap();

        let lifecycle = lifecycle(&store, 64);
        assert!(matches!(
            lifecycle.resolve(&code("acorn")).await,
            Err(BrokerError::NotFound)
        ));
        assert!(matches!(
            lifecycle.attach(&code("acorn"), payload(b"x")).await,
            Err(BrokerError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_deliver_exactly_once() {
        let store = Arc::new(MemoryTransferStore::new());
        reserved(&store, "acorn").await;
        let lifecycle = lifecycle(&store, 64);
        lifecycle.attach(&code("acorn"), payload(b"data")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                lifecycle.resolve(&code("acorn")).await
            }));
        }

        let mut delivered = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => delivered += 1,
                Err(BrokerError::NotFound) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(delivered, 1);
    }

    fn faulty_lifecycle(store: &Arc<FaultyStore>, store_timeout: Duration) -> TransferLifecycle {
        TransferLifecycle::new(
            store.clone(),
            &BrokerLimits {
                store_timeout,
                ..BrokerLimits::default()
            },
        )
    }

    #[tokio::test]
    async fn late_acknowledged_consume_still_delivers() {
        let store = Arc::new(FaultyStore::new());
        let lifecycle = faulty_lifecycle(&store, Duration::from_millis(50));
        let record = TransferRecord::reserve(code("acorn"));
        store.create_if_absent(&record).await.unwrap();
        lifecycle.attach(&code("acorn"), payload(b"data")).await.unwrap();

        store.delay_update_ack(Duration::from_millis(200));
        let delivered = lifecycle.resolve(&code("acorn")).await.unwrap();
        assert_eq!(delivered.bytes, b"data");

        store.delay_update_ack(Duration::ZERO);
        assert!(matches!(
            lifecycle.resolve(&code("acorn")).await,
            Err(BrokerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn unapplied_consume_keeps_file_for_retry() {
        let store = Arc::new(FaultyStore::new());
        let lifecycle = faulty_lifecycle(&store, Duration::from_secs(5));
        let record = TransferRecord::reserve(code("acorn"));
        store.create_if_absent(&record).await.unwrap();
        lifecycle.attach(&code("acorn"), payload(b"data")).await.unwrap();

        store.fail_updates(true);
        let err = lifecycle.resolve(&code("acorn")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Store(StoreError::Unavailable(_))));
        assert!(err.is_retryable());
        let stored = store.get(&code("acorn")).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::Filled);

        store.fail_updates(false);
        assert_eq!(lifecycle.resolve(&code("acorn")).await.unwrap().bytes, b"data");
    }

    #[tokio::test]
    async fn failed_delete_still_delivers_and_retires_code() {
        let store = Arc::new(FaultyStore::new());
        let lifecycle = faulty_lifecycle(&store, Duration::from_secs(5));
        let record = TransferRecord::reserve(code("acorn"));
        store.create_if_absent(&record).await.unwrap();
        lifecycle.attach(&code("acorn"), payload(b"data")).await.unwrap();

        store.fail_deletes(true);
        assert_eq!(lifecycle.resolve(&code("acorn")).await.unwrap().bytes, b"data");

        let leftover = store.get(&code("acorn")).await.unwrap().unwrap();
        assert_eq!(leftover.state, TransferState::Consumed);
        assert!(leftover.payload.is_none());
        assert!(matches!(
            lifecycle.resolve(&code("acorn")).await,
            Err(BrokerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn abandon_removes_only_matching_record() {
        let store = Arc::new(MemoryTransferStore::new());
        let record = reserved(&store, "acorn").await;
        let lifecycle = lifecycle(&store, 64);

        let stranger = TransferRecord::reserve(code("acorn"));
        assert!(!lifecycle.abandon(&stranger).await.unwrap());
        assert!(lifecycle.abandon(&record).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_store_error() {
        let store = Arc::new(MemoryTransferStore::new());
        store.set_offline(true);
        let err = lifecycle(&store, 64)
            .resolve(&code("acorn"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn bounded_maps_elapsed_deadline_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_millis(5), slow).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Store(StoreError::Timeout { millis: 5 })
        ));
    }
}
