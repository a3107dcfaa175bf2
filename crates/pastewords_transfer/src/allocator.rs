use std::{sync::Arc, time::Duration};

use pastewords_contract::TransferRecord;
use pastewords_storage::TransferStore;
use tracing::{debug, info, warn};

use crate::{error::BrokerError, lifecycle::bounded, limits::BrokerLimits, words::WordPool};

/// Reserves unused codes by drawing random words and claiming them with
/// the store's create-if-absent primitive.
#[derive(Clone)]
pub struct CodeAllocator {
    pool: Arc<WordPool>,
    store: Arc<dyn TransferStore>,
    attempts: u32,
    store_timeout: Duration,
}

impl CodeAllocator {
    pub fn new(pool: Arc<WordPool>, store: Arc<dyn TransferStore>, limits: &BrokerLimits) -> Self {
        Self {
            pool,
            store,
            attempts: limits.allocation_attempts,
            store_timeout: limits.store_timeout,
        }
    }

    /// Reserve a fresh `Empty` record under a random unused code.
    pub async fn allocate(&self) -> Result<TransferRecord, BrokerError> {
        for attempt in 1..=self.attempts {
            let code = {
                let mut rng = rand::thread_rng();
                self.pool.choose(&mut rng).clone()
            };
            let record = TransferRecord::reserve(code);

            if bounded(self.store_timeout, self.store.create_if_absent(&record)).await? {
                info!(transfer_id = %record.transfer_id, attempt, "code reserved");
                debug!(code = %record.code, "reserved code");
                return Ok(record);
            }
            debug!(attempt, "code collision, drawing again");
        }

        warn!(
            attempts = self.attempts,
            pool_size = self.pool.len(),
            "code allocation exhausted"
        );
        Err(BrokerError::PoolExhausted {
            attempts: self.attempts,
        })
    }
}
