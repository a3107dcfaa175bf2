use std::time::Duration;

use pastewords_contract::DEFAULT_MAX_CODE_LEN;
use thiserror::Error;

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_ALLOCATION_ATTEMPTS: u32 = 10;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy knobs for the broker. All of them come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLimits {
    pub max_payload_bytes: usize,
    pub max_code_len: usize,
    /// Random draws the allocator makes before giving up.
    pub allocation_attempts: u32,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Default for BrokerLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_code_len: DEFAULT_MAX_CODE_LEN,
            allocation_attempts: DEFAULT_ALLOCATION_ATTEMPTS,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl BrokerLimits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_payload_bytes == 0 {
            return Err(LimitsError::Zero("max_payload_bytes"));
        }
        if self.max_code_len == 0 {
            return Err(LimitsError::Zero("max_code_len"));
        }
        if self.allocation_attempts == 0 {
            return Err(LimitsError::Zero("allocation_attempts"));
        }
        if self.store_timeout.is_zero() {
            return Err(LimitsError::Zero("store_timeout"));
        }
        Ok(())
    }
}
