use pastewords_contract::CodeError;
use pastewords_storage::StoreError;
use thiserror::Error;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any store mutation.
    Validation,
    /// No code could be handed out.
    Allocation,
    NotFound,
    /// The code exists but the sender has not attached a file yet.
    NotReady,
    /// The call contradicts the record's lifecycle.
    Conflict,
    Store,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("payload is {size} bytes (limit: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("invalid code: {0}")]
    InvalidCode(#[from] CodeError),

    #[error("invalid content type {content_type:?}")]
    InvalidContentType { content_type: String },

    #[error("this session has already sent a file")]
    SessionSpent,

    #[error("no free code found after {attempts} attempts")]
    PoolExhausted { attempts: u32 },

    #[error("no transfer found for this code")]
    NotFound,

    #[error("the file for this code has not been uploaded yet")]
    NotReady,

    #[error("a file is already attached to this code")]
    AlreadyFilled,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::TooLarge { .. }
            | BrokerError::InvalidCode(_)
            | BrokerError::InvalidContentType { .. } => ErrorKind::Validation,
            BrokerError::PoolExhausted { .. } => ErrorKind::Allocation,
            BrokerError::NotFound => ErrorKind::NotFound,
            BrokerError::NotReady => ErrorKind::NotReady,
            BrokerError::SessionSpent | BrokerError::AlreadyFilled => ErrorKind::Conflict,
            BrokerError::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether repeating the identical call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Allocation | ErrorKind::NotReady | ErrorKind::Store
        )
    }

    /// Stable snake_case name for wire responses.
    pub fn reason(&self) -> &'static str {
        match self {
            BrokerError::TooLarge { .. } => "too_large",
            BrokerError::InvalidCode(_) => "invalid_code",
            BrokerError::InvalidContentType { .. } => "invalid_content_type",
            BrokerError::SessionSpent => "session_spent",
            BrokerError::PoolExhausted { .. } => "pool_exhausted",
            BrokerError::NotFound => "not_found",
            BrokerError::NotReady => "not_ready",
            BrokerError::AlreadyFilled => "already_filled",
            BrokerError::Store(_) => "store_unavailable",
        }
    }
}
