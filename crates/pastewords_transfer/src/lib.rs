//! Code-to-file transfer broker.
//!
//! A sender hands over a file and gets back a short word; the receiver
//! trades that word for the file exactly once.

mod allocator;
mod cleanup;
mod error;
mod gateway;
mod lifecycle;
mod limits;
#[cfg(test)]
mod testing;
mod words;

pub use allocator::CodeAllocator;
pub use cleanup::{spawn_stale_sweeper, sweep_once, SweepConfig};
pub use error::{BrokerError, ErrorKind};
pub use gateway::{Broker, DownloadGateway, Receipt, SenderSession, Upload, UploadGateway};
pub use lifecycle::TransferLifecycle;
pub use limits::{BrokerLimits, LimitsError};
pub use words::{WordPool, WordPoolError, DEFAULT_RESERVED_MARKER};

pub use pastewords_contract::{Payload, TransferCode, TransferRecord, TransferState};
