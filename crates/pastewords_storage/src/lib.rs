//! Transfer Store: keyed, durable storage of transfer records.
//!
//! The store is the single source of truth for code uniqueness. Every
//! mutation is a single conditional statement so concurrent brokers sharing
//! one database never observe a half-applied transition.

mod memory;
mod sqlite;
mod store;

pub use memory::MemoryTransferStore;
pub use sqlite::{SqliteTransferStore, StorageConfig};
pub use store::{StoreError, StoreResult, TransferStore};
