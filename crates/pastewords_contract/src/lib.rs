pub mod code;
pub mod record;

pub use code::{CodeError, TransferCode, DEFAULT_MAX_CODE_LEN};
pub use record::{Payload, TransferId, TransferRecord, TransferState, UnknownState};
