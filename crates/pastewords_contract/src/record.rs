use std::{fmt, str::FromStr};

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::code::TransferCode;

pub type TransferId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Empty,
    Filled,
    Consumed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Empty => "empty",
            TransferState::Filled => "filled",
            TransferState::Consumed => "consumed",
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, TransferState::Consumed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transfer state {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for TransferState {
    type Err = UnknownState;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "empty" => Ok(TransferState::Empty),
            "filled" => Ok(TransferState::Filled),
            "consumed" => Ok(TransferState::Consumed),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// The uploaded file as the receiver will get it back.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// Current time at the precision the SQLite store keeps, so a record read
/// back compares equal to the one that was written.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Stored association between a code and (eventually) a payload.
///
/// `transfer_id` identifies one lifetime of a code: when a consumed code is
/// handed out again the new record gets a fresh id, so conditional writes
/// keyed on the id never touch a successor record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub code: TransferCode,
    pub state: TransferState,
    pub payload: Option<Payload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// A fresh `Empty` record reserving `code`.
    pub fn reserve(code: TransferCode) -> Self {
        let at = now();
        Self {
            transfer_id: Uuid::now_v7(),
            code,
            state: TransferState::Empty,
            payload: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// The `Filled` successor of this record.
    pub fn fill(&self, payload: Payload) -> Self {
        Self {
            state: TransferState::Filled,
            payload: Some(payload),
            updated_at: now(),
            ..self.clone_header()
        }
    }

    /// The `Consumed` successor of this record. The payload is dropped so the
    /// store does not keep the blob around until the row is removed.
    pub fn consume(&self) -> Self {
        Self {
            state: TransferState::Consumed,
            payload: None,
            updated_at: now(),
            ..self.clone_header()
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.as_ref().map_or(0, Payload::size_bytes)
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    fn clone_header(&self) -> Self {
        Self {
            transfer_id: self.transfer_id,
            code: self.code.clone(),
            state: self.state,
            payload: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(raw: &str) -> TransferCode {
        TransferCode::parse(raw, 16).expect("code")
    }

    fn payload() -> Payload {
        Payload {
            file_name: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            bytes: b"hello".to_vec(),
        }
    }

    #[test]
    fn reserve_starts_empty_without_payload() {
        let record = TransferRecord::reserve(code("lantern"));
        assert_eq!(record.state, TransferState::Empty);
        assert!(record.payload.is_none());
        assert!(record.is_live());
        assert_eq!(record.size_bytes(), 0);
    }

    #[test]
    fn fill_and_consume_keep_identity() {
        let empty = TransferRecord::reserve(code("lantern"));
        let filled = empty.fill(payload());
        assert_eq!(filled.transfer_id, empty.transfer_id);
        assert_eq!(filled.created_at, empty.created_at);
        assert_eq!(filled.state, TransferState::Filled);
        assert_eq!(filled.size_bytes(), 5);

        let consumed = filled.consume();
        assert_eq!(consumed.transfer_id, empty.transfer_id);
        assert_eq!(consumed.state, TransferState::Consumed);
        assert!(consumed.payload.is_none());
        assert!(!consumed.is_live());
    }

    #[test]
    fn timestamps_are_whole_microseconds() {
        let consumed = TransferRecord::reserve(code("lantern")).fill(payload()).consume();
        for at in [consumed.created_at, consumed.updated_at] {
            assert_eq!(at.timestamp_subsec_nanos() % 1_000, 0);
        }
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            TransferState::Empty,
            TransferState::Filled,
            TransferState::Consumed,
        ] {
            assert_eq!(state.as_str().parse::<TransferState>(), Ok(state));
        }
        assert!("delivered".parse::<TransferState>().is_err());
    }

    #[test]
    fn payload_debug_omits_bytes() {
        let rendered = format!("{:?}", payload());
        assert!(rendered.contains("size_bytes: 5"));
        assert!(!rendered.contains("104"));
    }
}
