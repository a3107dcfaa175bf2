use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pastewords_contract::{Payload, TransferCode, TransferId, TransferRecord, TransferState};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{StoreError, StoreResult, TransferStore};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const COLUMNS: &str =
    "code, transfer_id, state, file_name, content_type, size_bytes, payload, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl StorageConfig {
    pub fn new(sqlite_path: impl Into<String>) -> Self {
        Self {
            sqlite_path: sqlite_path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTransferStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct TransferRow {
    code: String,
    transfer_id: String,
    state: String,
    file_name: Option<String>,
    content_type: Option<String>,
    size_bytes: i64,
    payload: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

impl SqliteTransferStore {
    pub async fn connect(config: &StorageConfig) -> StoreResult<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single pinned connection keeps the
    /// database alive for the lifetime of the store.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql).execute(&self.pool).await?;
        }
        info!("transfer store schema ready");
        Ok(())
    }
}

#[async_trait]
impl TransferStore for SqliteTransferStore {
    async fn create_if_absent(&self, record: &TransferRecord) -> StoreResult<bool> {
        let sql = format!(
            "INSERT INTO transfers({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(code) DO UPDATE SET \
             transfer_id = excluded.transfer_id, state = excluded.state, \
             file_name = excluded.file_name, content_type = excluded.content_type, \
             size_bytes = excluded.size_bytes, payload = excluded.payload, \
             created_at = excluded.created_at, updated_at = excluded.updated_at \
             WHERE transfers.state = 'consumed'"
        );
        let payload = record.payload.as_ref();
        let result = sqlx::query(&sql)
            .bind(record.code.as_str())
            .bind(record.transfer_id.to_string())
            .bind(record.state.as_str())
            .bind(payload.map(|p| p.file_name.as_str()))
            .bind(payload.map(|p| p.content_type.as_str()))
            .bind(record.size_bytes() as i64)
            .bind(payload.map(|p| p.bytes.as_slice()))
            .bind(timestamp(record.created_at))
            .bind(timestamp(record.updated_at))
            .execute(&self.pool)
            .await?;

        let created = result.rows_affected() == 1;
        debug!(transfer_id = %record.transfer_id, created, "create_if_absent");
        Ok(created)
    }

    async fn get(&self, code: &TransferCode) -> StoreResult<Option<TransferRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM transfers WHERE code = ?");
        let row = sqlx::query_as::<_, TransferRow>(&sql)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransferRecord::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        expected: TransferState,
        record: &TransferRecord,
    ) -> StoreResult<bool> {
        let payload = record.payload.as_ref();
        let result = sqlx::query(
            "UPDATE transfers SET state = ?, file_name = ?, content_type = ?, size_bytes = ?, payload = ?, updated_at = ? \
             WHERE code = ? AND transfer_id = ? AND state = ?",
        )
        .bind(record.state.as_str())
        .bind(payload.map(|p| p.file_name.as_str()))
        .bind(payload.map(|p| p.content_type.as_str()))
        .bind(record.size_bytes() as i64)
        .bind(payload.map(|p| p.bytes.as_slice()))
        .bind(timestamp(record.updated_at))
        .bind(record.code.as_str())
        .bind(record.transfer_id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, code: &TransferCode, transfer_id: TransferId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM transfers WHERE code = ? AND transfer_id = ?")
            .bind(code.as_str())
            .bind(transfer_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM transfers WHERE state = 'consumed' OR (state = 'empty' AND created_at < ?)",
        )
        .bind(timestamp(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            code: row.code.clone(),
            reason,
        };

        let code = TransferCode::parse(&row.code, usize::MAX).map_err(|e| corrupt(e.to_string()))?;
        let transfer_id = Uuid::parse_str(&row.transfer_id).map_err(|e| corrupt(e.to_string()))?;
        let state = row
            .state
            .parse::<TransferState>()
            .map_err(|e| corrupt(e.to_string()))?;
        let created_at = parse_timestamp(&row.created_at).map_err(&corrupt)?;
        let updated_at = parse_timestamp(&row.updated_at).map_err(&corrupt)?;

        let payload = match (row.file_name, row.content_type, row.payload) {
            (Some(file_name), Some(content_type), Some(bytes)) => {
                if bytes.len() as i64 != row.size_bytes {
                    return Err(corrupt(format!(
                        "payload is {} bytes but size_bytes says {}",
                        bytes.len(),
                        row.size_bytes
                    )));
                }
                Some(Payload {
                    file_name,
                    content_type,
                    bytes,
                })
            }
            _ => None,
        };

        if state == TransferState::Filled && payload.is_none() {
            return Err(corrupt("filled record without payload".to_string()));
        }

        Ok(TransferRecord {
            transfer_id,
            code,
            state,
            payload,
            created_at,
            updated_at,
        })
    }
}

/// Fixed-width UTC timestamps so `created_at` compares correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}
