//! # SQLite delivery ledger
//!
//! Durable [`DeliveryLedger`] backed by a single SQLite table. Every state
//! change runs in its own transaction so a concurrent receipt and dispatch
//! conclusion can never interleave on the same entry.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bigdecimal::BigDecimal;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use sms_core::ledger::check_completion;
use sms_core::{DeliveryLedger, DeliveryStatus, LedgerEntry, LedgerError, LedgerPage, LedgerQuery};
use time::OffsetDateTime;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_entries (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    provider_id  TEXT,
    recipient    TEXT NOT NULL,
    message      TEXT NOT NULL,
    status       TEXT NOT NULL,
    response     TEXT,
    cost         TEXT,
    currency     TEXT,
    sent_at      INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ledger_entries_status ON ledger_entries (status);
CREATE INDEX IF NOT EXISTS ledger_entries_sent_at ON ledger_entries (sent_at);
";

const COLUMNS: &str =
    "id, provider_id, recipient, message, status, response, cost, currency, sent_at, updated_at";

/// SQLite-backed ledger.
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

fn db_err(err: rusqlite::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn nanos(ts: OffsetDateTime) -> Result<i64, LedgerError> {
    i64::try_from(ts.unix_timestamp_nanos())
        .map_err(|_| LedgerError::Storage(format!("timestamp out of range: {}", ts)))
}

fn from_nanos(value: i64) -> Result<OffsetDateTime, LedgerError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value))
        .map_err(|e| LedgerError::Storage(e.to_string()))
}

/// Raw column values, decoded outside the rusqlite row callback.
struct StoredRow {
    id: String,
    provider_id: Option<String>,
    recipient: String,
    message: String,
    status: String,
    response: Option<String>,
    cost: Option<String>,
    currency: Option<String>,
    sent_at: i64,
    updated_at: i64,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            recipient: row.get(2)?,
            message: row.get(3)?,
            status: row.get(4)?,
            response: row.get(5)?,
            cost: row.get(6)?,
            currency: row.get(7)?,
            sent_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<LedgerEntry, LedgerError> {
        let status = DeliveryStatus::from_str(&self.status).map_err(LedgerError::Storage)?;
        let response = self
            .response
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| LedgerError::Storage(format!("response column: {}", e)))?;
        let cost = self
            .cost
            .map(|text| BigDecimal::from_str(&text))
            .transpose()
            .map_err(|e| LedgerError::Storage(format!("cost column: {}", e)))?;
        Ok(LedgerEntry {
            id: self.id,
            provider_id: self.provider_id,
            recipient: self.recipient,
            message: self.message,
            status,
            response,
            cost,
            currency: self.currency,
            sent_at: from_nanos(self.sent_at)?,
            updated_at: from_nanos(self.updated_at)?,
        })
    }
}

impl SqliteLedger {
    /// Open (or create) a ledger database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Storage("sqlite mutex poisoned".into()))
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let sql = format!("SELECT {} FROM ledger_entries WHERE id = ?1", COLUMNS);
        conn.query_row(&sql, [id], StoredRow::read)
            .optional()
            .map_err(db_err)?
            .map(StoredRow::decode)
            .transpose()
    }

    fn write(conn: &Connection, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let response = entry.response.as_ref().map(|v| v.to_string());
        let cost = entry.cost.as_ref().map(|c| c.to_string());
        conn.execute(
            "UPDATE ledger_entries
                SET provider_id = ?2, status = ?3, response = ?4, cost = ?5,
                    currency = ?6, updated_at = ?7
              WHERE id = ?1",
            params![
                entry.id,
                entry.provider_id,
                entry.status.as_str(),
                response,
                cost,
                entry.currency,
                nanos(entry.updated_at)?,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl DeliveryLedger for SqliteLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if entry.status != DeliveryStatus::Pending {
            return Err(LedgerError::InvalidStateTransition {
                from: DeliveryStatus::Pending,
                to: entry.status,
            });
        }
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO ledger_entries
                (id, provider_id, recipient, message, status, response, cost, currency, sent_at, updated_at)
             VALUES (?1, NULL, ?2, ?3, ?4, NULL, NULL, NULL, ?5, ?6)",
            params![
                entry.id,
                entry.recipient,
                entry.message,
                entry.status.as_str(),
                nanos(entry.sent_at)?,
                nanos(entry.updated_at)?,
            ],
        );
        match inserted {
            Ok(_) => {
                debug!(entry_id = %entry.id, "ledger entry recorded");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(LedgerError::Duplicate(entry.id.clone()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn complete(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let current = Self::load(&tx, &entry.id)?
            .ok_or_else(|| LedgerError::NotFound(entry.id.clone()))?;
        check_completion(current.status, entry.status)?;
        Self::write(&tx, entry)?;
        tx.commit().map_err(db_err)
    }

    fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        response: Option<serde_json::Value>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut entry =
            Self::load(&tx, id)?.ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        entry.apply_receipt(status, response)?;
        Self::write(&tx, &entry)?;
        tx.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    fn list(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError> {
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(status) = query.status {
            clauses.push("status = ?");
            args.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(recipient) = &query.recipient {
            clauses.push("instr(recipient, ?) > 0");
            args.push(SqlValue::Text(recipient.clone()));
        }
        if let Some(since) = query.since {
            clauses.push("sent_at >= ?");
            args.push(SqlValue::Integer(nanos(since)?));
        }
        if let Some(until) = query.until {
            clauses.push("sent_at < ?");
            args.push(SqlValue::Integer(nanos(until)?));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit = query.effective_limit();
        let conn = self.lock()?;
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM ledger_entries {}", filter),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let sql = format!(
            "SELECT {} FROM ledger_entries {} ORDER BY seq DESC LIMIT {} OFFSET {}",
            COLUMNS, filter, limit, query.offset
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), StoredRow::read)
            .map_err(db_err)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?.decode()?);
        }

        Ok(LedgerPage {
            entries,
            total: usize::try_from(total).unwrap_or_default(),
            offset: query.offset,
            limit,
        })
    }
}
