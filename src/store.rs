use chrono::Local;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::login::{Role, User};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS loan_state (
    code           TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    holder         TEXT,
    loan_timestamp TEXT,
    loan_count     INTEGER NOT NULL DEFAULT 0,
    last_lender    TEXT,
    last_returner  TEXT
);
CREATE TABLE IF NOT EXISTS audit_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    code      TEXT NOT NULL,
    action    TEXT NOT NULL,
    actor     TEXT NOT NULL,
    target    TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL
);
";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Audit target recorded for returns.
pub const NO_TARGET: &str = "-";

/// Join key between inventory codes and stored loan state.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Available,
    Loaned,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Available => "available",
            LoanStatus::Loaned => "loaned",
        }
    }

    fn parse(value: &str) -> Self {
        if value == "loaned" {
            LoanStatus::Loaned
        } else {
            LoanStatus::Available
        }
    }
}

/// Current lending state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanState {
    pub code: String,
    pub status: LoanStatus,
    pub holder: Option<String>,
    pub loan_timestamp: Option<String>,
    pub loan_count: u32,
    pub last_lender: Option<String>,
    pub last_returner: Option<String>,
}

impl LoanState {
    /// State of an item never lent out.
    pub fn available(code: &str) -> Self {
        LoanState {
            code: normalize_code(code),
            status: LoanStatus::Available,
            holder: None,
            loan_timestamp: None,
            loan_count: 0,
            last_lender: None,
            last_returner: None,
        }
    }

    pub fn is_loaned(&self) -> bool {
        self.status == LoanStatus::Loaned
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(LoanState {
            code: row.get("code")?,
            status: LoanStatus::parse(&status),
            holder: row.get("holder")?,
            loan_timestamp: row.get("loan_timestamp")?,
            loan_count: row.get("loan_count")?,
            last_lender: row.get("last_lender")?,
            last_returner: row.get("last_returner")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Prestar,
    Devolver,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Prestar => "prestar",
            AuditAction::Devolver => "devolver",
        }
    }
}

/// One loan or return, as logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub code: String,
    pub action: String,
    pub actor: String,
    pub target: String,
    pub timestamp: String,
}

/// Loan state, audit log and user accounts in a single SQLite file.
///
/// Every operation opens its own connection and closes it on return; no
/// connection outlives a call.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) the database file and its tables.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let store = StateStore { path: path.into() };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> AppResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Current state of `code`; items without a stored row are available
    /// with a loan count of zero. Never writes.
    pub fn get_state(&self, code: &str) -> AppResult<LoanState> {
        let key = normalize_code(code);
        let conn = self.connect()?;
        let state = conn
            .query_row(
                "SELECT * FROM loan_state WHERE code = ?1",
                params![key],
                LoanState::from_row,
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| LoanState::available(&key)))
    }

    /// Apply a loan or return and append the matching audit entry.
    ///
    /// A loan records `target` as holder, stamps the time, bumps the loan
    /// counter and remembers `actor` as lender. A return clears holder and
    /// time and remembers `actor` as returner; the counter is kept.
    pub fn set_state(
        &self,
        code: &str,
        status: LoanStatus,
        actor: &str,
        target: Option<&str>,
    ) -> AppResult<LoanState> {
        let key = normalize_code(code);
        if key.is_empty() {
            return Err(AppError::NotFound("empty item code".to_string()));
        }
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let (action, audit_target) = match status {
            LoanStatus::Loaned => {
                tx.execute(
                    "INSERT INTO loan_state
                         (code, status, holder, loan_timestamp, loan_count, last_lender, last_returner)
                     VALUES (?1, 'loaned', ?2, ?3, 1, ?4, NULL)
                     ON CONFLICT(code) DO UPDATE SET
                         status = 'loaned',
                         holder = excluded.holder,
                         loan_timestamp = excluded.loan_timestamp,
                         loan_count = loan_state.loan_count + 1,
                         last_lender = excluded.last_lender,
                         last_returner = NULL",
                    params![key, target, now, actor],
                )?;
                (AuditAction::Prestar, target.unwrap_or(NO_TARGET))
            }
            LoanStatus::Available => {
                tx.execute(
                    "INSERT INTO loan_state
                         (code, status, holder, loan_timestamp, loan_count, last_lender, last_returner)
                     VALUES (?1, 'available', NULL, NULL, 0, NULL, ?2)
                     ON CONFLICT(code) DO UPDATE SET
                         status = 'available',
                         holder = NULL,
                         loan_timestamp = NULL,
                         last_returner = excluded.last_returner",
                    params![key, actor],
                )?;
                (AuditAction::Devolver, NO_TARGET)
            }
        };
        tx.execute(
            "INSERT INTO audit_log (code, action, actor, target, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, action.as_str(), actor, audit_target, now],
        )?;
        let state = tx.query_row(
            "SELECT * FROM loan_state WHERE code = ?1",
            params![key],
            LoanState::from_row,
        )?;
        tx.commit()?;

        log::info!(
            "{} {} by {} (target: {})",
            action.as_str(),
            key,
            actor,
            audit_target
        );
        Ok(state)
    }

    /// Audit entries, newest first, optionally restricted to one code.
    pub fn audit_log(&self, code: Option<&str>, limit: usize) -> AppResult<Vec<AuditEntry>> {
        let conn = self.connect()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = match code {
            Some(code) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM audit_log WHERE code = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![normalize_code(code), limit], audit_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?1")?;
                let rows = stmt.query_map(params![limit], audit_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(entries)
    }

    pub fn get_user(&self, username: &str) -> AppResult<Option<User>> {
        let conn = self.connect()?;
        let user = conn
            .query_row(
                "SELECT username, password_hash, role FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// All accounts ordered by username.
    pub fn list_users(&self) -> AppResult<Vec<User>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT username, password_hash, role FROM users ORDER BY username")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Insert an account; returns `false` if the username is taken.
    pub fn insert_user(&self, user: &User) -> AppResult<bool> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![user.username, user.password_hash, user.role.as_str()],
        )?;
        Ok(inserted == 1)
    }

    /// Remove an account; returns `false` if it did not exist.
    pub fn delete_user(&self, username: &str) -> AppResult<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        Ok(deleted == 1)
    }
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        code: row.get("code")?,
        action: row.get("action")?,
        actor: row.get("actor")?,
        target: row.get("target")?,
        timestamp: row.get("timestamp")?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        username: row.get(0)?,
        password_hash: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::Visitor),
    })
}
