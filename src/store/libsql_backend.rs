//! libSQL backend — async `Store` trait implementation.
//!
//! Stores a single connection that is reused for all operations.
//! `libsql::Connection` is `Send + Sync` and safe for concurrent use from
//! the album finalizer, the decision handler, and the sweeper at once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::model::{Attachment, EditSession, Report, ReportId};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn encode_attachments(attachments: &[Attachment]) -> Result<String, DatabaseError> {
    serde_json::to_string(attachments).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn decode_attachments(json: &str) -> Result<Vec<Attachment>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn query_err(context: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(format!("{context}: {e}"))
}

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.conn()
            .query("SELECT 1", ())
            .await
            .map_err(|e| query_err("ping", e))?;
        Ok(())
    }

    // ── Reports ─────────────────────────────────────────────────────

    async fn upsert_report(&self, report: &Report) -> Result<(), DatabaseError> {
        let attachments = encode_attachments(&report.attachments)?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO reports
                 (report_id, text, attachments_json, created_ts, sender_display)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    report.id.as_str(),
                    report.text.clone(),
                    attachments,
                    to_unix(report.created_at),
                    report.sender_display.clone()
                ],
            )
            .await
            .map_err(|e| query_err("upsert report", e))?;
        Ok(())
    }

    async fn get_report(&self, id: &ReportId) -> Result<Option<Report>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT text, attachments_json, created_ts, sender_display
                 FROM reports WHERE report_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| query_err("get report", e))?;

        let Some(row) = rows.next().await.map_err(|e| query_err("get report", e))? else {
            return Ok(None);
        };

        let text: Option<String> = row.get(0).map_err(|e| query_err("report.text", e))?;
        let attachments_json: String =
            row.get(1).map_err(|e| query_err("report.attachments", e))?;
        let created_ts: i64 = row.get(2).map_err(|e| query_err("report.created_ts", e))?;
        let sender_display: String = row.get(3).map_err(|e| query_err("report.sender", e))?;

        Ok(Some(Report {
            id: id.clone(),
            text,
            attachments: decode_attachments(&attachments_json)?,
            created_at: from_unix(created_ts),
            sender_display,
        }))
    }

    async fn patch_report_text(&self, id: &ReportId, text: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE reports SET text = ?2 WHERE report_id = ?1",
                params![id.as_str(), text],
            )
            .await
            .map_err(|e| query_err("patch report text", e))?;
        Ok(())
    }

    async fn delete_report(&self, id: &ReportId) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM reports WHERE report_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| query_err("delete report", e))?;
        Ok(())
    }

    async fn expire_reports(&self, max_age: Duration) -> Result<Vec<ReportId>, DatabaseError> {
        let cutoff = to_unix(Utc::now()) - max_age.as_secs() as i64;
        let mut rows = self
            .conn()
            .query(
                "SELECT report_id FROM reports WHERE created_ts < ?1",
                params![cutoff],
            )
            .await
            .map_err(|e| query_err("expire reports", e))?;

        let mut expired = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_err("expire reports", e))? {
            let raw: String = row.get(0).map_err(|e| query_err("expired.report_id", e))?;
            expired.push(ReportId::from_raw(raw));
        }
        if !expired.is_empty() {
            self.conn()
                .execute(
                    "DELETE FROM reports WHERE created_ts < ?1",
                    params![cutoff],
                )
                .await
                .map_err(|e| query_err("expire reports", e))?;
        }
        Ok(expired)
    }

    // ── Admin outbox ────────────────────────────────────────────────

    async fn add_outbox_message(
        &self,
        id: &ReportId,
        message_id: i64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO admin_outbox (report_id, message_id) VALUES (?1, ?2)",
                params![id.as_str(), message_id],
            )
            .await
            .map_err(|e| query_err("add outbox message", e))?;
        Ok(())
    }

    async fn outbox_messages(&self, id: &ReportId) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id FROM admin_outbox WHERE report_id = ?1 ORDER BY message_id",
                params![id.as_str()],
            )
            .await
            .map_err(|e| query_err("outbox messages", e))?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_err("outbox messages", e))? {
            ids.push(row.get(0).map_err(|e| query_err("outbox.message_id", e))?);
        }
        Ok(ids)
    }

    async fn clear_outbox(&self, id: &ReportId) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM admin_outbox WHERE report_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| query_err("clear outbox", e))?;
        Ok(())
    }

    // ── Mute records ────────────────────────────────────────────────

    async fn set_mute(&self, sender_id: i64, until: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO muted_senders (sender_id, mute_until_ts) VALUES (?1, ?2)",
                params![sender_id, to_unix(until)],
            )
            .await
            .map_err(|e| query_err("set mute", e))?;
        Ok(())
    }

    async fn get_mute(&self, sender_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT mute_until_ts FROM muted_senders WHERE sender_id = ?1",
                params![sender_id],
            )
            .await
            .map_err(|e| query_err("get mute", e))?;

        match rows.next().await.map_err(|e| query_err("get mute", e))? {
            Some(row) => {
                let until: i64 = row.get(0).map_err(|e| query_err("mute.until", e))?;
                Ok(Some(from_unix(until)))
            }
            None => Ok(None),
        }
    }

    async fn clear_mute(&self, sender_id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM muted_senders WHERE sender_id = ?1",
                params![sender_id],
            )
            .await
            .map_err(|e| query_err("clear mute", e))?;
        Ok(())
    }

    async fn sweep_mutes(&self) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM muted_senders WHERE mute_until_ts < ?1",
                params![to_unix(Utc::now())],
            )
            .await
            .map_err(|e| query_err("sweep mutes", e))?;
        Ok(removed as usize)
    }

    // ── Edit sessions ───────────────────────────────────────────────

    async fn open_edit_session(
        &self,
        chat_id: i64,
        report_id: &ReportId,
        prompt_message_id: i64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO edit_sessions (chat_id, report_id, prompt_message_id)
                 VALUES (?1, ?2, ?3)",
                params![chat_id, report_id.as_str(), prompt_message_id],
            )
            .await
            .map_err(|e| query_err("open edit session", e))?;
        Ok(())
    }

    async fn get_edit_session(
        &self,
        chat_id: i64,
    ) -> Result<Option<EditSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT report_id, prompt_message_id FROM edit_sessions WHERE chat_id = ?1",
                params![chat_id],
            )
            .await
            .map_err(|e| query_err("get edit session", e))?;

        match rows.next().await.map_err(|e| query_err("get edit session", e))? {
            Some(row) => {
                let report_id: String = row.get(0).map_err(|e| query_err("session.report", e))?;
                let prompt_message_id: i64 =
                    row.get(1).map_err(|e| query_err("session.prompt", e))?;
                Ok(Some(EditSession {
                    chat_id,
                    report_id: ReportId::from_raw(report_id),
                    prompt_message_id,
                }))
            }
            None => Ok(None),
        }
    }

    async fn close_edit_session(&self, chat_id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM edit_sessions WHERE chat_id = ?1",
                params![chat_id],
            )
            .await
            .map_err(|e| query_err("close edit session", e))?;
        Ok(())
    }
}
