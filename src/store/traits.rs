//! `Store` trait — single async interface for all persistence.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::{EditSession, Report, ReportId};

/// Backend-agnostic keyed record store for reports, the admin outbox,
/// mute records, and edit sessions.
///
/// Every operation is independently atomic and idempotent by key; callers
/// rely on that instead of multi-statement transactions (an operator action
/// re-reads then deletes, and treats absence as "already handled").
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Cheap liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), DatabaseError>;

    // ── Reports ─────────────────────────────────────────────────────

    /// Insert or replace a report. Repeated album finalize attempts hit the
    /// same deterministic id and are therefore harmless.
    async fn upsert_report(&self, report: &Report) -> Result<(), DatabaseError>;

    async fn get_report(&self, id: &ReportId) -> Result<Option<Report>, DatabaseError>;

    /// Replace a report's text (edit flow).
    async fn patch_report_text(&self, id: &ReportId, text: &str) -> Result<(), DatabaseError>;

    /// Delete a report. Deleting an absent id is a no-op, which guards
    /// against double-processing of the same operator click.
    async fn delete_report(&self, id: &ReportId) -> Result<(), DatabaseError>;

    /// Remove reports older than `max_age`. Returns the ids removed so the
    /// caller can purge the matching review artifacts.
    async fn expire_reports(&self, max_age: Duration) -> Result<Vec<ReportId>, DatabaseError>;

    // ── Admin outbox ────────────────────────────────────────────────

    async fn add_outbox_message(
        &self,
        id: &ReportId,
        message_id: i64,
    ) -> Result<(), DatabaseError>;

    async fn outbox_messages(&self, id: &ReportId) -> Result<Vec<i64>, DatabaseError>;

    async fn clear_outbox(&self, id: &ReportId) -> Result<(), DatabaseError>;

    // ── Mute records ────────────────────────────────────────────────

    /// Write a mute record, overwriting any existing one (no stacking).
    async fn set_mute(&self, sender_id: i64, until: DateTime<Utc>) -> Result<(), DatabaseError>;

    async fn get_mute(&self, sender_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    async fn clear_mute(&self, sender_id: i64) -> Result<(), DatabaseError>;

    /// Remove expired mute records. Returns the number removed.
    async fn sweep_mutes(&self) -> Result<usize, DatabaseError>;

    // ── Edit sessions ───────────────────────────────────────────────

    /// Open an edit session for an operator chat, replacing any prior one.
    async fn open_edit_session(
        &self,
        chat_id: i64,
        report_id: &ReportId,
        prompt_message_id: i64,
    ) -> Result<(), DatabaseError>;

    async fn get_edit_session(&self, chat_id: i64)
        -> Result<Option<EditSession>, DatabaseError>;

    async fn close_edit_session(&self, chat_id: i64) -> Result<(), DatabaseError>;
}
