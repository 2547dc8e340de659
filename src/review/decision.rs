//! Decision handler — applies operator verdicts to pending reports.
//!
//! The authoritative state lives in the store: every action re-reads the
//! report before acting, so a duplicate click on a stale control resolves
//! to a harmless "already handled" toast instead of a second publication.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::model::{ActionKind, OperatorAction, QueueItem, Report, ReportId};
use crate::mute::MuteLedger;
use crate::review::queue::ReviewQueue;
use crate::routing::Lexicon;
use crate::store::Store;
use crate::transport::{Destination, Transport};

const TOAST_ALREADY_HANDLED: &str = "Déjà traité.";
const TOAST_PUBLISHED: &str = "✅ Publié.";
const TOAST_REJECTED: &str = "❌ Supprimé, non publié.";
const TOAST_MUTED: &str = "🔇 Supprimé, expéditeur restreint.";
const TOAST_PUBLISH_FAILED: &str = "⚠️ Échec de publication, réessayez.";
const TOAST_TRY_AGAIN: &str = "⚠️ Échec, réessayez.";

const EDIT_PROMPT: &str =
    "✏️ Envoyez le nouveau texte du signalement.\n/cancel pour annuler.";

const SENDER_PUBLISHED: &str = "✅ Votre signalement a été publié. Merci !";

pub struct DecisionHandler {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    mutes: MuteLedger,
    lexicon: Lexicon,
    queue: ReviewQueue,
    config: Arc<Config>,
}

impl DecisionHandler {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        mutes: MuteLedger,
        queue: ReviewQueue,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            transport,
            mutes,
            lexicon: Lexicon::default(),
            queue,
            config,
        }
    }

    /// Apply one operator action.
    pub async fn handle_action(&self, action: OperatorAction) -> Result<()> {
        let Some(report) = self.store.get_report(&action.report_id).await? else {
            // Another click already resolved this report.
            self.ack(&action.callback_id, Some(TOAST_ALREADY_HANDLED))
                .await;
            return Ok(());
        };

        match action.kind {
            ActionKind::Approve => self.approve(report, &action).await,
            ActionKind::Reject => self.reject(report, &action).await,
            ActionKind::RejectAndMute => self.reject_and_mute(report, &action).await,
            ActionKind::Edit => self.open_edit(report, &action).await,
        }
    }

    // ── Approve ─────────────────────────────────────────────────────

    async fn approve(&self, report: Report, action: &OperatorAction) -> Result<()> {
        let key = self.lexicon.classify(report.text.as_deref().unwrap_or(""));
        let dest = Destination::topic(self.config.public_chat, self.config.topic_for(key));

        let published = if report.attachments.is_empty() {
            self.transport
                .send_text(dest, report.text.as_deref().unwrap_or(""), &[])
                .await
                .map(|_| ())
        } else {
            self.transport
                .send_media(dest, &report.attachments, report.text.as_deref())
                .await
                .map(|_| ())
        };

        if let Err(e) = published {
            // Publication failed: the report and its review artifact stay
            // intact so the operator can click approve again.
            warn!(report_id = %report.id, error = %e, "Publication failed; report kept");
            self.ack(&action.callback_id, Some(TOAST_PUBLISH_FAILED))
                .await;
            return Ok(());
        }

        info!(report_id = %report.id, route = ?key, "Report published");
        self.notify_sender(&report.id, SENDER_PUBLISHED).await;
        self.resolve(&report.id, action.chat_id).await?;
        self.ack(&action.callback_id, Some(TOAST_PUBLISHED)).await;
        Ok(())
    }

    // ── Reject ──────────────────────────────────────────────────────

    async fn reject(&self, report: Report, action: &OperatorAction) -> Result<()> {
        info!(report_id = %report.id, "Report rejected");
        self.resolve(&report.id, action.chat_id).await?;
        self.ack(&action.callback_id, Some(TOAST_REJECTED)).await;
        Ok(())
    }

    async fn reject_and_mute(&self, report: Report, action: &OperatorAction) -> Result<()> {
        if let Some(sender_id) = report.id.sender_id() {
            let until = self.mutes.set(sender_id, self.config.mute_duration).await?;
            info!(report_id = %report.id, sender_id, %until, "Sender muted");

            // The chat-level restriction mirrors the ledger; the ledger
            // alone is authoritative for intake.
            if let Err(e) = self
                .transport
                .restrict_sender(self.config.public_chat, sender_id, until)
                .await
            {
                warn!(sender_id, error = %e, "Chat-level restriction failed");
            }
            let minutes = self.config.mute_duration.as_secs() / 60;
            self.notify_sender(
                &report.id,
                &format!(
                    "🔇 Votre signalement a été refusé et vous êtes restreint \
                     pour {minutes} minutes."
                ),
            )
            .await;
        } else {
            warn!(report_id = %report.id, "Cannot decode sender id; rejecting without mute");
        }

        self.resolve(&report.id, action.chat_id).await?;
        self.ack(&action.callback_id, Some(TOAST_MUTED)).await;
        Ok(())
    }

    // ── Edit ────────────────────────────────────────────────────────

    async fn open_edit(&self, report: Report, action: &OperatorAction) -> Result<()> {
        // A new edit supersedes any open one in this chat; drop the
        // superseded prompt so the operator is not looking at two.
        if let Some(old) = self.store.get_edit_session(action.chat_id).await? {
            self.delete_quietly(action.chat_id, old.prompt_message_id)
                .await;
        }

        let prompt_id = match self
            .transport
            .send_text(Destination::chat(action.chat_id), EDIT_PROMPT, &[])
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(report_id = %report.id, error = %e, "Failed to send edit prompt");
                self.ack(&action.callback_id, Some(TOAST_TRY_AGAIN)).await;
                return Ok(());
            }
        };
        self.store
            .open_edit_session(action.chat_id, &report.id, prompt_id)
            .await?;
        self.ack(&action.callback_id, None).await;
        Ok(())
    }

    /// Plain operator text in the admin chat: the replacement text if an
    /// edit session is open, otherwise ignored.
    pub async fn handle_operator_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let Some(session) = self.store.get_edit_session(chat_id).await? else {
            return Ok(());
        };
        self.store.close_edit_session(chat_id).await?;
        self.delete_quietly(chat_id, session.prompt_message_id).await;

        if self
            .store
            .get_report(&session.report_id)
            .await?
            .is_none()
        {
            // Resolved while the operator was typing.
            self.notify_chat(chat_id, TOAST_ALREADY_HANDLED).await;
            return Ok(());
        }

        self.store
            .patch_report_text(&session.report_id, text.trim())
            .await?;
        info!(report_id = %session.report_id, "Report text edited");

        // Drop the stale artifact and re-render through the normal queue
        // so the operator reviews exactly what would be published.
        self.purge_outbox(&session.report_id, chat_id).await?;
        if let Some(patched) = self.store.get_report(&session.report_id).await? {
            self.queue.push(QueueItem::from(&patched));
        }
        Ok(())
    }

    /// `/cancel` in the admin chat closes any open edit session.
    pub async fn handle_cancel(&self, chat_id: i64) -> Result<()> {
        let Some(session) = self.store.get_edit_session(chat_id).await? else {
            return Ok(());
        };
        self.store.close_edit_session(chat_id).await?;
        self.delete_quietly(chat_id, session.prompt_message_id).await;
        self.notify_chat(chat_id, "Édition annulée.").await;
        Ok(())
    }

    // ── Shared plumbing ─────────────────────────────────────────────

    /// Remove a resolved report and its review artifact.
    async fn resolve(&self, report_id: &ReportId, admin_chat: i64) -> Result<()> {
        self.store.delete_report(report_id).await?;
        self.purge_outbox(report_id, admin_chat).await
    }

    /// Delete every admin message recorded for a report, then forget them.
    /// Message deletion is best effort; the outbox rows always go.
    async fn purge_outbox(&self, report_id: &ReportId, admin_chat: i64) -> Result<()> {
        for message_id in self.store.outbox_messages(report_id).await? {
            self.delete_quietly(admin_chat, message_id).await;
        }
        self.store.clear_outbox(report_id).await?;
        Ok(())
    }

    async fn delete_quietly(&self, chat_id: i64, message_id: i64) {
        if let Err(e) = self.transport.delete_message(chat_id, message_id).await {
            warn!(chat_id, message_id, error = %e, "Failed to delete message");
        }
    }

    async fn ack(&self, callback_id: &str, text: Option<&str>) {
        if let Err(e) = self.transport.ack_action(callback_id, text).await {
            warn!(callback_id, error = %e, "Failed to acknowledge action");
        }
    }

    async fn notify_sender(&self, report_id: &ReportId, text: &str) {
        let Some(sender_id) = report_id.sender_id() else {
            return;
        };
        self.notify_chat(sender_id, text).await;
    }

    async fn notify_chat(&self, chat_id: i64, text: &str) {
        if let Err(e) = self
            .transport
            .send_text(Destination::chat(chat_id), text, &[])
            .await
        {
            warn!(chat_id, error = %e, "Failed to send notification");
        }
    }
}
