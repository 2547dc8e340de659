//! Submission entry point — mute check, flood gate, album vs direct path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::ingest::album::AlbumAggregator;
use crate::ingest::flood::{Admission, FloodGate};
use crate::model::{IncomingUnit, QueueItem, Report, ReportId};
use crate::mute::MuteLedger;
use crate::review::queue::ReviewQueue;
use crate::store::Store;
use crate::transport::{Destination, Transport};

const WELCOME: &str = "Bonjour ! Je suis le bot de signalement.\n\n\
    🤫 Toutes vos soumissions ici sont 100% ANONYMES.\n\n\
    Envoyez-moi vos photos, vidéos, ou infos (radars, accidents, contrôles).\n\n\
    Ajoutez un texte pour le contexte (ex: \"Radar mobile A7, sortie Montélimar\").\n\n\
    Un admin validera votre signalement avant publication.";

const ACK_RECEIVED: &str = "✅ Reçu. Vérif avant publication (anonyme).";
const ACK_SLOW_DOWN: &str = "⏳ Doucement, envoie pas tout d'un coup 🙏";

/// Routes private submissions into the review pipeline.
pub struct Intake {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    flood: Arc<FloodGate>,
    albums: AlbumAggregator,
    mutes: MuteLedger,
    queue: ReviewQueue,
    flood_mute: Duration,
}

impl Intake {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        flood: Arc<FloodGate>,
        albums: AlbumAggregator,
        mutes: MuteLedger,
        queue: ReviewQueue,
        flood_mute: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            flood,
            albums,
            mutes,
            queue,
            flood_mute,
        }
    }

    /// Handle one inbound unit of content from a private chat.
    pub async fn handle_unit(&self, unit: IncomingUnit) -> Result<()> {
        // Muted senders are refused with a countdown.
        if let Some(remaining) = self.mutes.check(unit.sender_id).await? {
            let minutes = remaining.as_secs() / 60 + 1;
            self.reply(
                unit.sender_id,
                &format!(
                    "❌ Vous êtes temporairement restreint pour spam.\n\
                     Temps restant : {minutes} minutes."
                ),
            )
            .await;
            return Ok(());
        }

        match self
            .flood
            .admit(unit.sender_id, unit.correlation_id.as_deref())
        {
            Admission::Admitted => {}
            Admission::Throttled => {
                self.reply(unit.sender_id, ACK_SLOW_DOWN).await;
                return Ok(());
            }
            Admission::Escalated => {
                // Persistent flooding earns a short mute of its own.
                let until = self.mutes.set(unit.sender_id, self.flood_mute).await?;
                info!(sender_id = unit.sender_id, %until, "Sender muted for repeated flooding");
                let minutes = self.flood_mute.as_secs() / 60;
                self.reply(
                    unit.sender_id,
                    &format!(
                        "🔇 Trop d'envois d'affilée : vous êtes restreint \
                         pour {minutes} minutes."
                    ),
                )
                .await;
                return Ok(());
            }
        }

        if unit.correlation_id.is_some() {
            // Fragment acks happen once, on finalize.
            self.albums.ingest(unit);
            return Ok(());
        }

        let Some(report) = standalone_report(&unit) else {
            // Nothing reviewable (no text, no media): ignore.
            return Ok(());
        };
        self.store.upsert_report(&report).await?;
        self.queue.push(QueueItem::from(&report));
        self.reply(unit.sender_id, ACK_RECEIVED).await;
        Ok(())
    }

    /// `/start` greeting in a private chat.
    pub async fn welcome(&self, chat_id: i64) {
        self.reply(chat_id, WELCOME).await;
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self
            .transport
            .send_text(Destination::chat(chat_id), text, &[])
            .await
        {
            warn!(chat_id, error = %e, "Failed to reply to sender");
        }
    }
}

/// Build a report from a standalone (non-album) unit.
fn standalone_report(unit: &IncomingUnit) -> Option<Report> {
    let text = unit
        .text
        .clone()
        .filter(|t| !t.trim().is_empty());
    if text.is_none() && unit.attachment.is_none() {
        return None;
    }
    Some(Report {
        id: ReportId::for_message(unit.sender_id, unit.message_id),
        text,
        attachments: unit.attachment.clone().into_iter().collect(),
        created_at: Utc::now(),
        sender_display: unit.sender_display.clone(),
    })
}

/// Consume finalized albums: persist, enqueue, ack the sender once.
pub fn spawn_finalize_pump(
    mut finalized_rx: mpsc::UnboundedReceiver<Report>,
    store: Arc<dyn Store>,
    queue: ReviewQueue,
    transport: Arc<dyn Transport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = finalized_rx.recv().await {
            if let Err(e) = store.upsert_report(&report).await {
                error!(report_id = %report.id, error = %e, "Failed to persist finalized album");
                continue;
            }
            let sender_id = report.id.sender_id();
            queue.push(QueueItem::from(&report));
            if let Some(sender_id) = sender_id {
                if let Err(e) = transport
                    .send_text(Destination::chat(sender_id), ACK_RECEIVED, &[])
                    .await
                {
                    warn!(sender_id, error = %e, "Failed to ack album sender");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::error::TransportError;
    use crate::model::{Attachment, Control};
    use crate::review::queue::review_channel;
    use crate::store::LibSqlStore;

    /// Transport stub that records outgoing texts.
    #[derive(Default)]
    struct SilentTransport {
        texts: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send_text(
            &self,
            dest: Destination,
            text: &str,
            _controls: &[Control],
        ) -> Result<i64, TransportError> {
            self.texts
                .lock()
                .unwrap()
                .push((dest.chat_id, text.to_string()));
            Ok(1)
        }

        async fn send_media(
            &self,
            _dest: Destination,
            _attachments: &[Attachment],
            _caption: Option<&str>,
        ) -> Result<Vec<i64>, TransportError> {
            Ok(vec![])
        }

        async fn delete_message(&self, _chat: i64, _msg: i64) -> Result<(), TransportError> {
            Ok(())
        }

        async fn restrict_sender(
            &self,
            _chat: i64,
            _sender: i64,
            _until: DateTime<Utc>,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn ack_action(
            &self,
            _callback: &str,
            _text: Option<&str>,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn unit(sender: i64, message_id: i64, text: Option<&str>) -> IncomingUnit {
        IncomingUnit {
            sender_id: sender,
            origin_chat: sender,
            message_id,
            correlation_id: None,
            text: text.map(String::from),
            attachment: None,
            sender_display: "@alice".into(),
        }
    }

    struct Fixture {
        intake: Intake,
        store: Arc<LibSqlStore>,
        transport: Arc<SilentTransport>,
        queue_rx: mpsc::UnboundedReceiver<QueueItem>,
        mutes: MuteLedger,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let transport = Arc::new(SilentTransport::default());
        let (queue, queue_rx) = review_channel();
        let (finalized_tx, _finalized_rx) = mpsc::unbounded_channel();
        let mutes = MuteLedger::new(store.clone());
        let intake = Intake::new(
            store.clone(),
            transport.clone(),
            Arc::new(FloodGate::new(Duration::from_secs(4), 3)),
            AlbumAggregator::new(Duration::from_millis(20), finalized_tx),
            mutes.clone(),
            queue,
            Duration::from_secs(300),
        );
        Fixture {
            intake,
            store,
            transport,
            queue_rx,
            mutes,
        }
    }

    #[tokio::test]
    async fn standalone_text_is_stored_and_queued() {
        let mut fx = fixture().await;
        fx.intake
            .handle_unit(unit(42, 1001, Some("Radar fixe sortie 12")))
            .await
            .unwrap();

        let stored = fx
            .store
            .get_report(&ReportId::for_message(42, 1001))
            .await
            .unwrap();
        assert!(stored.is_some());

        let item = fx.queue_rx.recv().await.unwrap();
        assert_eq!(item.report_id, ReportId::for_message(42, 1001));
        assert!(item.preview_text.contains("Radar fixe sortie 12"));

        let texts = fx.transport.texts.lock().unwrap();
        assert!(texts.iter().any(|(_, t)| t.contains("Reçu")));
    }

    #[tokio::test]
    async fn empty_unit_is_ignored() {
        let mut fx = fixture().await;
        fx.intake.handle_unit(unit(42, 1001, None)).await.unwrap();
        assert!(fx.queue_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn muted_sender_is_refused_with_countdown() {
        let mut fx = fixture().await;
        fx.mutes.set(42, Duration::from_secs(3600)).await.unwrap();

        fx.intake
            .handle_unit(unit(42, 1001, Some("spam")))
            .await
            .unwrap();

        assert!(fx.queue_rx.try_recv().is_err());
        let texts = fx.transport.texts.lock().unwrap();
        assert!(texts.iter().any(|(_, t)| t.contains("restreint")));
    }

    #[tokio::test]
    async fn flooding_sender_is_slowed_down() {
        let mut fx = fixture().await;
        fx.intake
            .handle_unit(unit(42, 1, Some("premier")))
            .await
            .unwrap();
        fx.intake
            .handle_unit(unit(42, 2, Some("deuxième")))
            .await
            .unwrap();

        // Only the first submission reaches the queue.
        assert!(fx.queue_rx.recv().await.is_some());
        assert!(fx.queue_rx.try_recv().is_err());

        let texts = fx.transport.texts.lock().unwrap();
        assert!(texts.iter().any(|(_, t)| t.contains("Doucement")));
    }

    #[tokio::test]
    async fn repeated_flooding_escalates_to_a_mute() {
        let mut fx = fixture().await;
        // One admitted submission, then a burst: two throttles and a
        // third strike.
        for n in 1..=4 {
            fx.intake
                .handle_unit(unit(42, n, Some("spam spam")))
                .await
                .unwrap();
        }

        // The strike limit wrote the ledger; only the first item queued.
        assert!(fx.mutes.check(42).await.unwrap().is_some());
        assert!(fx.queue_rx.recv().await.is_some());
        assert!(fx.queue_rx.try_recv().is_err());
        {
            let texts = fx.transport.texts.lock().unwrap();
            assert!(texts.iter().any(|(_, t)| t.contains("Trop d'envois")));
        }

        // The next submission bounces off the mute, not the flood gate.
        fx.intake
            .handle_unit(unit(42, 5, Some("encore")))
            .await
            .unwrap();
        assert!(fx.queue_rx.try_recv().is_err());
        let texts = fx.transport.texts.lock().unwrap();
        assert!(texts.iter().any(|(_, t)| t.contains("Temps restant")));
    }

    #[tokio::test]
    async fn finalize_pump_persists_and_acks_once() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let transport = Arc::new(SilentTransport::default());
        let (queue, mut queue_rx) = review_channel();
        let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();
        let _pump = spawn_finalize_pump(
            finalized_rx,
            store.clone(),
            queue,
            transport.clone(),
        );

        let report = Report {
            id: ReportId::for_album(42, "grp"),
            text: Some("Dashcam accident N104".into()),
            attachments: vec![Attachment::photo("f1"), Attachment::photo("f2")],
            created_at: Utc::now(),
            sender_display: "@alice".into(),
        };
        finalized_tx.send(report.clone()).unwrap();

        let item = queue_rx.recv().await.unwrap();
        assert_eq!(item.report_id, report.id);
        assert!(store.get_report(&report.id).await.unwrap().is_some());

        let texts = transport.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, 42);
    }
}
