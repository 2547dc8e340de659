//! Dispatcher — single consumer rendering queue items for the operators.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::{QueueItem, review_controls};
use crate::store::Store;
use crate::transport::{Destination, Transport};

/// Drains the review queue and renders each item into the admin chat:
/// a text preview carrying the action controls, followed by the media.
/// Every produced message id is recorded in the report's outbox so the
/// artifact can be deleted or replaced later.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    admin_chat: i64,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>, admin_chat: i64) -> Self {
        Self {
            store,
            transport,
            admin_chat,
        }
    }

    /// Consumer loop. Errors are contained per item; the loop never dies.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
        info!("Review dispatcher started");
        while let Some(item) = rx.recv().await {
            if let Err(e) = self.render(&item).await {
                error!(report_id = %item.report_id, error = %e, "Failed to render review artifact");
            }
        }
        info!("Review queue closed; dispatcher stopping");
    }

    /// Render one item. The preview goes first because the controls ride
    /// on it: if it fails the item is aborted and the operator never sees
    /// a half-rendered artifact without buttons. A later attachment
    /// failure does not roll the preview back.
    pub async fn render(&self, item: &QueueItem) -> Result<()> {
        // A re-render (edit flow) replaces the previous outbox set.
        self.store.clear_outbox(&item.report_id).await?;

        let controls = review_controls(&item.report_id);
        let preview_id = self
            .transport
            .send_text(
                Destination::chat(self.admin_chat),
                &item.preview_text,
                &controls,
            )
            .await?;
        self.store
            .add_outbox_message(&item.report_id, preview_id)
            .await?;

        if !item.attachments.is_empty() {
            match self
                .transport
                .send_media(Destination::chat(self.admin_chat), &item.attachments, None)
                .await
            {
                Ok(message_ids) => {
                    for message_id in message_ids {
                        self.store
                            .add_outbox_message(&item.report_id, message_id)
                            .await?;
                    }
                }
                Err(e) => {
                    warn!(
                        report_id = %item.report_id,
                        error = %e,
                        "Attachment render failed; preview stands"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::error::TransportError;
    use crate::model::{Attachment, Control, Report, ReportId};
    use crate::store::LibSqlStore;

    #[derive(Default)]
    struct RecordingTransport {
        fail_text: AtomicBool,
        fail_media: AtomicBool,
        next_id: Mutex<i64>,
        sent_controls: Mutex<Vec<Vec<Control>>>,
    }

    impl RecordingTransport {
        fn next(&self) -> i64 {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            *id
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(
            &self,
            _dest: Destination,
            _text: &str,
            controls: &[Control],
        ) -> Result<i64, TransportError> {
            if self.fail_text.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            self.sent_controls.lock().unwrap().push(controls.to_vec());
            Ok(self.next())
        }

        async fn send_media(
            &self,
            _dest: Destination,
            attachments: &[Attachment],
            _caption: Option<&str>,
        ) -> Result<Vec<i64>, TransportError> {
            if self.fail_media.load(Ordering::SeqCst) {
                return Err(TransportError::Http("boom".into()));
            }
            Ok((0..attachments.len()).map(|_| self.next()).collect())
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

    fn item_with_attachments(n: usize) -> QueueItem {
        QueueItem::from(&Report {
            id: ReportId::for_message(42, 1001),
            text: Some("Radar mobile A7".into()),
            attachments: (0..n).map(|i| Attachment::photo(format!("f{i}"))).collect(),
            created_at: Utc::now(),
            sender_display: "@alice".into(),
        })
    }

    async fn fixture() -> (Dispatcher, Arc<LibSqlStore>, Arc<RecordingTransport>) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), -100);
        (dispatcher, store, transport)
    }

    #[tokio::test]
    async fn render_records_every_message_in_outbox() {
        let (dispatcher, store, transport) = fixture().await;
        let item = item_with_attachments(3);

        dispatcher.render(&item).await.unwrap();

        // Preview + 3 media messages.
        let outbox = store.outbox_messages(&item.report_id).await.unwrap();
        assert_eq!(outbox.len(), 4);

        // The preview carried the four review controls.
        let controls = transport.sent_controls.lock().unwrap();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].len(), 4);
    }

    #[tokio::test]
    async fn preview_failure_aborts_the_item() {
        let (dispatcher, store, transport) = fixture().await;
        transport.fail_text.store(true, Ordering::SeqCst);
        let item = item_with_attachments(2);

        assert!(dispatcher.render(&item).await.is_err());
        assert!(store.outbox_messages(&item.report_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attachment_failure_keeps_the_preview() {
        let (dispatcher, store, transport) = fixture().await;
        transport.fail_media.store(true, Ordering::SeqCst);
        let item = item_with_attachments(2);

        dispatcher.render(&item).await.unwrap();

        let outbox = store.outbox_messages(&item.report_id).await.unwrap();
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn rerender_replaces_the_previous_outbox_set() {
        let (dispatcher, store, _transport) = fixture().await;
        let item = item_with_attachments(1);

        dispatcher.render(&item).await.unwrap();
        dispatcher.render(&item).await.unwrap();

        // At most one live outbox set per report.
        let outbox = store.outbox_messages(&item.report_id).await.unwrap();
        assert_eq!(outbox.len(), 2);
    }

    #[tokio::test]
    async fn run_loop_survives_a_failing_item() {
        let (dispatcher, store, transport) = fixture().await;
        let (tx, rx) = mpsc::unbounded_channel();
        transport.fail_text.store(true, Ordering::SeqCst);

        let transport_clone = transport.clone();
        let handle = tokio::spawn(dispatcher.run(rx));

        tx.send(item_with_attachments(0)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        transport_clone.fail_text.store(false, Ordering::SeqCst);
        tx.send(item_with_attachments(0)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let outbox = store
            .outbox_messages(&ReportId::for_message(42, 1001))
            .await
            .unwrap();
        assert_eq!(outbox.len(), 1);

        drop(tx);
        handle.await.unwrap();
    }
}
