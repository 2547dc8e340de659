//! Review queue — unbounded FIFO feeding the single dispatcher consumer.
//!
//! Producers (intake, album finalize, edit re-render) never block: the
//! flood gate already throttles intake, so the queue is allowed to grow
//! under load instead of applying backpressure.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::model::QueueItem;

/// Producer handle for the review queue.
#[derive(Clone)]
pub struct ReviewQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

/// Create the queue and its consumer end.
pub fn review_channel() -> (ReviewQueue, mpsc::UnboundedReceiver<QueueItem>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ReviewQueue { tx }, rx)
}

impl ReviewQueue {
    /// Enqueue an item for review. Strict arrival order, no priorities.
    pub fn push(&self, item: QueueItem) {
        info!(report_id = %item.report_id, "Report queued for review");
        if self.tx.send(item).is_err() {
            warn!("review queue consumer is gone; item dropped");
        }
    }
}
