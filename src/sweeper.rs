//! Background sweeper — periodic cleanup of expired state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ingest::{AlbumAggregator, FloodGate};
use crate::model::ReportId;
use crate::mute::MuteLedger;
use crate::store::Store;
use crate::transport::Transport;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Albums untouched this long are assumed orphaned (finalize never fired
/// because the process restarted mid-burst, or the timer was lost).
const ALBUM_MAX_AGE: Duration = Duration::from_secs(60);

/// Flood gate entries idle this long carry no throttling signal anymore.
const FLOOD_IDLE: Duration = Duration::from_secs(3600);

/// Periodic cleanup of expired reports, mutes, stale albums and flood
/// state. Expiring a report also tears down its rendered messages in the
/// admin chat, so operators never see controls for a report that is gone.
pub struct Sweeper {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    mutes: MuteLedger,
    albums: AlbumAggregator,
    flood: Arc<FloodGate>,
    admin_chat: i64,
    report_max_age: Duration,
}

impl Sweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        mutes: MuteLedger,
        albums: AlbumAggregator,
        flood: Arc<FloodGate>,
        admin_chat: i64,
        report_max_age: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            mutes,
            albums,
            flood,
            admin_chat,
            report_max_age,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick fires immediately; skip it so startup stays quiet.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }

    /// One full cleanup pass.
    pub async fn sweep_once(&self) {
        match self.store.expire_reports(self.report_max_age).await {
            Ok(expired) if expired.is_empty() => {}
            Ok(expired) => {
                info!(count = expired.len(), "Expired unreviewed reports");
                for id in &expired {
                    self.purge_artifact(id).await;
                }
            }
            Err(e) => warn!(error = %e, "Report expiry sweep failed"),
        }
        match self.mutes.sweep().await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Cleared expired mutes"),
            Err(e) => warn!(error = %e, "Mute sweep failed"),
        }
        self.albums.sweep(ALBUM_MAX_AGE);
        self.flood.sweep(FLOOD_IDLE);
        debug!("Sweep pass complete");
    }

    /// Delete an expired report's rendered admin messages. Message deletion
    /// is best effort; the outbox rows go regardless so nothing re-purges
    /// the same artifact next pass.
    async fn purge_artifact(&self, id: &ReportId) {
        let message_ids = match self.store.outbox_messages(id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(report_id = %id, error = %e, "Failed to read outbox for expired report");
                return;
            }
        };
        for message_id in message_ids {
            if let Err(e) = self.transport.delete_message(self.admin_chat, message_id).await {
                warn!(report_id = %id, message_id, error = %e, "Failed to delete expired artifact");
            }
        }
        if let Err(e) = self.store.clear_outbox(id).await {
            warn!(report_id = %id, error = %e, "Failed to clear outbox for expired report");
        }
    }
}
