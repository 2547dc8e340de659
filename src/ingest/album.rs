//! Album aggregator — collapses fragment bursts into one reviewable report.
//!
//! Fragments sharing a correlation id land in an in-memory album. Each
//! fragment resets a single debounce timer for that album; when the timer
//! fires with no newer fragment, the album finalizes exactly once and the
//! built report is emitted on the output channel. Finalized albums stay in
//! the map briefly so pathologically late fragments are dropped instead of
//! seeding a duplicate album; the sweep discards them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{Attachment, IncomingUnit, Report, ReportId};

/// Explicit album lifecycle. `Finalized` is terminal; no writes are
/// accepted after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlbumState {
    Collecting,
    Finalized,
}

struct Album {
    sender_id: i64,
    sender_display: String,
    text: Option<String>,
    attachments: Vec<Attachment>,
    last_update: Instant,
    state: AlbumState,
    timer: Option<JoinHandle<()>>,
}

/// Aggregates album fragments and emits finalized reports.
#[derive(Clone)]
pub struct AlbumAggregator {
    albums: Arc<Mutex<HashMap<String, Album>>>,
    debounce: Duration,
    finalized_tx: mpsc::UnboundedSender<Report>,
}

impl AlbumAggregator {
    pub fn new(debounce: Duration, finalized_tx: mpsc::UnboundedSender<Report>) -> Self {
        Self {
            albums: Arc::new(Mutex::new(HashMap::new())),
            debounce,
            finalized_tx,
        }
    }

    /// Feed one fragment. The unit must carry a correlation id.
    pub fn ingest(&self, unit: IncomingUnit) {
        let Some(correlation_id) = unit.correlation_id.clone() else {
            debug!("fragment without correlation id handed to aggregator; ignored");
            return;
        };

        let mut albums = self.albums.lock().unwrap_or_else(|e| e.into_inner());
        let album = albums
            .entry(correlation_id.clone())
            .or_insert_with(|| Album {
                sender_id: unit.sender_id,
                sender_display: unit.sender_display.clone(),
                text: None,
                attachments: Vec::new(),
                last_update: Instant::now(),
                state: AlbumState::Collecting,
                timer: None,
            });

        if album.state == AlbumState::Finalized {
            // Known limitation: a fragment delivered after the debounce
            // window is silently lost; the partial album is already under
            // review.
            debug!(%correlation_id, "late fragment after finalize; dropped");
            return;
        }

        if let Some(attachment) = unit.attachment {
            album.attachments.push(attachment);
        }
        if album.text.is_none() {
            // First non-empty caption wins; later captions are ignored.
            if let Some(text) = unit.text.filter(|t| !t.trim().is_empty()) {
                album.text = Some(text);
            }
        }
        album.last_update = Instant::now();

        // One timer per album: each fragment replaces the previous timer
        // instead of racing a finalize attempt per fragment.
        if let Some(timer) = album.timer.take() {
            timer.abort();
        }
        let aggregator = self.clone();
        album.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(aggregator.debounce).await;
            aggregator.finalize(&correlation_id);
        }));
    }

    /// Finalize an album if it is still collecting. Idempotent: the state
    /// check under the map lock guarantees a single emission per album.
    fn finalize(&self, correlation_id: &str) {
        let report = {
            let mut albums = self.albums.lock().unwrap_or_else(|e| e.into_inner());
            let Some(album) = albums.get_mut(correlation_id) else {
                return;
            };
            if album.state == AlbumState::Finalized {
                return;
            }
            album.state = AlbumState::Finalized;
            album.timer = None;

            Report {
                id: ReportId::for_album(album.sender_id, correlation_id),
                text: album.text.clone(),
                attachments: album.attachments.clone(),
                created_at: Utc::now(),
                sender_display: album.sender_display.clone(),
            }
        };

        info!(
            report_id = %report.id,
            attachments = report.attachments.len(),
            "Album finalized"
        );
        if self.finalized_tx.send(report).is_err() {
            warn!(correlation_id, "finalized album dropped; consumer is gone");
        }
    }

    /// Drop albums (finalized or stalled) untouched for longer than
    /// `max_age`.
    pub fn sweep(&self, max_age: Duration) {
        let now = Instant::now();
        let mut albums = self.albums.lock().unwrap_or_else(|e| e.into_inner());
        albums.retain(|_, album| {
            let keep = now.duration_since(album.last_update) < max_age;
            if !keep {
                if let Some(timer) = album.timer.take() {
                    timer.abort();
                }
            }
            keep
        });
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.albums.lock().unwrap().len()
    }
}
