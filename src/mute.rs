//! Mute/penalty ledger — time-bounded restriction records per sender.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::Store;

/// Thin ledger over the store's mute table. Later mutes supersede earlier
/// ones; records never stack.
#[derive(Clone)]
pub struct MuteLedger {
    store: Arc<dyn Store>,
}

impl MuteLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Mute a sender for `duration` from now. Returns the expiry instant.
    pub async fn set(
        &self,
        sender_id: i64,
        duration: Duration,
    ) -> Result<DateTime<Utc>, DatabaseError> {
        let until = Utc::now() + chrono::Duration::seconds(duration.as_secs() as i64);
        self.store.set_mute(sender_id, until).await?;
        Ok(until)
    }

    /// Remaining mute time for a sender, if any. Expired records are
    /// cleared as they are read, so the entry-point check doubles as lazy
    /// cleanup.
    pub async fn check(&self, sender_id: i64) -> Result<Option<Duration>, DatabaseError> {
        let Some(until) = self.store.get_mute(sender_id).await? else {
            return Ok(None);
        };
        let remaining = until - Utc::now();
        match remaining.to_std() {
            Ok(remaining) if !remaining.is_zero() => Ok(Some(remaining)),
            _ => {
                self.store.clear_mute(sender_id).await?;
                Ok(None)
            }
        }
    }

    /// Remove all expired records. Returns the number removed.
    pub async fn sweep(&self) -> Result<usize, DatabaseError> {
        self.store.sweep_mutes().await
    }
}
