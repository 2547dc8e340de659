//! tipline — anonymous report relay with operator review.
//!
//! Senders submit text, photos and videos to the bot in private. Every
//! submission becomes a pending report, rendered into a private operator
//! group with inline controls. Approved reports are published to the
//! public group, routed by keyword into forum topics; rejected ones are
//! discarded, optionally muting the sender.

pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod model;
pub mod mute;
pub mod review;
pub mod routing;
pub mod store;
pub mod sweeper;
pub mod transport;
