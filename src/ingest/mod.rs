//! Inbound content path: flood gate, album aggregation, intake routing.

pub mod album;
pub mod flood;
pub mod intake;

pub use album::AlbumAggregator;
pub use flood::FloodGate;
pub use intake::{Intake, spawn_finalize_pump};
