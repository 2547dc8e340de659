//! Operator review pipeline: queue, dispatcher, decision handling.

pub mod decision;
pub mod dispatcher;
pub mod queue;

pub use decision::DecisionHandler;
pub use dispatcher::Dispatcher;
pub use queue::{ReviewQueue, review_channel};
