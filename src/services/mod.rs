pub mod metrics;
pub mod processor;

pub use metrics::Metrics;
pub use processor::{LogProcessor, MessageProcessor};
