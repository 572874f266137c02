pub mod sink;
pub mod time;
pub mod types;

pub use sink::{JsonlLogSink, LogSink};
pub use types::{ApiFormat, LogStatus, ProxyLogEntry};
