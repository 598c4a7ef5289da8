pub mod buffer;
pub mod collector;

pub use buffer::{LogBuffer, LogLine};
pub use collector::{LogCollector, LogWindow, parse_logcat_timestamp};
