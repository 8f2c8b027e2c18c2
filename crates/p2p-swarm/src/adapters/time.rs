//! System clock adapter.

use crate::domain::Timestamp;
use crate::ports::TimeSource;

/// Wall-clock [`TimeSource`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Timestamp::new(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}
