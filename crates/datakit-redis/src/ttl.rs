//! Cache-entry lifetime policy

use std::time::Duration;

/// Expiry policy for entries in a collection
///
/// `Sliding` measures the lifetime from the last read; every successful
/// `get` refreshes the expiry. `Absolute` measures it from the write and
/// reads leave it alone. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeToLive {
    /// Entries never expire
    #[default]
    None,
    /// Expiry window restarts on every read
    Sliding(Duration),
    /// Fixed lifetime from the time of the write
    Absolute(Duration),
}

impl TimeToLive {
    pub fn sliding(window: Duration) -> Self {
        TimeToLive::Sliding(window)
    }

    pub fn absolute(lifetime: Duration) -> Self {
        TimeToLive::Absolute(lifetime)
    }

    /// The expiry to apply at write time, if any
    pub fn expiry(&self) -> Option<Duration> {
        match self {
            TimeToLive::None => None,
            TimeToLive::Sliding(d) | TimeToLive::Absolute(d) => Some(*d),
        }
    }

    /// Whether reads refresh the expiry
    pub fn is_sliding(&self) -> bool {
        matches!(self, TimeToLive::Sliding(_))
    }
}
