//! Processing checkpoint
//!
//! The timestamp of the most recently fully processed event. It only ever
//! moves forward.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Monotonic high-water mark of processed event time
#[derive(Debug, Default)]
pub struct Checkpoint {
    value: Mutex<Option<DateTime<Utc>>>,
}

impl Checkpoint {
    /// An empty checkpoint
    pub fn new() -> Self {
        Self::default()
    }

    /// A checkpoint seeded from a previous run
    pub fn with_initial(initial: Option<DateTime<Utc>>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// Current value
    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `ts` if it is newer than the current value
    ///
    /// Returns whether the checkpoint moved.
    pub fn advance(&self, ts: DateTime<Utc>) -> bool {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        match *value {
            Some(current) if current >= ts => false,
            _ => {
                *value = Some(ts);
                info!("Checkpoint advanced to {}", ts.to_rfc3339());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_advance_only_moves_forward() {
        let checkpoint = Checkpoint::new();
        assert_eq!(checkpoint.get(), None);

        assert!(checkpoint.advance(at(20)));
        assert!(!checkpoint.advance(at(10)));
        assert!(!checkpoint.advance(at(20)));
        assert_eq!(checkpoint.get(), Some(at(20)));

        assert!(checkpoint.advance(at(30)));
        assert_eq!(checkpoint.get(), Some(at(30)));
    }

    #[test]
    fn test_with_initial() {
        let checkpoint = Checkpoint::with_initial(Some(at(100)));
        assert!(!checkpoint.advance(at(50)));
        assert_eq!(checkpoint.get(), Some(at(100)));
    }
}
