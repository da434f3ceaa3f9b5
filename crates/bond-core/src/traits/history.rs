// # Historical Log Trait
//
// Replays events the process missed while it was down.
//
// The log is queried with the last checkpoint and yields entries strictly
// newer than it, oldest first. Implementations page lazily: the next page
// is only requested once the consumer has pulled the current one.

use chrono::{DateTime, Utc};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::traits::normalizer::RawEvent;

/// Stream of historical entries in log order
pub type LogStream = Pin<Box<dyn Stream<Item = Result<RawEvent, crate::Error>> + Send + 'static>>;

/// Trait for historical event log implementations
pub trait HistoricalLog: Send + Sync {
    /// Entries with a timestamp strictly after `since`, ordered by timestamp
    ///
    /// A stream item error ends the replay.
    fn fetch_since(&self, since: DateTime<Utc>) -> LogStream;
}
