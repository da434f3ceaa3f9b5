// # Event Log
//
// Paginated reader over the server's persisted event store, used to
// replay events missed while the process was down.
//
// ## Paging
//
// The first page is requested with `datefrom`, ascending order and a
// page-size limit. Later pages follow the collection's `next` link until
// there is none, or it points back at the page just read.

use bond_core::traits::{HistoricalLog, LogStream, RawEvent};
use bond_core::{Error, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::connection::ApiConnection;
use crate::dto::Collection;

/// Default number of entries requested per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

const EVENTS_PATH: &str = "events";

/// `HistoricalLog` over the server's persisted event store
///
/// Entries are requested oldest first, one page at a time. Pages are
/// fetched by a background task that stops as soon as the consumer drops
/// the stream.
#[derive(Debug, Clone)]
pub struct HttpEventLog {
    conn: ApiConnection,
    page_size: usize,
}

impl HttpEventLog {
    /// Create a log reading pages of [`DEFAULT_PAGE_SIZE`] entries
    pub fn new(conn: ApiConnection) -> Self {
        Self::with_page_size(conn, DEFAULT_PAGE_SIZE)
    }

    /// Create a log reading pages of `page_size` entries, at least one
    pub fn with_page_size(conn: ApiConnection, page_size: usize) -> Self {
        Self {
            conn,
            page_size: page_size.max(1),
        }
    }

    /// URL of the first page of entries after `since`
    pub fn first_page_url(&self, since: DateTime<Utc>) -> String {
        format!(
            "{}?datefrom={}&asc=true&limit={}",
            self.conn.url(EVENTS_PATH),
            since.timestamp_millis(),
            self.page_size
        )
    }
}

impl HistoricalLog for HttpEventLog {
    fn fetch_since(&self, since: DateTime<Utc>) -> LogStream {
        let (tx, rx) = mpsc::channel(self.page_size);
        let conn = self.conn.clone();
        let first = self.first_page_url(since);

        tokio::spawn(async move {
            tracing::info!("Fetching missed events since {}", since.to_rfc3339());
            let mut next = Some(first);
            let mut fetched = 0usize;

            while let Some(url) = next.take() {
                let page: Collection<RawEvent> = match conn.get_json(&url).await {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::event_log(format!(
                                "Failed to fetch event page {}: {}",
                                url, e
                            ))))
                            .await;
                        return;
                    }
                };

                next = page
                    .next()
                    .map(|href| conn.url(href))
                    .filter(|href| *href != url);

                for entry in page.collection {
                    fetched += 1;
                    if tx.send(Ok(entry)).await.is_err() {
                        tracing::debug!("Event log consumer gone, stopping");
                        return;
                    }
                }
            }
            tracing::debug!("Event log exhausted after {} entries", fetched);
        });

        Box::pin(ReceiverStream::<Result<RawEvent>>::new(rx))
    }
}
