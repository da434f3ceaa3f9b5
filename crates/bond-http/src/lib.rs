// # HTTP Collaborators
//
// This crate provides the REST implementations of the collaborators the
// outbound client consumes:
//
// - `HttpResourceClient`: fetch and write entities, report the API version
// - `HttpEntityResolver`: resolve VM references, find the current user
// - `HttpEventLog`: page through the server's persisted event log
// - `preload_cache`: walk datacenters, racks and machines to seed the cache
//
// All of them share one `ApiConnection` (base URL, credentials and a pooled
// `reqwest::Client`).
//
// ## Scope
//
// Every call is single-shot. Nothing here retries, backs off or caches
// beyond the request at hand; failures are returned to the caller, which
// reports them through the notifier.
//
// ## Security
//
// - The password NEVER appears in logs
// - `Debug` output redacts it

mod connection;
mod dto;
mod history;
mod preload;
mod resolver;
mod resources;

#[cfg(test)]
mod test_server;

pub use connection::{ApiConnection, DEFAULT_HTTP_TIMEOUT};
pub use dto::{Collection, Link, ResourceDto, VirtualMachineDto, find_link};
pub use history::{DEFAULT_PAGE_SIZE, HttpEventLog};
pub use preload::preload_cache;
pub use resolver::HttpEntityResolver;
pub use resources::HttpResourceClient;
