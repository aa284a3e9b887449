// src/lib.rs
// =============================================================================
// pushscan: find the local resources a document references while it is
// being sent, and push them to the client ahead of time.
//
// Modules, leaves first:
// - resolve:  URL resolution and the base scope filter
// - scan:     streaming HTML / CSS / SVG scanners and the recursive walker
// - sink:     where accepted URIs go (list, push, cache)
// - open:     resource openers used for recursion (directory, HTTP)
// - cache:    per-request cache of accepted URIs
// - pipeline: the writer that tees a response into a scan
// - push:     the delivery coordinator
// - config, error: shared configuration and error types
// =============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod open;
pub mod pipeline;
pub mod push;
pub mod resolve;
pub mod scan;
pub mod sink;

pub use cache::{Cache, MemoryCache};
pub use config::{MimeTable, ScanConfig};
pub use error::{ConfigError, PushError, ScanError, SinkError};
pub use open::{DirOpener, HttpOpener, Opener, Resource};
pub use pipeline::{PushReader, PushWriter};
pub use push::{Delivery, Push, PushOptions, Pusher, RequestHead, StreamPlan, PUSHED_HEADER};
pub use resolve::{BaseScope, DocumentAddress, Rejection, Resolution, Resolver};
pub use scan::{Mimetype, Scanner};
pub use sink::{CacheSink, FnSink, ListSink, PushSink, Sink};
