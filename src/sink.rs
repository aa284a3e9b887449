// src/sink.rs
// =============================================================================
// Reference sinks.
//
// The scanners know exactly one thing about where accepted URIs go: the Sink
// trait, a single `accept(uri)` method. What happens next is up to the
// implementation:
//
// - ListSink:  collects URIs into a Vec (listing, tests)
// - FnSink:    wraps any closure
// - PushSink:  pushes each URI to the client, marked as a push
// - CacheSink: forwards to another sink and records the URI for the cache
//
// A sink is shared by every task of a scan tree, so it is called
// concurrently from recursive branches; hence `Send + Sync` and interior
// locking.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::SinkError;
use crate::push::{PushOptions, Pusher};

/// Receives every accepted URI, in document order within one scan task.
///
/// Returning an error aborts the scan task that found the URI.
pub trait Sink: Send + Sync {
    fn accept(&self, uri: &str) -> Result<(), SinkError>;
}

/// A sink made from a closure.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&str) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnSink { f }
    }
}

impl<F> Sink for FnSink<F>
where
    F: Fn(&str) -> Result<(), SinkError> + Send + Sync,
{
    fn accept(&self, uri: &str) -> Result<(), SinkError> {
        (self.f)(uri)
    }
}

/// Collects accepted URIs in the order they arrive.
#[derive(Default)]
pub struct ListSink {
    uris: Mutex<Vec<String>>,
}

impl ListSink {
    pub fn new() -> Self {
        ListSink::default()
    }

    /// Snapshot of everything collected so far.
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }
}

impl Sink for ListSink {
    fn accept(&self, uri: &str) -> Result<(), SinkError> {
        self.uris.lock().push(uri.to_string());
        Ok(())
    }
}

/// Pushes every accepted URI over a push-capable channel.
///
/// A refused push never stops the scan: the first failure is kept for the
/// pipeline to report at close and the following URIs are still pushed.
pub struct PushSink {
    pusher: Arc<dyn Pusher>,
    options: PushOptions,
    pushed: AtomicUsize,
    first_error: Mutex<Option<SinkError>>,
}

impl PushSink {
    /// `options` should carry the push marker; see `PushOptions::marked`.
    pub fn new(pusher: Arc<dyn Pusher>, options: PushOptions) -> Self {
        PushSink {
            pusher,
            options,
            pushed: AtomicUsize::new(0),
            first_error: Mutex::new(None),
        }
    }

    /// Number of successful pushes.
    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Takes the first recorded delivery failure, if any.
    pub fn take_error(&self) -> Option<SinkError> {
        self.first_error.lock().take()
    }
}

impl PushSink {
    /// Pushes `uri`. A failure is logged and kept, never returned.
    pub fn deliver(&self, uri: &str) {
        match self.pusher.push(uri, &self.options) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(%uri, error = %err, "push failed");
                let mut first = self.first_error.lock();
                if first.is_none() {
                    *first = Some(SinkError::new(uri, err));
                }
            }
        }
    }
}

impl Sink for PushSink {
    fn accept(&self, uri: &str) -> Result<(), SinkError> {
        self.deliver(uri);
        Ok(())
    }
}

/// Forwards to an inner sink and remembers each URI it accepted.
///
/// Nothing reaches the cache until `commit`, which the owner calls once the
/// scan has finished cleanly. A failed or unfinished scan leaves no entry.
pub struct CacheSink {
    inner: Arc<dyn Sink>,
    cache: Arc<dyn Cache>,
    key: String,
    accepted: Mutex<Vec<String>>,
}

impl CacheSink {
    pub fn new(inner: Arc<dyn Sink>, cache: Arc<dyn Cache>, key: impl Into<String>) -> Self {
        CacheSink {
            inner,
            cache,
            key: key.into(),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes everything accepted so far as the cache entry, replacing any
    /// previous one.
    pub fn commit(&self) {
        let accepted = self.accepted.lock();
        debug!(key = %self.key, uris = accepted.len(), "caching scan result");
        self.cache.replace(&self.key, &accepted);
    }
}

impl Sink for CacheSink {
    fn accept(&self, uri: &str) -> Result<(), SinkError> {
        self.inner.accept(uri)?;
        self.accepted.lock().push(uri.to_string());
        Ok(())
    }
}
