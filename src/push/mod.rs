// src/push/mod.rs
// =============================================================================
// The delivery coordinator.
//
// Given an inbound request and the response channel, `Push::prepare` decides
// how (and whether) the response gets accelerated. The checks run in order:
//
// 1. request carries `X-Pushed: 1`  -> PushError::RecursivePush
// 2. no push capability              -> PushError::NoPusher
// 3. mimetype we cannot scan         -> PushError::NoParser
// 4. cache hit                       -> replay the recorded URIs, no scan
//    cache miss / no cache           -> a streaming plan
//
// The first three are capability conditions: the caller just serves the
// response as is. Every push we make carries the marker, so when the client
// later requests a pushed resource through the normal channel, step 1 keeps
// us from scanning it a second time.
// =============================================================================

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncWrite;
use tracing::info;

use crate::cache::Cache;
use crate::error::{BoxError, PushError, SinkError};
use crate::pipeline::{scan_stream, PushWriter};
use crate::resolve::DocumentAddress;
use crate::scan::{Mimetype, Scanner};
use crate::sink::{CacheSink, PushSink, Sink};

/// Header marking a request as the product of a push.
pub const PUSHED_HEADER: &str = "x-pushed";

const PUSHED_VALUE: &str = "1";

/// Options sent along with every push.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub headers: HeaderMap,
}

impl PushOptions {
    /// Options carrying the `X-Pushed: 1` marker.
    pub fn marked() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(PUSHED_HEADER),
            HeaderValue::from_static(PUSHED_VALUE),
        );
        PushOptions { headers }
    }

    pub fn is_marked(&self) -> bool {
        is_marked(&self.headers)
    }
}

/// A channel that can push resources to the client.
pub trait Pusher: Send + Sync {
    fn push(&self, uri: &str, options: &PushOptions) -> Result<(), BoxError>;
}

/// The parts of an inbound request the coordinator looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub host: String,
    /// Request URI as received ("/index.html?x=1")
    pub uri: String,
    pub headers: HeaderMap,
    /// Response mimetype when the handler knows it; otherwise it comes from
    /// the URI's extension.
    pub mimetype: Option<String>,
}

impl RequestHead {
    pub fn new(host: impl Into<String>, uri: impl Into<String>) -> Self {
        RequestHead {
            host: host.into(),
            uri: uri.into(),
            ..RequestHead::default()
        }
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn is_pushed(&self) -> bool {
        is_marked(&self.headers)
    }

    pub fn document(&self) -> DocumentAddress {
        DocumentAddress::from_request(&self.host, &self.uri)
    }
}

fn is_marked(headers: &HeaderMap) -> bool {
    headers
        .get(PUSHED_HEADER)
        .is_some_and(|value| value.as_bytes() == PUSHED_VALUE.as_bytes())
}

/// Outcome of a successful `Push::prepare`.
pub enum Delivery {
    /// The cache knew this response: its URIs were pushed right away.
    /// `error` is the first push that failed, if any.
    Replayed {
        pushed: usize,
        error: Option<SinkError>,
    },
    /// Scan the response while it is written.
    Stream(StreamPlan),
}

/// Everything needed to wrap the response writer.
pub struct StreamPlan {
    scanner: Scanner,
    document: DocumentAddress,
    mimetype: Mimetype,
    push: Arc<PushSink>,
    cache: Option<(Arc<dyn Cache>, String)>,
}

impl StreamPlan {
    pub fn mimetype(&self) -> Mimetype {
        self.mimetype
    }

    /// Wraps `downstream`. Write the response through the returned writer,
    /// then `close` it to learn how scanning and pushing went.
    pub fn writer<W>(self, downstream: W) -> Result<PushWriter<W>, PushError>
    where
        W: AsyncWrite + Unpin,
    {
        let StreamPlan {
            scanner,
            document,
            mimetype,
            push,
            cache,
        } = self;

        // the cache entry is written only after a clean scan of the whole tree
        let recorder = cache.map(|(cache, key)| Arc::new(CacheSink::new(push.clone(), cache, key)));
        let sink: Arc<dyn Sink> = match &recorder {
            Some(recorder) => recorder.clone() as Arc<dyn Sink>,
            None => push.clone() as Arc<dyn Sink>,
        };
        let (task, barrier) = scanner.root(&document, sink)?;

        Ok(PushWriter::spawn(downstream, scanner.pipe_capacity(), move |reader| async move {
            scan_stream(task, barrier, reader, mimetype).await?;
            if let Some(recorder) = recorder {
                recorder.commit();
            }
            match push.take_error() {
                Some(err) => Err(PushError::Delivery(err)),
                None => Ok(()),
            }
        }))
    }
}

/// Push coordinator: a scanner plus an optional result cache.
#[derive(Clone)]
pub struct Push {
    scanner: Scanner,
    cache: Option<Arc<dyn Cache>>,
}

impl Push {
    pub fn new(scanner: Scanner) -> Self {
        Push {
            scanner,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Decides how to accelerate the response to `request`.
    ///
    /// `pusher` is None when the response channel cannot push.
    pub fn prepare(
        &self,
        request: &RequestHead,
        pusher: Option<Arc<dyn Pusher>>,
    ) -> Result<Delivery, PushError> {
        if request.is_pushed() {
            return Err(PushError::RecursivePush);
        }
        let pusher = pusher.ok_or(PushError::NoPusher)?;

        let document = request.document();
        let mimetype = match &request.mimetype {
            Some(mimetype) => Mimetype::from_essence(mimetype)
                .ok_or_else(|| PushError::NoParser(mimetype.clone()))?,
            None => {
                let table = self.scanner.mimetypes();
                table.lookup(document.path()).ok_or_else(|| {
                    PushError::NoParser(table.get(document.path()).unwrap_or_default().to_string())
                })?
            }
        };

        let push = Arc::new(PushSink::new(pusher, PushOptions::marked()));

        let Some(cache) = &self.cache else {
            return Ok(Delivery::Stream(StreamPlan {
                scanner: self.scanner.clone(),
                document,
                mimetype,
                push,
                cache: None,
            }));
        };

        let key = document.key();
        if let Some(uris) = cache.get(&key) {
            for uri in &uris {
                push.deliver(uri);
            }
            info!(%key, count = uris.len(), "replayed cached pushes");
            return Ok(Delivery::Replayed {
                pushed: push.pushed(),
                error: push.take_error(),
            });
        }

        Ok(Delivery::Stream(StreamPlan {
            scanner: self.scanner.clone(),
            document,
            mimetype,
            push,
            cache: Some((cache.clone(), key)),
        }))
    }
}
