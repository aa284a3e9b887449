// src/open/http.rs
// =============================================================================
// Opening accepted URIs from an origin server over HTTP.
//
// The response body is streamed: reqwest's byte stream is wrapped in a
// StreamReader, so the scanner pulls chunks as it needs them and a large
// resource is never held in memory as a whole. A connection that fails
// mid-body surfaces as an I/O error on the reader, not as a short document.
// =============================================================================

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::io::AsyncRead;
use tokio_util::bytes::Buf;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::{Opener, Resource};
use crate::error::BoxError;

#[derive(Debug, Clone)]
pub struct HttpOpener {
    client: Client,
    origin: Url,
}

impl HttpOpener {
    /// Opener for `origin` ("https://example.com/") with a default client.
    pub fn new(origin: Url) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(HttpOpener::with_client(client, origin))
    }

    pub fn with_client(client: Client, origin: Url) -> Self {
        HttpOpener { client, origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Absolute URL of an accepted URI on the origin.
    pub fn url_for(&self, uri: &str) -> io::Result<Url> {
        self.origin
            .join(uri)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
    }
}

#[async_trait]
impl Opener for HttpOpener {
    async fn open(&self, uri: &str) -> io::Result<Resource> {
        let url = self.url_for(uri)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{url}: HTTP {status}"),
            ));
        }

        let mimetype = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        debug!(%url, ?mimetype, "opened resource");

        Ok(Resource {
            reader: body_reader(response.bytes_stream()),
            mimetype,
        })
    }
}

// Turns a body stream into a reader; stream errors become io::Errors.
fn body_reader<S, B, E>(body: S) -> Box<dyn AsyncRead + Send + Unpin>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Buf + Send + 'static,
    E: Into<BoxError>,
{
    let body = body.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    Box::new(StreamReader::new(Box::pin(body)))
}
