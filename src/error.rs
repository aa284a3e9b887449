// src/error.rs
// =============================================================================
// Error types shared by every module of the library.
//
// The taxonomy follows the life of one push-accelerated response:
// - ScanError:  a scan task failed (I/O, markup, bad reference, unsupported type)
// - SinkError:  a sink refused one accepted URI
// - PushError:  setup-time capability conditions plus whatever the pipeline
//               reports when it is closed
// - ConfigError: loading a JSON configuration file
//
// thiserror derives Display and std::error::Error for us, so callers can use
// `?` everywhere and the binary can wrap them in anyhow.
// =============================================================================

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by collaborators we do not own (pushers, custom sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single scan task.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The byte stream being scanned failed (anything but a clean end-of-stream)
    #[error("I/O error while scanning: {0}")]
    Io(#[from] io::Error),

    /// The HTML or XML tokenizer gave up on the input
    #[error("malformed markup: {0}")]
    Markup(#[source] BoxError),

    /// A reference found in the markup is not a valid URL reference
    #[error("invalid resource reference {reference:?}: {source}")]
    Reference {
        reference: String,
        #[source]
        source: url::ParseError,
    },

    /// The document address cannot be turned into a base URL
    #[error("invalid document address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: url::ParseError,
    },

    /// A sink refused an accepted URI
    #[error("sink rejected resource: {0}")]
    Sink(#[from] SinkError),

    /// The mimetype has no scanner
    #[error("mimetype has no parser: {0:?}")]
    NoParser(String),
}

impl ScanError {
    pub(crate) fn markup(err: impl Into<BoxError>) -> Self {
        ScanError::Markup(err.into())
    }
}

/// A sink's refusal of one accepted URI.
#[derive(Debug, Error)]
#[error("{uri}: {source}")]
pub struct SinkError {
    pub uri: String,
    #[source]
    pub source: BoxError,
}

impl SinkError {
    pub fn new(uri: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SinkError {
            uri: uri.into(),
            source: source.into(),
        }
    }
}

/// Conditions reported by the delivery coordinator and the streaming pipeline.
///
/// The first three are capability conditions: they are returned before any
/// scanning starts and only mean "serve this response without acceleration".
#[derive(Debug, Error)]
pub enum PushError {
    /// The inbound request was itself produced by a push
    #[error("recursive push")]
    RecursivePush,

    /// The outgoing channel cannot push
    #[error("response channel does not support push")]
    NoPusher,

    /// The response mimetype is not scanned
    #[error("mimetype has no parser: {0:?}")]
    NoParser(String),

    #[error(transparent)]
    Scan(#[from] ScanError),

    /// First push delivery that failed during the scan
    #[error("push delivery failed for {0}")]
    Delivery(#[source] SinkError),

    /// Flushing the downstream channel failed at close
    #[error("downstream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The background scan task panicked or was cancelled
    #[error("scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PushError {
    /// True for the setup-time conditions that only mean "no acceleration".
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            PushError::RecursivePush | PushError::NoPusher | PushError::NoParser(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_errors() {
        assert!(PushError::RecursivePush.is_capability());
        assert!(PushError::NoPusher.is_capability());
        assert!(PushError::NoParser("image/png".into()).is_capability());

        let io = PushError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!io.is_capability());
    }

    #[test]
    fn test_sink_error_display() {
        let err = SinkError::new("/style.css", "stream refused");
        assert_eq!(err.to_string(), "/style.css: stream refused");
    }
}
