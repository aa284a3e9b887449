// src/open/mod.rs
// =============================================================================
// Resource openers.
//
// An opener turns an accepted URI back into bytes so the scanner can follow
// references recursively. Two implementations ship with the crate:
//
// - DirOpener:  files beneath a root directory
// - HttpOpener: GET requests against an origin server
//
// Openers are shared by every branch of every scan, so they must be safe to
// call concurrently.
// =============================================================================

mod file;
mod http;

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use file::DirOpener;
pub use http::HttpOpener;

/// An opened resource.
pub struct Resource {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Mimetype reported by the source (e.g. a Content-Type header).
    /// None means "look it up by extension".
    pub mimetype: Option<String>,
}

#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self, uri: &str) -> io::Result<Resource>;
}
