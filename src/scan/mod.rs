// src/scan/mod.rs
// =============================================================================
// The scanning engine.
//
// Submodules:
// - feed:   incremental input buffer for the CSS lexer
// - html:   lol_html handlers (HTML plus embedded SVG)
// - css:    hand-written url() scanner
// - svg:    quick-xml reader for standalone SVG
// - walk:   recursive resource walking and the completion barrier
//
// A Scanner holds the immutable configuration (scope, mimetype table,
// optional opener). Each document being scanned gets a ScanTask: the
// document's resolver, its depth in the recursion tree, and a guard on the
// barrier of the root task. Every accepted reference goes to the sink, then
// (when an opener is configured) is opened and scanned in its own task.
// =============================================================================

mod css;
mod feed;
mod html;
mod svg;
mod walk;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tracing::trace;

use crate::config::{MimeTable, ScanConfig};
use crate::error::ScanError;
use crate::open::Opener;
use crate::resolve::{BaseScope, DocumentAddress, Resolution, Resolver};
use crate::sink::{ListSink, Sink};

pub(crate) use walk::Barrier;
use walk::{barrier, BarrierGuard};

use css::CssContext;

/// The document types we can scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mimetype {
    #[serde(rename = "text/html")]
    Html,
    #[serde(rename = "text/css")]
    Css,
    #[serde(rename = "image/svg+xml")]
    Svg,
}

impl Mimetype {
    /// Parses a mimetype, ignoring parameters and case.
    ///
    /// "text/css; charset=utf-8" -> Some(Css), "image/png" -> None
    pub fn from_essence(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or(value).trim();
        [Mimetype::Html, Mimetype::Css, Mimetype::Svg]
            .into_iter()
            .find(|mimetype| essence.eq_ignore_ascii_case(mimetype.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mimetype::Html => "text/html",
            Mimetype::Css => "text/css",
            Mimetype::Svg => "image/svg+xml",
        }
    }
}

impl fmt::Display for Mimetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scanner configuration shared by every task of every scan.
///
/// Cloning is cheap; clones share the same configuration.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Inner {
    scope: BaseScope,
    mimetypes: MimeTable,
    max_depth: usize,
    pipe_capacity: usize,
    opener: Option<Arc<dyn Opener>>,
}

impl Scanner {
    pub fn new(config: &ScanConfig) -> Self {
        Scanner {
            inner: Arc::new(Inner {
                scope: BaseScope::parse(&config.base),
                mimetypes: config.mimetypes.clone(),
                max_depth: config.max_depth,
                pipe_capacity: config.pipe_capacity.max(1),
                opener: None,
            }),
        }
    }

    /// Enables recursive scanning: accepted resources are opened with
    /// `opener` and scanned in turn.
    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Self {
        Arc::make_mut(&mut self.inner).opener = Some(opener);
        self
    }

    pub fn scope(&self) -> &BaseScope {
        &self.inner.scope
    }

    pub fn mimetypes(&self) -> &MimeTable {
        &self.inner.mimetypes
    }

    /// Size of the pipe that feeds a streaming scan.
    pub fn pipe_capacity(&self) -> usize {
        self.inner.pipe_capacity
    }

    pub fn is_recursive(&self) -> bool {
        self.inner.opener.is_some()
    }

    /// Scans `reader` and sends every accepted URI to `sink`.
    ///
    /// Returns once the document and every resource opened recursively from
    /// it have been scanned. Only the root document's failure is returned;
    /// failures of recursively opened resources are logged and dropped.
    pub async fn scan<R>(
        &self,
        reader: R,
        document: &DocumentAddress,
        mimetype: Mimetype,
        sink: Arc<dyn Sink>,
    ) -> Result<(), ScanError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (task, barrier) = self.root(document, sink)?;
        let result = task.run(reader, mimetype).await;
        drop(task);
        barrier.wait().await;
        result
    }

    /// Scans `reader` (recursively when an opener is set) and returns every
    /// accepted URI.
    pub async fn list<R>(
        &self,
        reader: R,
        document: &DocumentAddress,
        mimetype: Mimetype,
    ) -> Result<Vec<String>, ScanError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let sink = Arc::new(ListSink::new());
        self.scan(reader, document, mimetype, sink.clone()).await?;
        Ok(sink.uris())
    }

    /// Root task of a new scan tree plus the barrier that completes when the
    /// root and all of its descendants are dropped.
    pub(crate) fn root(
        &self,
        document: &DocumentAddress,
        sink: Arc<dyn Sink>,
    ) -> Result<(ScanTask, Barrier), ScanError> {
        // the root is being scanned already; a reference back to it is not reopened
        let visited = HashSet::from([document.path().to_string()]);
        let tree = Arc::new(Tree {
            scanner: self.clone(),
            sink,
            visited: Mutex::new(visited),
        });
        let (guard, barrier) = barrier();
        let task = ScanTask::new(tree, document.clone(), 0, guard)?;
        Ok((task, barrier))
    }
}

// State shared by all tasks of one top-level scan
struct Tree {
    scanner: Scanner,
    sink: Arc<dyn Sink>,
    /// URIs already opened for recursive scanning
    visited: Mutex<HashSet<String>>,
}

/// One document being scanned.
pub(crate) struct ScanTask {
    tree: Arc<Tree>,
    resolver: Resolver,
    document: DocumentAddress,
    depth: usize,
    guard: BarrierGuard,
}

impl ScanTask {
    fn new(
        tree: Arc<Tree>,
        document: DocumentAddress,
        depth: usize,
        guard: BarrierGuard,
    ) -> Result<Self, ScanError> {
        let resolver = Resolver::new(&tree.scanner.inner.scope, &document)?;
        Ok(ScanTask {
            tree,
            resolver,
            document,
            depth,
            guard,
        })
    }

    pub(crate) fn document(&self) -> &DocumentAddress {
        &self.document
    }

    pub(crate) async fn run<R>(&self, reader: R, mimetype: Mimetype) -> Result<(), ScanError>
    where
        R: AsyncRead + Unpin + Send,
    {
        match mimetype {
            Mimetype::Html => self.scan_html(reader).await,
            Mimetype::Css => self.scan_css(reader, CssContext::Block).await,
            Mimetype::Svg => self.scan_svg(reader).await,
        }
    }

    // Called by the scanners for every candidate reference, in document order.
    fn reference(&self, raw: &str) -> Result<(), ScanError> {
        match self.resolver.resolve(raw)? {
            Resolution::Accepted(uri) => {
                self.tree.sink.accept(&uri)?;
                self.walk(uri);
            }
            Resolution::Rejected(reason) => {
                trace!(reference = raw, document = %self.document, ?reason, "reference rejected");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FnSink;

    fn scanner() -> Scanner {
        Scanner::new(&ScanConfig::new("example.com/"))
    }

    fn document() -> DocumentAddress {
        DocumentAddress::new("", "/request")
    }

    async fn list(mimetype: Mimetype, input: &str) -> Vec<String> {
        scanner()
            .list(input.as_bytes(), &document(), mimetype)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_construct() {
        let cases = [
            (Mimetype::Html, r#"<img src="/res">"#),
            (Mimetype::Html, r#"<link href="/res">"#),
            (Mimetype::Html, r#"<script src="/res"></script>"#),
            (Mimetype::Html, r#"<img srcset=" /res , /res ">"#),
            (Mimetype::Html, r#"<object data="/res">"#),
            (Mimetype::Html, r#"<source src="/res">"#),
            (Mimetype::Html, r#"<audio src="/res">"#),
            (Mimetype::Html, r#"<video src="/res">"#),
            (Mimetype::Html, r#"<video poster="/res">"#),
            (Mimetype::Html, r#"<track src="/res">"#),
            (Mimetype::Html, r#"<embed src="/res">"#),
            (Mimetype::Html, r#"<input src="/res">"#),
            (Mimetype::Html, r#"<iframe src="/res"></iframe>"#),
            (Mimetype::Css, r#"a { background-image: url("/res"); }"#),
            (Mimetype::Svg, r#"<image href="/res" xlink:href="/res"></image>"#),
            (Mimetype::Svg, r#"<script href="/res" xlink:href="/res"></script>"#),
            (Mimetype::Svg, r#"<feImage href="/res" xlink:href="/res"></feImage>"#),
            (Mimetype::Svg, r#"<color-profile href="/res" xlink:href="/res"></color-profile>"#),
            (Mimetype::Svg, r#"<use href="/res" xlink:href="/res"></use>"#),
            // nested grammars
            (Mimetype::Html, r#"<style>a { background-image: url("/res"); }</style>"#),
            (Mimetype::Html, r#"<x style="background-image: url('/res');">"#),
            (Mimetype::Html, r#"<iframe><img src="/res"></iframe>"#),
            (Mimetype::Html, r#"<svg><image href="/res"></image></svg>"#),
            (Mimetype::Svg, r#"<style>a { background-image: url("/res"); }</style>"#),
            (Mimetype::Svg, r#"<style><![CDATA[a { background: url(/res) }]]></style>"#),
            (Mimetype::Svg, r#"<x style="background-image: url('/res');"></x>"#),
        ];

        for (mimetype, input) in cases {
            let uris = list(mimetype, input).await;
            assert!(!uris.is_empty(), "nothing found in {input}");
            assert!(uris.iter().all(|uri| uri == "/res"), "{input} -> {uris:?}");
        }
    }

    #[tokio::test]
    async fn test_document_order_and_scope() {
        let html = r##"
            <html>
              <head>
                <link rel="stylesheet" href="/style.css">
                <link rel="stylesheet" href="https://cdn.example.org/lib.css">
                <script src="app.js"></script>
              </head>
              <body style="background: url(/bg.png)">
                <a href="/not-a-resource.html">link</a>
                <img src="data:image/gif;base64,R0lGOD" srcset="/a.png 1x, //example.com/b.png 2x">
                <svg><use xlink:href="#icon"/><image href="/in-svg.png"/></svg>
              </body>
            </html>"##;

        assert_eq!(
            list(Mimetype::Html, html).await,
            vec!["/style.css", "/app.js", "/bg.png", "/a.png", "/b.png", "/in-svg.png"]
        );
    }

    #[tokio::test]
    async fn test_data_urls_never_accepted() {
        let css = r#"a { background: url(data:image/png;base64,AAAA) } b { background: url("DATA:x") }"#;
        assert!(list(Mimetype::Css, css).await.is_empty());
    }

    #[tokio::test]
    async fn test_idempotent() {
        let html = r#"<img src="/a.png"><style>p { background: url(b.png) }</style><img src="/c.png">"#;
        let first = list(Mimetype::Html, html).await;
        let second = list(Mimetype::Html, html).await;
        assert_eq!(first, vec!["/a.png", "/b.png", "/c.png"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sink_error_aborts_scan() {
        let sink = Arc::new(FnSink::new(|uri: &str| {
            if uri == "/bad.png" {
                Err(crate::error::SinkError::new(uri, "refused"))
            } else {
                Ok(())
            }
        }));
        let err = scanner()
            .scan(
                &br#"<img src="/bad.png"><img src="/good.png">"#[..],
                &document(),
                Mimetype::Html,
                sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Sink(_)));
    }

    #[tokio::test]
    async fn test_invalid_reference_is_an_error() {
        let err = scanner()
            .list(&br#"<img src="http://[::1/x.png">"#[..], &document(), Mimetype::Html)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Reference { .. }));
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        struct Broken;

        impl AsyncRead for Broken {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _: &mut std::task::Context<'_>,
                _: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                )))
            }
        }

        let err = scanner()
            .list(Broken, &document(), Mimetype::Html)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }

    #[test]
    fn test_mimetype_from_essence() {
        assert_eq!(Mimetype::from_essence("text/html"), Some(Mimetype::Html));
        assert_eq!(
            Mimetype::from_essence("Text/CSS; charset=utf-8"),
            Some(Mimetype::Css)
        );
        assert_eq!(Mimetype::from_essence("image/svg+xml"), Some(Mimetype::Svg));
        assert_eq!(Mimetype::from_essence("image/png"), None);
    }
}
