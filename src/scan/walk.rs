// src/scan/walk.rs
// =============================================================================
// Recursive resource walking.
//
// When a scanner accepts a reference and an opener is configured, the
// resource is opened and scanned in a task of its own, so the referring scan
// never waits for it. Children register on the root's completion barrier by
// holding a clone of its guard; the barrier completes when the last guard is
// dropped, which is when the whole tree has finished.
//
// Opening and scanning a child is best effort: a missing file, an unknown
// mimetype or a malformed child document ends that branch quietly.
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::{Mimetype, ScanTask, Tree};
use crate::open::Opener;
use crate::resolve::DocumentAddress;

/// Held by every live task of a scan tree.
#[derive(Clone)]
pub(crate) struct BarrierGuard {
    _alive: mpsc::Sender<()>,
}

/// Completes once every guard is dropped.
pub(crate) struct Barrier {
    done: mpsc::Receiver<()>,
}

pub(crate) fn barrier() -> (BarrierGuard, Barrier) {
    // nothing is ever sent: recv() returns None once all senders are gone
    let (alive, done) = mpsc::channel(1);
    (BarrierGuard { _alive: alive }, Barrier { done })
}

impl Barrier {
    pub(crate) async fn wait(mut self) {
        let _ = self.done.recv().await;
    }
}

impl ScanTask {
    // Opens and scans `uri` in the background, at most once per scan tree.
    pub(super) fn walk(&self, uri: String) {
        let Some(opener) = self.tree.scanner.inner.opener.clone() else {
            return;
        };
        if self.depth >= self.tree.scanner.inner.max_depth {
            debug!(%uri, depth = self.depth, "recursion depth reached, not opening");
            return;
        }
        if !self.tree.visited.lock().insert(uri.clone()) {
            return;
        }

        let child = Child {
            tree: Arc::clone(&self.tree),
            guard: self.guard.clone(),
            document: self.document.with_path(uri),
            depth: self.depth + 1,
        };
        tokio::spawn(child.run(opener));
    }
}

struct Child {
    tree: Arc<Tree>,
    guard: BarrierGuard,
    document: DocumentAddress,
    depth: usize,
}

impl Child {
    async fn run(self, opener: Arc<dyn Opener>) {
        let uri = self.document.path().to_string();

        let resource = match opener.open(&uri).await {
            Ok(resource) => resource,
            Err(err) => {
                debug!(%uri, error = %err, "could not open resource");
                return;
            }
        };

        // an explicit mimetype wins; the extension table is the fallback
        let mimetype = match resource.mimetype.as_deref() {
            Some(mimetype) => Mimetype::from_essence(mimetype),
            None => self.tree.scanner.mimetypes().lookup(&uri),
        };
        let Some(mimetype) = mimetype else {
            return;
        };

        let task = match ScanTask::new(self.tree, self.document, self.depth, self.guard) {
            Ok(task) => task,
            Err(err) => {
                debug!(%uri, error = %err, "could not scan resource");
                return;
            }
        };
        if let Err(err) = task.run(resource.reader, mimetype).await {
            debug!(%uri, %mimetype, error = %err, "scan of resource failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::ScanConfig;
    use crate::open::Resource;
    use crate::scan::Scanner;

    #[tokio::test]
    async fn test_barrier_waits_for_every_guard() {
        let (guard, barrier) = barrier();
        let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for delay in [30u64, 10, 20] {
            let guard = guard.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.lock().push(delay);
                drop(guard);
            });
        }
        drop(guard);

        barrier.wait().await;
        assert_eq!(finished.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_barrier_without_children() {
        let (guard, barrier) = barrier();
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), barrier.wait())
            .await
            .unwrap();
    }

    // In-memory site; counts how often each URI is opened
    struct Site {
        files: HashMap<&'static str, (Option<&'static str>, &'static str)>,
        opened: parking_lot::Mutex<Vec<String>>,
    }

    impl Site {
        fn new(files: &[(&'static str, Option<&'static str>, &'static str)]) -> Arc<Self> {
            Arc::new(Site {
                files: files
                    .iter()
                    .map(|(uri, mime, body)| (*uri, (*mime, *body)))
                    .collect(),
                opened: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Opener for Site {
        async fn open(&self, uri: &str) -> io::Result<Resource> {
            self.opened.lock().push(uri.to_string());
            // let sibling branches interleave
            tokio::task::yield_now().await;
            let (mimetype, body) = self
                .files
                .get(uri)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, uri.to_string()))?;
            Ok(Resource {
                reader: Box::new(body.as_bytes()),
                mimetype: mimetype.map(str::to_string),
            })
        }
    }

    const ROOT: &str = r#"
        <html>
          <head><link rel="stylesheet" href="/style.css"></head>
          <body>
            <img src="/image.svg">
            <iframe src="/frame.html"></iframe>
            <img src="/missing.png">
          </body>
        </html>"#;

    #[tokio::test]
    async fn test_recursive_list() {
        let site = Site::new(&[
            ("/frame.html", Some("text/html"), r#"<img src="/header.jpg">"#),
            ("/style.css", Some("text/css"), r#"a { background-image: url("/background.jpg"); }"#),
            ("/image.svg", None, r#"<image href="/img1.jpg" xlink:href="/img2.jpg"></image>"#),
        ]);
        let scanner = Scanner::new(&ScanConfig::new("example.com/")).with_opener(site.clone());

        let mut uris = scanner
            .list(ROOT.as_bytes(), &DocumentAddress::new("", "/request"), Mimetype::Html)
            .await
            .unwrap();
        uris.sort();
        assert_eq!(
            uris,
            vec![
                "/background.jpg",
                "/frame.html",
                "/header.jpg",
                "/image.svg",
                "/img1.jpg",
                "/img2.jpg",
                "/missing.png",
                "/style.css",
            ]
        );
    }

    #[tokio::test]
    async fn test_cycles_open_each_resource_once() {
        let site = Site::new(&[
            ("/a.css", None, "x { background: url(/b.css) }"),
            ("/b.css", None, "x { background: url(/a.css) } y { background: url(/a.css) }"),
        ]);
        let scanner = Scanner::new(&ScanConfig::new("/")).with_opener(site.clone());

        let uris = scanner
            .list(
                &br#"<link href="/a.css">"#[..],
                &DocumentAddress::new("example.com", "/"),
                Mimetype::Html,
            )
            .await
            .unwrap();

        // deliveries are not de-duplicated, openings are
        assert_eq!(uris.iter().filter(|uri| *uri == "/a.css").count(), 3);
        let mut opened = site.opened.lock().clone();
        opened.sort();
        assert_eq!(opened, vec!["/a.css", "/b.css"]);
    }

    #[tokio::test]
    async fn test_reference_back_to_root_is_not_reopened() {
        let site = Site::new(&[
            ("/index.html", Some("text/html"), r#"<link href="/style.css">"#),
            ("/style.css", None, "x { background: url(/index.html) }"),
        ]);
        let scanner = Scanner::new(&ScanConfig::new("/")).with_opener(site.clone());

        let uris = scanner
            .list(
                &br#"<link href="/style.css">"#[..],
                &DocumentAddress::new("", "/index.html"),
                Mimetype::Html,
            )
            .await
            .unwrap();

        assert_eq!(uris, vec!["/style.css", "/index.html"]);
        assert_eq!(*site.opened.lock(), vec!["/style.css"]);
    }

    #[tokio::test]
    async fn test_depth_cap() {
        let site = Site::new(&[
            ("/1.css", None, "x { background: url(/2.css) }"),
            ("/2.css", None, "x { background: url(/3.css) }"),
            ("/3.css", None, "x { background: url(/4.png) }"),
        ]);
        let mut config = ScanConfig::new("/");
        config.max_depth = 2;
        let scanner = Scanner::new(&config).with_opener(site.clone());

        let uris = scanner
            .list(
                &b"x { background: url(/1.css) }"[..],
                &DocumentAddress::new("", "/root.css"),
                Mimetype::Css,
            )
            .await
            .unwrap();

        assert_eq!(uris, vec!["/1.css", "/2.css", "/3.css"]);
        assert_eq!(site.opened.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_broken_child_does_not_fail_parent() {
        let site = Site::new(&[(
            "/bad.css",
            None,
            r#"a { background: url("http://[::1/x.png") }"#,
        )]);
        let scanner = Scanner::new(&ScanConfig::new("/")).with_opener(site);

        let uris = scanner
            .list(
                &br#"<link href="/bad.css"><img src="/ok.png">"#[..],
                &DocumentAddress::new("", "/"),
                Mimetype::Html,
            )
            .await
            .unwrap();
        assert_eq!(uris, vec!["/bad.css", "/ok.png"]);
    }

    #[tokio::test]
    async fn test_opener_mimetype_wins_over_extension() {
        let site = Site::new(&[
            ("/pic.svg", Some("image/png"), r#"<image href="/never.png"/>"#),
            ("/sheet", Some("text/css; charset=utf-8"), "a { background: url(/found.png) }"),
        ]);
        let scanner = Scanner::new(&ScanConfig::new("/")).with_opener(site);

        let mut uris = scanner
            .list(
                &br#"<img src="/pic.svg"><link href="/sheet">"#[..],
                &DocumentAddress::new("", "/"),
                Mimetype::Html,
            )
            .await
            .unwrap();
        uris.sort();
        assert_eq!(uris, vec!["/found.png", "/pic.svg", "/sheet"]);
    }
}
