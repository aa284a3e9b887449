// src/scan/html.rs
// =============================================================================
// HTML scanning.
//
// URL-bearing constructs we recognise:
//
//   <link href>                                   stylesheets, icons, preloads
//   <script|img|source|audio|video|track|embed|input|iframe|frame src>
//   <img|source srcset>                           candidate list
//   <video poster>
//   <object data>
//   style="..." on any element                    inline CSS
//   <style>...</style>                            block CSS
//   <iframe>...</iframe>                          HTML, scanned again
//   <svg>...</svg>                                SVG attribute rules apply
//
// lol_html does the tokenizing. Its handlers run synchronously inside
// `write`, so they only record what they saw; after each chunk we drain the
// records in document order and do the async work (sink, nested CSS/HTML).
// Nothing is parsed into a tree and the document is never held in memory.
// =============================================================================

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use lol_html::send::{HtmlRewriter, Settings};
use lol_html::{element, text};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::css::CssContext;
use super::svg;
use super::ScanTask;
use crate::error::ScanError;

const CHUNK: usize = 8 * 1024;

const SRC_TAGS: [&str; 10] = [
    "script", "img", "source", "audio", "video", "track", "embed", "input", "iframe", "frame",
];

// What to do with an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Role {
    Url,
    Srcset,
    Style,
}

fn attribute_role(tag: &str, attr: &str) -> Option<Role> {
    match attr {
        "style" => Some(Role::Style),
        "src" if SRC_TAGS.contains(&tag) => Some(Role::Url),
        "srcset" if tag == "img" || tag == "source" => Some(Role::Srcset),
        "href" if tag == "link" => Some(Role::Url),
        "data" if tag == "object" => Some(Role::Url),
        "poster" if tag == "video" => Some(Role::Url),
        _ => None,
    }
}

// Something a handler found, waiting for the async side
#[derive(Debug, PartialEq)]
enum Item {
    Reference(String),
    Css(String, CssContext),
    Html(String),
}

#[derive(Default)]
struct Collector {
    items: Vec<Item>,
    /// Set by the svg handlers for the element the catch-all handler sees next
    in_svg: bool,
}

impl Collector {
    fn attribute(&mut self, role: Role, value: String, in_svg: bool) {
        match role {
            Role::Url => {
                let uri = if in_svg {
                    svg::collapse_whitespace(&value)
                } else {
                    value.trim().to_string()
                };
                self.items.push(Item::Reference(uri));
            }
            Role::Srcset => self
                .items
                .extend(srcset(&value).into_iter().map(Item::Reference)),
            Role::Style => self.items.push(Item::Css(value, CssContext::Inline)),
        }
    }
}

// Handlers for one document. Handlers matching the same element run in the
// order they are listed, so the svg markers always precede the catch-all.
fn settings(collector: &Arc<Mutex<Collector>>) -> Settings<'static, 'static> {
    let svg_root = Arc::clone(collector);
    let svg_child = Arc::clone(collector);
    let elements = Arc::clone(collector);
    let styles = Arc::clone(collector);
    let frames = Arc::clone(collector);
    let mut css = String::new();
    let mut html = String::new();

    Settings {
        element_content_handlers: vec![
            element!("svg", move |_el| {
                svg_root.lock().in_svg = true;
                Ok(())
            }),
            element!("svg *", move |_el| {
                svg_child.lock().in_svg = true;
                Ok(())
            }),
            element!("*", move |el| {
                let mut collector = elements.lock();
                let in_svg = std::mem::take(&mut collector.in_svg);
                let tag = el.tag_name();
                for attr in el.attributes() {
                    let name = attr.name();
                    let role = if in_svg {
                        svg::attribute_role(&tag, &name)
                    } else {
                        attribute_role(&tag, &name)
                    };
                    if let Some(role) = role {
                        collector.attribute(role, attr.value(), in_svg);
                    }
                }
                Ok(())
            }),
            text!("style", move |chunk| {
                css.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    let block = std::mem::take(&mut css);
                    styles.lock().items.push(Item::Css(block, CssContext::Block));
                }
                Ok(())
            }),
            text!("iframe", move |chunk| {
                html.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    let document = std::mem::take(&mut html);
                    frames.lock().items.push(Item::Html(document));
                }
                Ok(())
            }),
        ],
        ..Settings::new_send()
    }
}

impl ScanTask {
    pub(crate) fn scan_html<'a, R>(&'a self, reader: R) -> BoxFuture<'a, Result<(), ScanError>>
    where
        R: AsyncRead + Unpin + Send + 'a,
    {
        async move {
            let mut reader = reader;
            let collector = Arc::new(Mutex::new(Collector::default()));
            let mut rewriter = HtmlRewriter::new(settings(&collector), |_: &[u8]| {});
            let mut chunk = vec![0u8; CHUNK];

            loop {
                let read = reader.read(&mut chunk).await?;
                if read == 0 {
                    break;
                }
                rewriter.write(&chunk[..read]).map_err(ScanError::markup)?;
                self.drain(&collector).await?;
            }

            rewriter.end().map_err(ScanError::markup)?;
            self.drain(&collector).await
        }
        .boxed()
    }

    // Handles everything recorded so far, in document order.
    async fn drain(&self, collector: &Mutex<Collector>) -> Result<(), ScanError> {
        let items = std::mem::take(&mut collector.lock().items);
        for item in items {
            match item {
                Item::Reference(uri) => self.reference(&uri)?,
                Item::Css(css, context) => self.scan_css(css.as_bytes(), context).await?,
                Item::Html(html) => self.scan_html(html.as_bytes()).await?,
            }
        }
        Ok(())
    }
}

/// Splits a srcset value into candidate URLs, dropping width/density descriptors.
pub(crate) fn srcset(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|candidate| candidate.split_ascii_whitespace().next())
        .map(String::from)
        .collect()
}
