// src/scan/svg.rs
// =============================================================================
// SVG scanning.
//
// SVG is XML, so names keep their case and CDATA sections are text.
// Candidates:
//   <image|script|feImage|color-profile|use href | xlink:href>
//   style="..." on any element     inline CSS
//   <style>...</style>             block CSS (often wrapped in CDATA)
//
// Standalone documents go through quick-xml's async reader. SVG embedded in
// HTML is tokenized by the HTML scanner, which borrows `attribute_role`.
// =============================================================================

use futures::future::{BoxFuture, FutureExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::io::{AsyncRead, BufReader};

use super::css::CssContext;
use super::html::Role;
use super::ScanTask;
use crate::error::ScanError;

const HREF_TAGS: [&str; 5] = ["image", "script", "feImage", "color-profile", "use"];

pub(super) fn attribute_role(tag: &str, attr: &str) -> Option<Role> {
    match attr {
        "style" => Some(Role::Style),
        "href" | "xlink:href" if HREF_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) => {
            Some(Role::Url)
        }
        _ => None,
    }
}

impl ScanTask {
    pub(crate) fn scan_svg<'a, R>(&'a self, reader: R) -> BoxFuture<'a, Result<(), ScanError>>
    where
        R: AsyncRead + Unpin + Send + 'a,
    {
        async move {
            let mut xml = Reader::from_reader(BufReader::new(reader));
            xml.config_mut().check_end_names = false;

            let mut buf = Vec::new();
            // body of the <style> element being read
            let mut style: Option<Vec<u8>> = None;

            loop {
                let event = xml
                    .read_event_into_async(&mut buf)
                    .await
                    .map_err(ScanError::markup)?;
                match event {
                    Event::Start(tag) => {
                        self.svg_element(&tag).await?;
                        if tag.local_name().as_ref() == b"style" {
                            style = Some(Vec::new());
                        }
                    }
                    Event::Empty(tag) => self.svg_element(&tag).await?,
                    Event::Text(text) => {
                        if let Some(css) = style.as_mut() {
                            css.extend_from_slice(&text);
                        }
                    }
                    Event::CData(data) => {
                        if let Some(css) = style.as_mut() {
                            css.extend_from_slice(&data);
                        }
                    }
                    Event::End(tag) if tag.local_name().as_ref() == b"style" => {
                        if let Some(css) = style.take() {
                            self.scan_css(&css[..], CssContext::Block).await?;
                        }
                    }
                    Event::Eof => break,
                    _ => {}
                }
                buf.clear();
            }
            Ok(())
        }
        .boxed()
    }

    async fn svg_element(&self, tag: &BytesStart<'_>) -> Result<(), ScanError> {
        let name = String::from_utf8_lossy(tag.local_name().as_ref()).into_owned();
        for attr in tag.attributes().with_checks(false) {
            let attr = attr.map_err(ScanError::markup)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let Some(role) = attribute_role(&name, &key) else {
                continue;
            };

            let value = String::from_utf8_lossy(&attr.value).into_owned();
            match role {
                Role::Style => self.scan_css(value.as_bytes(), CssContext::Inline).await?,
                Role::Url | Role::Srcset => self.reference(&collapse_whitespace(&value))?,
            }
        }
        Ok(())
    }
}

/// Trims the value and replaces every inner whitespace run with a single space.
pub(super) fn collapse_whitespace(value: &str) -> String {
    value.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}
