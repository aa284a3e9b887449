// src/config.rs
// =============================================================================
// Scan configuration.
//
// A ScanConfig can be built in code, loaded from a JSON file, or assembled by
// the CLI from flags. It carries:
// - the base scope ("example.com/" or "/assets/")
// - the extension -> mimetype table (an injected value, never global state)
// - the recursion depth cap
// - the capacity of the duplication pipe used by the streaming pipeline
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scan::Mimetype;

/// Default capacity of the pipe feeding the scanner (64 KiB).
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Default recursion depth cap.
pub const DEFAULT_MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Base scope, "host/prefix" or "/prefix"
    pub base: String,
    pub mimetypes: MimeTable,
    pub max_depth: usize,
    pub pipe_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            base: "/".to_string(),
            mimetypes: MimeTable::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl ScanConfig {
    pub fn new(base: impl Into<String>) -> Self {
        ScanConfig {
            base: base.into(),
            ..ScanConfig::default()
        }
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Extension -> mimetype table used when no explicit mimetype is known.
///
/// Keys include the leading dot; the empty key matches URIs without an
/// extension (directory indexes, pretty URLs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeTable(HashMap<String, String>);

impl Default for MimeTable {
    fn default() -> Self {
        let entries = [
            ("", "text/html"),
            (".html", "text/html"),
            (".htm", "text/html"),
            (".css", "text/css"),
            (".svg", "image/svg+xml"),
        ];
        MimeTable(
            entries
                .into_iter()
                .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
                .collect(),
        )
    }
}

impl MimeTable {
    pub fn empty() -> Self {
        MimeTable(HashMap::new())
    }

    pub fn insert(&mut self, ext: impl Into<String>, mimetype: impl Into<String>) {
        self.0.insert(ext.into(), mimetype.into());
    }

    /// Mimetype string registered for the extension of `uri`, if any.
    pub fn get(&self, uri: &str) -> Option<&str> {
        self.0.get(extension(uri)).map(String::as_str)
    }

    /// Scannable mimetype for `uri`, or None when the extension is unknown
    /// or maps to something we have no scanner for.
    pub fn lookup(&self, uri: &str) -> Option<Mimetype> {
        self.get(uri).and_then(Mimetype::from_essence)
    }
}

// Extension of the last path segment, including the dot.
// Query strings and fragments are ignored.
fn extension(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(dot) => &segment[dot..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("/index.html"), ".html");
        assert_eq!(extension("/dir/"), "");
        assert_eq!(extension("/dir.v2/page"), "");
        assert_eq!(extension("/style.css?v=3"), ".css");
        assert_eq!(extension("/a.min.css"), ".css");
    }

    #[test]
    fn test_default_table() {
        let table = MimeTable::default();
        assert_eq!(table.lookup("/"), Some(Mimetype::Html));
        assert_eq!(table.lookup("/index.html"), Some(Mimetype::Html));
        assert_eq!(table.lookup("/style.css"), Some(Mimetype::Css));
        assert_eq!(table.lookup("/logo.svg"), Some(Mimetype::Svg));
        assert_eq!(table.lookup("/photo.jpg"), None);
    }

    #[test]
    fn test_custom_table() {
        let mut table = MimeTable::empty();
        table.insert(".xhtml", "text/html");
        assert_eq!(table.lookup("/page.xhtml"), Some(Mimetype::Html));
        assert_eq!(table.lookup("/index.html"), None);
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("push.json");
        std::fs::write(&path, r#"{ "base": "example.com/assets/", "max_depth": 2 }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.base, "example.com/assets/");
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.pipe_capacity, DEFAULT_PIPE_CAPACITY);
        assert_eq!(config.mimetypes, MimeTable::default());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScanConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
