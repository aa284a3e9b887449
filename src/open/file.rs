// src/open/file.rs
// =============================================================================
// Opening accepted URIs from a directory.
//
// "/css/site%20main.css" under root "./public" -> ./public/css/site main.css
// "/docs/"                                     -> ./public/docs/index.html
//
// Accepted URIs are percent-encoded paths, so they are decoded first.
// Any ".." segment is refused outright.
// =============================================================================

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

use super::{Opener, Resource};

const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone)]
pub struct DirOpener {
    root: PathBuf,
}

impl DirOpener {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirOpener { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a URI path to a file path beneath the root.
    pub fn path_for(&self, uri: &str) -> io::Result<PathBuf> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let mut file = self.root.clone();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("{uri}: path escapes the root"),
                    ))
                }
                segment => file.push(segment),
            }
        }
        Ok(file)
    }
}

#[async_trait]
impl Opener for DirOpener {
    async fn open(&self, uri: &str) -> io::Result<Resource> {
        let mut path = self.path_for(uri)?;
        if tokio::fs::metadata(&path).await?.is_dir() {
            path.push(INDEX_FILE);
        }
        let file = tokio::fs::File::open(&path).await?;
        Ok(Resource {
            reader: Box::new(file),
            mimetype: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(resource: Resource) -> String {
        let mut text = String::new();
        let mut reader = resource.reader;
        reader.read_to_string(&mut text).await.unwrap();
        text
    }

    #[tokio::test]
    async fn test_open_files_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("index.html"), "root").unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "docs").unwrap();
        std::fs::write(dir.path().join("site main.css"), "css").unwrap();

        let opener = DirOpener::new(dir.path());
        assert_eq!(read_all(opener.open("/").await.unwrap()).await, "root");
        assert_eq!(read_all(opener.open("/docs/").await.unwrap()).await, "docs");

        let resource = opener.open("/site%20main.css").await.unwrap();
        assert!(resource.mimetype.is_none());
        assert_eq!(read_all(resource).await, "css");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let opener = DirOpener::new(dir.path());
        let err = opener.open("/nope.css").await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_traversal_refused() {
        let opener = DirOpener::new("/srv/www");
        let err = opener.path_for("/a/../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        let err = opener.path_for("/%2e%2e/secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_path_mapping() {
        let opener = DirOpener::new("/srv/www");
        assert_eq!(
            opener.path_for("/img//a.png?v=2").unwrap(),
            PathBuf::from("/srv/www/img/a.png")
        );
    }
}
