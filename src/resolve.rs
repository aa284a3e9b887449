// src/resolve.rs
// =============================================================================
// URL resolution and the scope filter.
//
// Every raw reference found by a scanner passes through here. The question we
// answer is: "is this a local resource we could push, and if so, what is its
// absolute path?"
//
// A reference is local when:
// 1. it has no explicit host, or its host equals the document's host
// 2. it is an http(s) URL or a relative reference
// 3. after resolution against the document address, its path starts with
//    the base scope prefix
//
// We use the `url` crate to do the RFC 3986 resolution (Url::join), the same
// way link-checking code resolves relative hrefs against a page URL.
// =============================================================================

use std::fmt;

use url::{ParseError, Url};

use crate::error::ScanError;

// Host used for the base URL when neither document nor scope knows one.
// Never compared against anything: explicit hosts are checked before joining.
const PLACEHOLDER_HOST: &str = "document.invalid";

// Host+path values sometimes arrive concatenated ("localhost/index.html").
const LOOPBACK_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Prefix (and optional host) a resolved reference must fall under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseScope {
    host: String,
    prefix: String,
}

impl BaseScope {
    pub fn new(host: impl Into<String>, prefix: impl Into<String>) -> Self {
        BaseScope {
            host: host.into().to_ascii_lowercase(),
            prefix: prefix.into(),
        }
    }

    /// Parses "example.com/dir/", "/dir/", "example.com" or "".
    ///
    /// Everything before the first '/' is the host, the rest is the prefix.
    pub fn parse(base: &str) -> Self {
        match base.find('/') {
            Some(slash) => BaseScope::new(&base[..slash], &base[slash..]),
            None => BaseScope::new(base, ""),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

impl fmt::Display for BaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.prefix)
    }
}

/// Address of the document being scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAddress {
    host: String,
    path: String,
}

impl DocumentAddress {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        DocumentAddress {
            host: host.into().to_ascii_lowercase(),
            path,
        }
    }

    /// Builds an address from a Host header and a request-target.
    ///
    /// The query and fragment are dropped. A request-target that starts with
    /// a loopback host ("localhost:8080/index.html") is split into host and
    /// path when no host was given.
    pub fn from_request(host: &str, uri: &str) -> Self {
        let uri = uri.split(['?', '#']).next().unwrap_or(uri);
        if host.is_empty() {
            if let Some((host, path)) = split_loopback(uri.trim_start_matches('/')) {
                return DocumentAddress::new(host, path);
            }
        }
        DocumentAddress::new(host, uri)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Same host, different path. Used for recursively opened resources.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        DocumentAddress::new(self.host.clone(), path)
    }

    /// Key identifying this document in a cache: host + path.
    pub fn key(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

impl fmt::Display for DocumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

/// Why a reference was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Explicit host differs from the document host
    ForeignHost,
    /// Resolved path falls outside the base scope
    OutOfScope,
    /// Empty, fragment-only, or a scheme other than http(s)
    NotFetchable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Accepted(String),
    Rejected(Rejection),
}

impl Resolution {
    pub fn accepted(&self) -> Option<&str> {
        match self {
            Resolution::Accepted(uri) => Some(uri),
            Resolution::Rejected(_) => None,
        }
    }
}

/// Resolves raw references found in one document.
///
/// Built once per scan task so the base URL is parsed only once.
#[derive(Debug, Clone)]
pub struct Resolver {
    scope: BaseScope,
    host: String,
    base: Url,
}

impl Resolver {
    pub fn new(scope: &BaseScope, document: &DocumentAddress) -> Result<Self, ScanError> {
        // The document host wins; the scope host fills in when the
        // document address has none (scanning a file outside any request).
        let host = if document.host.is_empty() {
            scope.host.clone()
        } else {
            document.host.clone()
        };

        let authority = if host.is_empty() { PLACEHOLDER_HOST } else { &host };
        let address = format!("http://{}{}", authority, document.path);
        let base = Url::parse(&address).map_err(|source| ScanError::Address {
            address: document.to_string(),
            source,
        })?;

        Ok(Resolver {
            scope: scope.clone(),
            host,
            base,
        })
    }

    pub fn scope(&self) -> &BaseScope {
        &self.scope
    }

    /// Resolves one raw reference.
    ///
    /// Returns Ok(Rejected) for references that are simply not local, and an
    /// error only when the reference cannot be parsed at all.
    pub fn resolve(&self, raw: &str) -> Result<Resolution, ScanError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return Ok(Resolution::Rejected(Rejection::NotFetchable));
        }

        let invalid = |source| ScanError::Reference {
            reference: raw.to_string(),
            source,
        };

        // "localhost/img.png" means host localhost, path /img.png
        let loopback;
        let reference = match split_loopback(raw) {
            Some(_) => {
                loopback = format!("//{}", raw);
                loopback.as_str()
            }
            None => raw,
        };

        let explicit_host = if reference.starts_with("//") {
            let url = Url::parse(&format!("http:{}", reference)).map_err(invalid)?;
            authority(&url)
        } else {
            match Url::parse(reference) {
                Ok(url) => {
                    if url.scheme() != "http" && url.scheme() != "https" {
                        return Ok(Resolution::Rejected(Rejection::NotFetchable));
                    }
                    authority(&url)
                }
                Err(ParseError::RelativeUrlWithoutBase) => None,
                Err(err) => return Err(invalid(err)),
            }
        };

        if let Some(explicit) = explicit_host {
            if explicit != self.host {
                return Ok(Resolution::Rejected(Rejection::ForeignHost));
            }
        }

        let resolved = self.base.join(reference).map_err(invalid)?;
        let path = resolved.path();
        if !self.scope.contains(path) {
            return Ok(Resolution::Rejected(Rejection::OutOfScope));
        }
        Ok(Resolution::Accepted(path.to_string()))
    }
}

// host[:port] of an absolute URL, None when the URL has no host
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|host| !host.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

// Splits "localhost:8080/rest" into ("localhost:8080", "/rest").
// Only matches when the loopback name ends at '/', ':' or the end.
fn split_loopback(value: &str) -> Option<(&str, &str)> {
    let name = LOOPBACK_HOSTS.iter().find(|name| value.starts_with(*name))?;
    let rest = &value[name.len()..];
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with(':')) {
        return None;
    }
    let end = value.find('/').unwrap_or(value.len());
    Some((&value[..end], &value[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(base: &str, document: &str, raw: &str) -> Option<String> {
        let resolver =
            Resolver::new(&BaseScope::parse(base), &DocumentAddress::new("", document)).unwrap();
        resolver.resolve(raw).unwrap().accepted().map(str::to_string)
    }

    #[test]
    fn test_resolution_table() {
        let cases = [
            ("example.com/", "/index.html", "http://example.com/header.jpg", Some("/header.jpg")),
            ("example.com/", "/index.html", "//example.com/header.jpg", Some("/header.jpg")),
            ("example.com/", "/index.html", "/header.jpg", Some("/header.jpg")),
            ("example.com/", "/index.html", "header.jpg", Some("/header.jpg")),
            ("example.com", "/index.html", "header.jpg", Some("/header.jpg")),
            ("www.example.com/", "/index.html", "http://example.com/header.jpg", None),
            ("example.com/dir/", "/index.html", "http://example.com/header.jpg", None),
            ("example.com/", "/dir/index.html", "http://example.com/header.jpg", Some("/header.jpg")),
            ("example.com/", "/dir/index.html", "header.jpg", Some("/dir/header.jpg")),
            ("/", "/index.html", "header.jpg", Some("/header.jpg")),
            ("/dir/", "/index.html", "header.jpg", None),
            ("/dir/", "/dir/index.html", "header.jpg", Some("/dir/header.jpg")),
            ("", "/index.html", "header.jpg", Some("/header.jpg")),
        ];

        for (base, document, raw, expected) in cases {
            assert_eq!(
                resolve(base, document, raw).as_deref(),
                expected,
                "base={base} document={document} raw={raw}"
            );
        }
    }

    #[test]
    fn test_dot_segments() {
        assert_eq!(
            resolve("/", "/blog/post/index.html", "../img/a.png").as_deref(),
            Some("/blog/img/a.png")
        );
    }

    #[test]
    fn test_rejection_reasons() {
        let resolver = Resolver::new(
            &BaseScope::parse("example.com/static/"),
            &DocumentAddress::new("example.com", "/index.html"),
        )
        .unwrap();

        assert_eq!(
            resolver.resolve("https://cdn.example.org/a.js").unwrap(),
            Resolution::Rejected(Rejection::ForeignHost)
        );
        assert_eq!(
            resolver.resolve("/other/a.js").unwrap(),
            Resolution::Rejected(Rejection::OutOfScope)
        );
        assert_eq!(
            resolver.resolve("data:image/png;base64,AAAA").unwrap(),
            Resolution::Rejected(Rejection::NotFetchable)
        );
        assert_eq!(
            resolver.resolve("#icon").unwrap(),
            Resolution::Rejected(Rejection::NotFetchable)
        );
        assert_eq!(
            resolver.resolve("  ").unwrap(),
            Resolution::Rejected(Rejection::NotFetchable)
        );
        assert_eq!(
            resolver.resolve("static/app.js?v=2#x").unwrap(),
            Resolution::Accepted("/static/app.js".to_string())
        );
    }

    #[test]
    fn test_unparseable_reference_is_an_error() {
        let resolver =
            Resolver::new(&BaseScope::parse("/"), &DocumentAddress::new("", "/index.html")).unwrap();
        let err = resolver.resolve("http://[::1/broken").unwrap_err();
        assert!(matches!(err, ScanError::Reference { .. }));
    }

    #[test]
    fn test_loopback_reference() {
        let resolver = Resolver::new(
            &BaseScope::parse("/"),
            &DocumentAddress::new("localhost", "/index.html"),
        )
        .unwrap();
        assert_eq!(
            resolver.resolve("localhost/img.png").unwrap(),
            Resolution::Accepted("/img.png".to_string())
        );

        let resolver = Resolver::new(
            &BaseScope::parse("/"),
            &DocumentAddress::new("example.com", "/index.html"),
        )
        .unwrap();
        assert_eq!(
            resolver.resolve("127.0.0.1/img.png").unwrap(),
            Resolution::Rejected(Rejection::ForeignHost)
        );
        // not a loopback host, just a relative path
        assert_eq!(
            resolver.resolve("localhostify.png").unwrap(),
            Resolution::Accepted("/localhostify.png".to_string())
        );
    }

    #[test]
    fn test_document_from_request() {
        let address = DocumentAddress::from_request("Example.com", "/blog/?page=2");
        assert_eq!(address.host(), "example.com");
        assert_eq!(address.path(), "/blog/");
        assert_eq!(address.key(), "example.com/blog/");

        let address = DocumentAddress::from_request("", "localhost:8080/index.html");
        assert_eq!(address.host(), "localhost:8080");
        assert_eq!(address.path(), "/index.html");

        let address = DocumentAddress::from_request("", "127.0.0.1");
        assert_eq!(address.host(), "127.0.0.1");
        assert_eq!(address.path(), "/");
    }

    #[test]
    fn test_scope_parse() {
        let scope = BaseScope::parse("Example.com/dir/");
        assert_eq!(scope.host(), "example.com");
        assert_eq!(scope.prefix(), "/dir/");
        assert_eq!(scope.to_string(), "example.com/dir/");

        let scope = BaseScope::parse("/assets/");
        assert_eq!(scope.host(), "");
        assert!(scope.contains("/assets/a.css"));
        assert!(!scope.contains("/a.css"));
    }
}
