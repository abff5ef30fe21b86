//! Grammar resource resolution
//!
//! The manager never touches the file system or the network directly; it asks
//! an injected [`ResourceResolver`] for the bytes behind an absolute URI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::trace;
use url::Url;

use crate::error::GrammarError;

/// Where a resolved resource lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedResource {
    /// Local file to read
    Path(PathBuf),
    /// Content already in memory
    Content(String),
}

/// Resource resolution capability
pub trait ResourceResolver: Send + Sync {
    /// Locate the resource behind an absolute URI
    fn resolve(&self, uri: &str) -> Result<ResolvedResource, GrammarError>;
}

/// Read the text behind `uri` through `resolver`.
///
/// Whether remote URIs may be fetched at all is decided by the caller
/// (`ContentModelSettings::download_enabled`).
pub fn read_resource(resolver: &dyn ResourceResolver, uri: &str) -> Result<String, GrammarError> {
    match resolver.resolve(uri)? {
        ResolvedResource::Content(text) => Ok(text),
        ResolvedResource::Path(path) => {
            trace!(uri, path = %path.display(), "reading grammar resource");
            std::fs::read_to_string(&path).map_err(|err| GrammarError::io(uri, &err))
        }
    }
}

/// `http:` and `https:` URIs
pub fn is_remote(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve `location` against `base`; absolute locations and file paths are
/// kept as URIs
pub fn resolve_location(base: &str, location: &str) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(location) {
        // A one-letter scheme is a Windows drive
        if url.scheme().len() > 1 {
            return Some(url.to_string());
        }
    }
    if Path::new(location).is_absolute() {
        return Url::from_file_path(location).ok().map(|u| u.to_string());
    }
    let base = Url::parse(base)
        .ok()
        .or_else(|| Url::from_file_path(base).ok())?;
    base.join(location).ok().map(|u| u.to_string())
}

/// Last path segment of a URI
pub fn file_name(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Resolves `file:` URIs (and plain paths) to the local file system; any
/// other scheme is unresolved
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResolver;

impl FileResolver {
    pub fn new() -> Self {
        FileResolver
    }
}

impl ResourceResolver for FileResolver {
    fn resolve(&self, uri: &str) -> Result<ResolvedResource, GrammarError> {
        if let Ok(url) = Url::parse(uri) {
            if url.scheme() == "file" {
                return url
                    .to_file_path()
                    .map(ResolvedResource::Path)
                    .map_err(|_| GrammarError::Unresolved(uri.to_string()));
            }
            if url.scheme().len() > 1 {
                return Err(GrammarError::Unresolved(uri.to_string()));
            }
        }
        Ok(ResolvedResource::Path(PathBuf::from(uri)))
    }
}

/// In-memory resources keyed by URI, counting every resolution
#[derive(Debug, Default)]
pub struct MemoryResolver {
    resources: RwLock<HashMap<String, String>>,
    requests: AtomicUsize,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, uri: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(uri, text);
        self
    }

    pub fn insert(&self, uri: impl Into<String>, text: impl Into<String>) {
        self.resources.write().insert(uri.into(), text.into());
    }

    pub fn remove(&self, uri: &str) -> Option<String> {
        self.resources.write().remove(uri)
    }

    /// Number of `resolve` calls so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ResourceResolver for MemoryResolver {
    fn resolve(&self, uri: &str) -> Result<ResolvedResource, GrammarError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.resources
            .read()
            .get(uri)
            .cloned()
            .map(ResolvedResource::Content)
            .ok_or_else(|| GrammarError::Unresolved(uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("file:///a/b/doc.xml", "s.xsd", Some("file:///a/b/s.xsd"))]
    #[case("file:///a/b/doc.xml", "../s.xsd", Some("file:///a/s.xsd"))]
    #[case("file:///a/b/doc.xml", "http://x.org/s.xsd", Some("http://x.org/s.xsd"))]
    #[case("file:///a/b/doc.xml", "  ", None)]
    #[case("not a uri", "s.xsd", None)]
    fn test_resolve_location(#[case] base: &str, #[case] location: &str, #[case] expected: Option<&str>) {
        assert_eq!(resolve_location(base, location).as_deref(), expected);
    }

    #[test]
    fn test_file_name_and_remote() {
        assert_eq!(file_name("file:///a/b/s.xsd"), "s.xsd");
        assert_eq!(file_name("http://x/y.dtd?v=2"), "y.dtd");
        assert!(is_remote("HTTPS://x/y.dtd"));
        assert!(!is_remote("file:///y.dtd"));
    }

    #[test]
    fn test_file_resolver_reads_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.dtd");
        std::fs::write(&path, "<!ELEMENT a EMPTY>").unwrap();
        let uri = Url::from_file_path(&path).unwrap().to_string();

        let resolver = FileResolver::new();
        assert_eq!(read_resource(&resolver, &uri).unwrap(), "<!ELEMENT a EMPTY>");

        let missing = Url::from_file_path(dir.path().join("none.dtd")).unwrap().to_string();
        assert!(matches!(read_resource(&resolver, &missing), Err(GrammarError::Io { .. })));
    }

    #[test]
    fn test_file_resolver_leaves_remote_unresolved() {
        let resolver = FileResolver::new();
        assert_eq!(
            read_resource(&resolver, "http://x/s.xsd"),
            Err(GrammarError::Unresolved("http://x/s.xsd".into()))
        );
    }

    #[test]
    fn test_memory_resolver_counts_requests() {
        let resolver = MemoryResolver::new().with("mem:///a.dtd", "<!ELEMENT a EMPTY>");
        assert!(read_resource(&resolver, "mem:///a.dtd").is_ok());
        assert!(read_resource(&resolver, "mem:///b.dtd").is_err());
        assert_eq!(resolver.requests(), 2);
    }
}
