//! OASIS XML Catalogs
//!
//! Maps public identifiers, system identifiers and URIs (including namespace
//! names) to grammar locations. Entry targets are resolved against the
//! catalog file, or the nearest `xml:base`, when they are read.
//!
//! Lookup order for a system identifier: `system`, longest `rewriteSystem`
//! prefix, longest `systemSuffix`, then the `nextCatalog` chain. `uri`
//! lookups mirror this with `uri`, `rewriteURI` and `uriSuffix`.

use tracing::{debug, warn};

use crate::dom::ns;
use crate::resource::{read_resource, resolve_location, ResourceResolver};

/// Nesting limit for `nextCatalog` chains
const MAX_CATALOG_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Public { id: String, uri: String },
    System { id: String, uri: String },
    Uri { name: String, uri: String },
    RewriteSystem { prefix: String, rewrite: String },
    RewriteUri { prefix: String, rewrite: String },
    SystemSuffix { suffix: String, uri: String },
    UriSuffix { suffix: String, uri: String },
}

/// One parsed catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    uri: String,
    entries: Vec<Entry>,
    next_catalogs: Vec<String>,
}

impl Catalog {
    /// Parse catalog text located at `uri`
    pub fn parse(uri: &str, text: &str) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        let mut catalog = Catalog {
            uri: uri.to_string(),
            ..Default::default()
        };
        for node in doc.root_element().descendants().filter(|n| n.is_element()) {
            let Some(base) = base_uri(node, uri) else {
                continue;
            };
            let attr = |name: &str| node.attribute(name).map(str::trim);
            let target = |name: &str| attr(name).and_then(|value| resolve_location(&base, value));
            let entry = match node.tag_name().name() {
                "public" => attr("publicId").zip(target("uri")).map(|(id, uri)| Entry::Public {
                    id: normalize_public_id(id),
                    uri,
                }),
                "system" => attr("systemId").zip(target("uri")).map(|(id, uri)| Entry::System {
                    id: id.to_string(),
                    uri,
                }),
                "uri" => attr("name").zip(target("uri")).map(|(name, uri)| Entry::Uri {
                    name: name.to_string(),
                    uri,
                }),
                "rewriteSystem" => attr("systemIdStartString")
                    .zip(target("rewritePrefix"))
                    .map(|(prefix, rewrite)| Entry::RewriteSystem { prefix: prefix.to_string(), rewrite }),
                "rewriteURI" => attr("uriStartString")
                    .zip(target("rewritePrefix"))
                    .map(|(prefix, rewrite)| Entry::RewriteUri { prefix: prefix.to_string(), rewrite }),
                "systemSuffix" => attr("systemIdSuffix")
                    .zip(target("uri"))
                    .map(|(suffix, uri)| Entry::SystemSuffix { suffix: suffix.to_string(), uri }),
                "uriSuffix" => attr("uriSuffix")
                    .zip(target("uri"))
                    .map(|(suffix, uri)| Entry::UriSuffix { suffix: suffix.to_string(), uri }),
                "nextCatalog" => {
                    if let Some(next) = target("catalog") {
                        catalog.next_catalogs.push(next);
                    }
                    None
                }
                _ => None,
            };
            catalog.entries.extend(entry);
        }
        Ok(catalog)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn resolve_system(&self, system_id: &str) -> Option<String> {
        self.entries
            .iter()
            .find_map(|e| match e {
                Entry::System { id, uri } if id == system_id => Some(uri.clone()),
                _ => None,
            })
            .or_else(|| {
                longest_rewrite(self.entries.iter().filter_map(|e| match e {
                    Entry::RewriteSystem { prefix, rewrite } => Some((prefix, rewrite)),
                    _ => None,
                }), system_id)
            })
            .or_else(|| {
                longest_suffix(self.entries.iter().filter_map(|e| match e {
                    Entry::SystemSuffix { suffix, uri } => Some((suffix, uri)),
                    _ => None,
                }), system_id)
            })
    }

    fn resolve_public(&self, public_id: &str) -> Option<String> {
        let public_id = normalize_public_id(public_id);
        self.entries.iter().find_map(|e| match e {
            Entry::Public { id, uri } if *id == public_id => Some(uri.clone()),
            _ => None,
        })
    }

    fn resolve_uri(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find_map(|e| match e {
                Entry::Uri { name: n, uri } if n == name => Some(uri.clone()),
                _ => None,
            })
            .or_else(|| {
                longest_rewrite(self.entries.iter().filter_map(|e| match e {
                    Entry::RewriteUri { prefix, rewrite } => Some((prefix, rewrite)),
                    _ => None,
                }), name)
            })
            .or_else(|| {
                longest_suffix(self.entries.iter().filter_map(|e| match e {
                    Entry::UriSuffix { suffix, uri } => Some((suffix, uri)),
                    _ => None,
                }), name)
            })
    }
}

/// Ordered set of catalogs with their `nextCatalog` chains loaded
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    catalogs: Vec<Catalog>,
}

impl CatalogResolver {
    pub fn new(catalogs: Vec<Catalog>) -> Self {
        CatalogResolver { catalogs }
    }

    /// Load catalog files and everything they chain to; unreadable files are
    /// logged and skipped
    pub fn load(locations: &[String], resolver: &dyn ResourceResolver) -> Self {
        let mut catalogs: Vec<Catalog> = Vec::new();
        let mut pending: Vec<(String, usize)> = locations
            .iter()
            .rev()
            .filter_map(|location| {
                resolve_location("file:///", location).map(|uri| (uri, 0))
            })
            .collect();
        while let Some((uri, depth)) = pending.pop() {
            if depth > MAX_CATALOG_DEPTH || catalogs.iter().any(|c| c.uri == uri) {
                continue;
            }
            let catalog = match read_resource(resolver, &uri) {
                Ok(text) => Catalog::parse(&uri, &text).map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match catalog {
                Ok(catalog) => {
                    debug!(uri = %uri, entries = catalog.entries.len(), "loaded XML catalog");
                    pending.extend(catalog.next_catalogs.iter().rev().map(|next| (next.clone(), depth + 1)));
                    catalogs.push(catalog);
                }
                Err(error) => warn!(uri = %uri, error = %error, "skipping XML catalog"),
            }
        }
        CatalogResolver { catalogs }
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    /// Location for an external identifier: system entries first, then public
    pub fn resolve_external(&self, public_id: Option<&str>, system_id: Option<&str>) -> Option<String> {
        system_id
            .and_then(|id| self.catalogs.iter().find_map(|c| c.resolve_system(id)))
            .or_else(|| public_id.and_then(|id| self.catalogs.iter().find_map(|c| c.resolve_public(id))))
    }

    pub fn resolve_system(&self, system_id: &str) -> Option<String> {
        self.catalogs.iter().find_map(|c| c.resolve_system(system_id))
    }

    pub fn resolve_public(&self, public_id: &str) -> Option<String> {
        self.catalogs.iter().find_map(|c| c.resolve_public(public_id))
    }

    /// Location for a URI reference or namespace name; falls back to system
    /// entries
    pub fn resolve_uri(&self, uri: &str) -> Option<String> {
        self.catalogs
            .iter()
            .find_map(|c| c.resolve_uri(uri))
            .or_else(|| self.resolve_system(uri))
    }
}

/// Base URI in effect at `node`: the nearest `xml:base`, resolved outward
fn base_uri(node: roxmltree::Node<'_, '_>, catalog_uri: &str) -> Option<String> {
    let bases: Vec<&str> = node
        .ancestors()
        .filter_map(|n| n.attribute((ns::XML, "base")))
        .collect();
    bases
        .into_iter()
        .rev()
        .try_fold(catalog_uri.to_string(), |base, value| resolve_location(&base, value))
}

fn longest_rewrite<'e>(
    entries: impl Iterator<Item = (&'e String, &'e String)>,
    id: &str,
) -> Option<String> {
    entries
        .filter(|(prefix, _)| id.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, rewrite)| format!("{rewrite}{}", &id[prefix.len()..]))
}

fn longest_suffix<'e>(
    entries: impl Iterator<Item = (&'e String, &'e String)>,
    id: &str,
) -> Option<String> {
    entries
        .filter(|(suffix, _)| id.ends_with(suffix.as_str()))
        .max_by_key(|(suffix, _)| suffix.len())
        .map(|(_, uri)| uri.clone())
}

/// Collapse whitespace runs as public identifiers require
fn normalize_public_id(id: &str) -> String {
    id.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResolver;

    const CATALOG: &str = r#"<?xml version="1.0"?>
<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <public publicId="-//W3C//DTD  XHTML 1.0 Strict//EN" uri="dtd/xhtml1-strict.dtd"/>
  <system systemId="http://example.com/note.dtd" uri="note.dtd"/>
  <uri name="urn:po" uri="schemas/po.xsd"/>
  <rewriteSystem systemIdStartString="http://example.com/" rewritePrefix="mirror/"/>
  <rewriteSystem systemIdStartString="http://example.com/deep/" rewritePrefix="deep/"/>
  <group xml:base="http://cdn.example.org/grammars/">
    <uriSuffix uriSuffix="/book.rng" uri="book.rng"/>
  </group>
  <systemSuffix systemIdSuffix="-v2.dtd" uri="v2.dtd"/>
  <nextCatalog catalog="more.xml"/>
</catalog>"#;

    fn resolver() -> CatalogResolver {
        let memory = MemoryResolver::new()
            .with("file:///cat/catalog.xml", CATALOG)
            .with(
                "file:///cat/more.xml",
                r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog"><uri name="urn:more" uri="more.xsd"/><nextCatalog catalog="catalog.xml"/></catalog>"#,
            );
        CatalogResolver::load(&["file:///cat/catalog.xml".to_string()], &memory)
    }

    #[test]
    fn test_public_and_system() {
        let catalogs = resolver();
        assert_eq!(
            catalogs.resolve_external(Some("-//W3C//DTD XHTML 1.0 Strict//EN"), Some("x.dtd")),
            Some("file:///cat/dtd/xhtml1-strict.dtd".to_string())
        );
        assert_eq!(
            catalogs.resolve_system("http://example.com/note.dtd"),
            Some("file:///cat/note.dtd".to_string())
        );
    }

    #[test]
    fn test_longest_rewrite_and_suffix() {
        let catalogs = resolver();
        assert_eq!(
            catalogs.resolve_system("http://example.com/deep/a.dtd"),
            Some("file:///cat/deep/a.dtd".to_string())
        );
        assert_eq!(
            catalogs.resolve_system("http://example.com/a.dtd"),
            Some("file:///cat/mirror/a.dtd".to_string())
        );
        assert_eq!(
            catalogs.resolve_system("http://other.org/b-v2.dtd"),
            Some("file:///cat/v2.dtd".to_string())
        );
    }

    #[test]
    fn test_uri_entries_with_base_and_chain() {
        let catalogs = resolver();
        assert_eq!(catalogs.catalogs().len(), 2);
        assert_eq!(catalogs.resolve_uri("urn:po"), Some("file:///cat/schemas/po.xsd".to_string()));
        assert_eq!(
            catalogs.resolve_uri("http://x.org/book.rng"),
            Some("http://cdn.example.org/grammars/book.rng".to_string())
        );
        assert_eq!(catalogs.resolve_uri("urn:more"), Some("file:///cat/more.xsd".to_string()));
        assert_eq!(catalogs.resolve_uri("urn:none"), None);
    }

    #[test]
    fn test_unreadable_catalog_skipped() {
        let memory = MemoryResolver::new();
        let catalogs = CatalogResolver::load(&["file:///missing.xml".to_string()], &memory);
        assert!(catalogs.is_empty());
    }

    #[test]
    fn test_catalog_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        std::fs::write(&path, CATALOG).unwrap();
        let catalogs = CatalogResolver::load(
            &[path.to_string_lossy().into_owned()],
            &crate::resource::FileResolver::new(),
        );
        let expected = url::Url::from_file_path(dir.path().join("note.dtd")).unwrap().to_string();
        assert_eq!(catalogs.resolve_system("http://example.com/note.dtd"), Some(expected));
    }
}
