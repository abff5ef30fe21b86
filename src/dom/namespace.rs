//! Namespace Resolution
//!
//! Prefix lookup for a tolerant tree: bindings are read from the `xmlns` and
//! `xmlns:p` attributes of a node and its ancestors, nearest first, with the
//! `xml` and `xmlns` prefixes pre-bound.

use super::document::XmlDocument;
use super::node::NodeId;

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
    pub const RELAXNG: &str = "http://relaxng.org/ns/structure/1.0";
    pub const RELAXNG_ANNOTATIONS: &str = "http://relaxng.org/ns/compatibility/annotations/1.0";
    pub const CATALOG: &str = "urn:oasis:names:tc:entity:xmlns:xml:catalog";
}

/// Split a qualified name into prefix and local part
#[inline]
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() => (Some(prefix), local),
        _ => (None, name),
    }
}

/// A binding declared on one element: `None` prefix is the default namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsBinding<'d> {
    pub prefix: Option<&'d str>,
    pub uri: &'d str,
}

/// Ancestor-walking namespace resolver
#[derive(Debug, Clone, Copy)]
pub struct NamespaceResolver<'d> {
    doc: &'d XmlDocument,
}

impl<'d> NamespaceResolver<'d> {
    pub fn new(doc: &'d XmlDocument) -> Self {
        NamespaceResolver { doc }
    }

    /// Bindings declared directly on `node`, in attribute order.
    ///
    /// `xmlns=""` is reported with an empty URI (undeclaration).
    pub fn declared(&self, node: NodeId) -> impl Iterator<Item = NsBinding<'d>> + 'd {
        let doc = self.doc;
        doc.attributes(node).iter().filter_map(move |attr| {
            let name = attr.name.as_str(doc.text());
            let prefix = match name.strip_prefix("xmlns") {
                Some("") => None,
                Some(rest) => Some(rest.strip_prefix(':')?),
                None => return None,
            };
            let uri = attr
                .unquoted_value(doc.text())
                .map_or("", |v| v.as_str(doc.text()));
            Some(NsBinding { prefix, uri })
        })
    }

    /// Resolve `prefix` (or the default namespace for `None`) in scope at `node`
    pub fn resolve(&self, node: NodeId, prefix: Option<&str>) -> Option<&'d str> {
        match prefix {
            Some("xml") => return Some(ns::XML),
            Some("xmlns") => return Some(ns::XMLNS),
            _ => {}
        }
        for id in self.doc.ancestors_or_self(node) {
            if let Some(binding) = self.declared(id).find(|b| b.prefix == prefix) {
                return (!binding.uri.is_empty()).then_some(binding.uri);
            }
        }
        None
    }

    /// Prefix bound to `uri` in scope at `node`; `Some(None)` for the default namespace
    pub fn prefix_for(&self, node: NodeId, uri: &str) -> Option<Option<&'d str>> {
        if uri == ns::XML {
            return Some(Some("xml"));
        }
        for id in self.doc.ancestors_or_self(node) {
            for binding in self.declared(id) {
                if binding.uri == uri && self.resolve(node, binding.prefix) == Some(binding.uri) {
                    return Some(binding.prefix);
                }
            }
        }
        None
    }

    /// Every binding in scope at `node`, nearest declaration winning
    pub fn active_bindings(&self, node: NodeId) -> Vec<NsBinding<'d>> {
        let mut seen: Vec<Option<&str>> = Vec::new();
        let mut bindings = Vec::new();
        for id in self.doc.ancestors_or_self(node) {
            for binding in self.declared(id) {
                if !seen.contains(&binding.prefix) {
                    seen.push(binding.prefix);
                    if !binding.uri.is_empty() {
                        bindings.push(binding);
                    }
                }
            }
        }
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(doc: &XmlDocument, name: &str) -> NodeId {
        doc.descendants(0)
            .find(|&id| doc.node_name(id) == Some(name))
            .unwrap()
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("xs:element"), (Some("xs"), "element"));
        assert_eq!(split_qname("element"), (None, "element"));
        assert_eq!(split_qname(":odd"), (None, ":odd"));
    }

    #[test]
    fn test_default_namespaces() {
        let doc = XmlDocument::parse("<a/>");
        let resolver = NamespaceResolver::new(&doc);
        let a = element(&doc, "a");
        assert_eq!(resolver.resolve(a, Some("xml")), Some(ns::XML));
        assert_eq!(resolver.resolve(a, None), None);
    }

    #[test]
    fn test_declare_and_resolve() {
        let doc = XmlDocument::parse(
            r#"<svg:a xmlns:svg="http://www.w3.org/2000/svg"><svg:b/></svg:a>"#,
        );
        let resolver = NamespaceResolver::new(&doc);
        let b = element(&doc, "svg:b");
        assert_eq!(
            resolver.resolve(b, Some("svg")),
            Some("http://www.w3.org/2000/svg")
        );
        assert_eq!(resolver.prefix_for(b, "http://www.w3.org/2000/svg"), Some(Some("svg")));
    }

    #[test]
    fn test_shadow_and_undeclare() {
        let doc = XmlDocument::parse(
            r#"<a xmlns="urn:one" xmlns:p="urn:p"><b xmlns="urn:two"><c xmlns=""/></b></a>"#,
        );
        let resolver = NamespaceResolver::new(&doc);
        assert_eq!(resolver.resolve(element(&doc, "b"), None), Some("urn:two"));
        assert_eq!(resolver.resolve(element(&doc, "c"), None), None);
        assert_eq!(resolver.prefix_for(element(&doc, "b"), "urn:one"), None);

        let active = resolver.active_bindings(element(&doc, "b"));
        assert_eq!(
            active,
            vec![
                NsBinding { prefix: None, uri: "urn:two" },
                NsBinding { prefix: Some("p"), uri: "urn:p" },
            ]
        );
    }
}
