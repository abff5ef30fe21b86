//! XML Document - Arena-based DOM representation
//!
//! Efficient DOM storage with:
//! - Arena allocation for nodes and attributes
//! - NodeId indices for traversal
//! - Zero-copy names and values via spans into the owned text
//!
//! A document owns the [`PositionIndex`] snapshot it was parsed from and is
//! never mutated after construction; an edit produces a new document.

use super::builder::{BuiltTree, DomBuilder};
use super::namespace::{ns, split_qname, NamespaceResolver};
use super::node::{DocTypeData, NodeData, NodeId, NodeKind, XmlAttribute, XmlNode};
use crate::index::{PositionIndex, Span};

/// An XML document stored in arena format
#[derive(Debug, Clone)]
pub struct XmlDocument {
    uri: String,
    index: PositionIndex,
    nodes: Vec<XmlNode>,
    attributes: Vec<XmlAttribute>,
    root_element: Option<NodeId>,
    dangling_end_tags: Vec<Span>,
}

/// `<?xml-model ...?>` association, pseudo-attribute values without quotes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlModelDeclaration {
    pub node: NodeId,
    pub href: Option<Span>,
    pub model_type: Option<Span>,
    pub schematypens: Option<Span>,
    pub group: Option<Span>,
    pub phase: Option<Span>,
    pub title: Option<Span>,
}

/// One grammar location taken from `xsi:schemaLocation` or
/// `xsi:noNamespaceSchemaLocation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLocationHint {
    /// Target namespace (`None` for `noNamespaceSchemaLocation`)
    pub namespace: Option<String>,
    pub location: String,
    /// Location span in the document text
    pub span: Span,
}

impl XmlDocument {
    /// Parse a document without a URI
    pub fn parse(text: &str) -> Self {
        Self::from_index(String::new(), PositionIndex::new(text))
    }

    /// Parse a document identified by `uri`
    pub fn parse_with_uri(uri: impl Into<String>, text: &str) -> Self {
        Self::from_index(uri.into(), PositionIndex::new(text))
    }

    /// Parse the text held by a position index snapshot
    pub fn from_index(uri: String, index: PositionIndex) -> Self {
        let tree = DomBuilder::new(index.text()).build();
        Self::assemble(uri, index, tree)
    }

    /// Parse a standalone DTD; its declarations become children of the
    /// document node
    pub fn parse_dtd(uri: impl Into<String>, text: &str) -> Self {
        let index = PositionIndex::new(text);
        let tree = DomBuilder::new(index.text()).build_dtd();
        Self::assemble(uri.into(), index, tree)
    }

    fn assemble(uri: String, index: PositionIndex, tree: BuiltTree) -> Self {
        let mut doc = XmlDocument {
            uri,
            index,
            nodes: tree.nodes,
            attributes: tree.attributes,
            root_element: None,
            dangling_end_tags: tree.dangling_end_tags,
        };
        doc.root_element = doc.children(0).find(|&id| doc.nodes[id as usize].is_element());
        doc
    }

    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The document text
    #[inline]
    pub fn text(&self) -> &str {
        self.index.text()
    }

    /// Position index snapshot the tree is anchored on
    #[inline]
    pub fn index(&self) -> &PositionIndex {
        &self.index
    }

    /// Text of a span in this document
    #[inline]
    pub fn text_of(&self, span: Span) -> &str {
        span.as_str(self.text())
    }

    /// Get the document root node (index 0)
    pub fn document_node(&self) -> &XmlNode {
        &self.nodes[0]
    }

    /// Get the root element (first element child of document)
    pub fn root_element(&self) -> Option<&XmlNode> {
        self.root_element.map(|id| &self.nodes[id as usize])
    }

    /// Get root element ID
    pub fn root_element_id(&self) -> Option<NodeId> {
        self.root_element
    }

    /// Get a node by ID
    pub fn get_node(&self, id: NodeId) -> Option<&XmlNode> {
        self.nodes.get(id as usize)
    }

    /// Get total number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Close tags that matched no open element
    pub fn dangling_end_tags(&self) -> &[Span] {
        &self.dangling_end_tags
    }

    /// Name of an element, PI target, DOCTYPE name or DTD declaration name
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        let span = match &self.get_node(id)?.data {
            NodeData::Element(element) => element.name,
            NodeData::ProcessingInstruction(pi) => pi.target,
            NodeData::DocType(doctype) => doctype.name,
            NodeData::DtdElementDecl(decl) => decl.name,
            NodeData::DtdAttlistDecl(decl) => decl.element_name,
            NodeData::DtdEntityDecl(decl) => decl.name,
            _ => None,
        }?;
        Some(self.text_of(span))
    }

    /// Get node local name (without prefix)
    pub fn node_local_name(&self, id: NodeId) -> Option<&str> {
        self.node_name(id).map(|name| split_qname(name).1)
    }

    /// Get node namespace prefix
    pub fn node_prefix(&self, id: NodeId) -> Option<&str> {
        self.node_name(id).and_then(|name| split_qname(name).0)
    }

    /// Namespace URI of an element, resolved through the in-scope `xmlns`
    /// declarations
    pub fn namespace_uri(&self, id: NodeId) -> Option<&str> {
        if !self.get_node(id)?.is_element() {
            return None;
        }
        NamespaceResolver::new(self).resolve(id, self.node_prefix(id))
    }

    /// Namespace URI of an attribute; unprefixed attributes have none
    pub fn attribute_namespace(&self, attr: &XmlAttribute) -> Option<&str> {
        let (prefix, _) = split_qname(self.text_of(attr.name));
        match prefix {
            Some("xmlns") => Some(ns::XMLNS),
            Some(prefix) => NamespaceResolver::new(self).resolve(attr.owner, Some(prefix)),
            None => None,
        }
    }

    /// Text content of a text node, or the content of a CDATA section or
    /// comment
    pub fn text_content(&self, id: NodeId) -> Option<&str> {
        let node = self.get_node(id)?;
        match &node.data {
            NodeData::Text => Some(self.text_of(node.span())),
            NodeData::CData { content } | NodeData::Comment { content } => {
                Some(content.map_or("", |c| self.text_of(c)))
            }
            _ => None,
        }
    }

    /// Get attributes for an element (or the prolog)
    pub fn attributes(&self, id: NodeId) -> &[XmlAttribute] {
        let Some(node) = self.get_node(id) else {
            return &[];
        };
        let start = node.attr_start as usize;
        self.attributes
            .get(start..start + node.attr_count as usize)
            .unwrap_or(&[])
    }

    /// Get attribute by name
    pub fn get_attribute(&self, node_id: NodeId, name: &str) -> Option<&XmlAttribute> {
        self.attributes(node_id)
            .iter()
            .find(|attr| self.text_of(attr.name) == name)
    }

    /// Get attribute value (quotes removed) by name
    pub fn get_attribute_value(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.get_attribute(node_id, name)
            .and_then(|attr| self.attribute_value(attr))
    }

    #[inline]
    pub fn attribute_name(&self, attr: &XmlAttribute) -> &str {
        self.text_of(attr.name)
    }

    /// Value without quotes, `None` for a name without value
    pub fn attribute_value(&self, attr: &XmlAttribute) -> Option<&str> {
        attr.unquoted_value(self.text()).map(|v| self.text_of(v))
    }

    /// Iterate over children of a node
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        let first = self.get_node(id).and_then(|n| n.first_child);
        ChildIter { doc: self, next: first }
    }

    /// Iterate over element children of a node
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).filter(|&c| self.nodes[c as usize].is_element())
    }

    /// Iterate over all descendants of a node
    pub fn descendants(&self, id: NodeId) -> DescendantIter<'_> {
        // Initialize stack with all children in reverse order (so first is processed first)
        let mut stack = Vec::new();
        if let Some(node) = self.get_node(id) {
            let mut child_id = node.last_child;
            while let Some(cid) = child_id {
                stack.push(cid);
                child_id = self.get_node(cid).and_then(|n| n.prev_sibling);
            }
        }
        DescendantIter { doc: self, stack }
    }

    /// Iterate from the parent of `id` up to the document node
    pub fn ancestors(&self, id: NodeId) -> AncestorIter<'_> {
        let next = self.get_node(id).and_then(|n| n.parent);
        AncestorIter { doc: self, next }
    }

    /// Iterate from `id` itself up to the document node
    pub fn ancestors_or_self(&self, id: NodeId) -> AncestorIter<'_> {
        let next = self.get_node(id).map(|_| id);
        AncestorIter { doc: self, next }
    }

    /// Element path from the root element down to `id` (inclusive)
    pub fn element_path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path: Vec<NodeId> = self
            .ancestors_or_self(id)
            .filter(|&a| self.nodes[a as usize].is_element())
            .collect();
        path.reverse();
        path
    }

    /// Deepest node whose extent contains `offset`.
    ///
    /// A node covers the gaps after its first character up to and including
    /// its end, so the caret right after `<a/>` still addresses `a`.
    pub fn find_node_at(&self, offset: usize) -> NodeId {
        let mut current = 0;
        'descend: loop {
            for child in self.children(current) {
                let node = &self.nodes[child as usize];
                if node.start >= offset {
                    break;
                }
                if offset <= node.end {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    /// Attribute of the node at `offset` whose name or value touches `offset`
    pub fn find_attribute_at(&self, offset: usize) -> Option<&XmlAttribute> {
        let node = self.find_node_at(offset);
        self.attributes(node)
            .iter()
            .find(|attr| attr.span().touches(offset))
    }

    /// The DOCTYPE node, if any
    pub fn doctype(&self) -> Option<NodeId> {
        self.children(0)
            .find(|&id| self.nodes[id as usize].kind() == NodeKind::DocType)
    }

    /// DOCTYPE payload
    pub fn doctype_data(&self) -> Option<&DocTypeData> {
        match &self.nodes[self.doctype()? as usize].data {
            NodeData::DocType(data) => Some(data),
            _ => None,
        }
    }

    /// `<?xml-model?>` processing instructions before the root element
    pub fn xml_model_declarations(&self) -> Vec<XmlModelDeclaration> {
        self.children(0)
            .filter_map(|id| {
                let node = &self.nodes[id as usize];
                let NodeData::ProcessingInstruction(pi) = &node.data else {
                    return None;
                };
                if pi.target.map(|t| self.text_of(t)) != Some("xml-model") {
                    return None;
                }
                let mut decl = XmlModelDeclaration {
                    node: id,
                    ..Default::default()
                };
                if let Some(content) = pi.content {
                    for (name, value) in pseudo_attributes(self.text(), content) {
                        let slot = match name {
                            "href" => &mut decl.href,
                            "type" => &mut decl.model_type,
                            "schematypens" => &mut decl.schematypens,
                            "group" => &mut decl.group,
                            "phase" => &mut decl.phase,
                            "title" => &mut decl.title,
                            _ => continue,
                        };
                        *slot = Some(value);
                    }
                }
                Some(decl)
            })
            .collect()
    }

    /// `xsi:schemaLocation` pairs declared on the root element
    pub fn schema_location_hints(&self) -> Vec<SchemaLocationHint> {
        let Some((_, value)) = self.xsi_attribute("schemaLocation") else {
            return Vec::new();
        };
        let text = self.text();
        let mut words = whitespace_words(text, value);
        let mut hints = Vec::new();
        while let (Some(namespace), Some(location)) = (words.next(), words.next()) {
            hints.push(SchemaLocationHint {
                namespace: Some(namespace.as_str(text).to_string()),
                location: location.as_str(text).to_string(),
                span: location,
            });
        }
        hints
    }

    /// `xsi:noNamespaceSchemaLocation` on the root element
    pub fn no_namespace_schema_location(&self) -> Option<SchemaLocationHint> {
        let (_, value) = self.xsi_attribute("noNamespaceSchemaLocation")?;
        let location = whitespace_words(self.text(), value).next()?;
        Some(SchemaLocationHint {
            namespace: None,
            location: self.text_of(location).to_string(),
            span: location,
        })
    }

    /// Root attribute `local` in the schema-instance namespace, with its
    /// unquoted value span
    fn xsi_attribute(&self, local: &str) -> Option<(&XmlAttribute, Span)> {
        let root = self.root_element?;
        let attr = self.attributes(root).iter().find(|attr| {
            let (prefix, name) = split_qname(self.text_of(attr.name));
            name == local && prefix.is_some() && self.attribute_namespace(attr) == Some(ns::XSI)
        })?;
        Some((attr, attr.unquoted_value(self.text())?))
    }
}

/// Iterator over child nodes
pub struct ChildIter<'d> {
    doc: &'d XmlDocument,
    next: Option<NodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.get_node(current).and_then(|n| n.next_sibling);
        Some(current)
    }
}

/// Iterator over descendant nodes (depth-first)
pub struct DescendantIter<'d> {
    doc: &'d XmlDocument,
    stack: Vec<NodeId>,
}

impl Iterator for DescendantIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;

        // Add children to stack in reverse order (so first child is processed first)
        if let Some(node) = self.doc.get_node(current) {
            let mut child_id = node.last_child;
            while let Some(id) = child_id {
                self.stack.push(id);
                child_id = self.doc.get_node(id).and_then(|n| n.prev_sibling);
            }
        }

        Some(current)
    }
}

/// Iterator over ancestor nodes, nearest first
pub struct AncestorIter<'d> {
    doc: &'d XmlDocument,
    next: Option<NodeId>,
}

impl Iterator for AncestorIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.get_node(current).and_then(|n| n.parent);
        Some(current)
    }
}

/// Whitespace-separated words of `span`
fn whitespace_words(text: &str, span: Span) -> impl Iterator<Item = Span> + '_ {
    let base = span.start;
    let value = span.as_str(text);
    value
        .split_ascii_whitespace()
        .map(move |word| {
            let start = base + (word.as_ptr() as usize - value.as_ptr() as usize);
            Span::new(start, start + word.len())
        })
}

/// `name="value"` pairs of a processing instruction body; value spans
/// exclude the quotes
fn pseudo_attributes(text: &str, content: Span) -> Vec<(&str, Span)> {
    let bytes = text.as_bytes();
    let end = content.end.min(text.len());
    let mut pos = content.start;
    let mut pairs = Vec::new();
    let skip_ws = |mut p: usize| {
        while p < end && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        p
    };
    loop {
        pos = skip_ws(pos);
        let name_start = pos;
        while pos < end && bytes[pos] != b'=' && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos == name_start {
            break;
        }
        let name = &text[name_start..pos];
        pos = skip_ws(pos);
        if pos >= end || bytes[pos] != b'=' {
            continue;
        }
        pos = skip_ws(pos + 1);
        if pos >= end {
            break;
        }
        let Some(&quote) = bytes.get(pos).filter(|q| **q == b'"' || **q == b'\'') else {
            continue;
        };
        let value_start = pos + 1;
        let value_end = memchr::memchr(quote, &bytes[value_start..end])
            .map_or(end, |i| value_start + i);
        pairs.push((name, Span::new(value_start, value_end)));
        pos = (value_end + 1).min(end);
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn find(doc: &XmlDocument, name: &str) -> NodeId {
        doc.descendants(0)
            .find(|&id| doc.node_name(id) == Some(name))
            .unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let doc = XmlDocument::parse("<root>hello</root>");
        let root = doc.root_element_id().unwrap();
        assert_eq!(doc.node_name(root), Some("root"));
        let text = doc.children(root).next().unwrap();
        assert_eq!(doc.text_content(text), Some("hello"));
    }

    #[test]
    fn test_closed_element() {
        let doc = XmlDocument::parse("<a>...</a>");
        let a = doc.get_node(find(&doc, "a")).unwrap();
        assert!(a.closed);
        assert_eq!(a.end_tag_open(), Some(6));
        assert_eq!(a.span(), Span::new(0, 10));
        assert_eq!(a.element().unwrap().start_tag_close, Some(2));
    }

    #[test]
    fn test_unclosed_child_ends_at_parent_close_tag() {
        let doc = XmlDocument::parse("<a><b></a>");
        let a_id = find(&doc, "a");
        let b_id = find(&doc, "b");
        let a = doc.get_node(a_id).unwrap();
        let b = doc.get_node(b_id).unwrap();
        assert_eq!(b.parent, Some(a_id));
        assert!(!b.closed);
        assert_eq!(b.end, 6);
        assert!(a.closed);
        assert_eq!(a.end, 10);
    }

    #[test]
    fn test_self_closed_element() {
        let doc = XmlDocument::parse("<a/>");
        let a = doc.root_element().unwrap();
        assert!(a.closed);
        assert!(a.is_self_closed());
        assert!(!a.has_children());
        assert_eq!(a.end_tag_open(), None);
        assert_eq!(doc.node_count(), 2);
    }

    #[rstest]
    #[case("")]
    #[case("<")]
    #[case("</")]
    #[case("<a")]
    #[case("<a b=\"")]
    #[case("<!--")]
    #[case("<![CDATA[")]
    #[case("<?")]
    #[case("<!DOCTYPE a [ <!ELEMENT")]
    #[case("<a><b><c></x></a></a></a>")]
    #[case("</a><a>é\u{1F600}</a")]
    fn test_parse_always_covers_text(#[case] text: &str) {
        let doc = XmlDocument::parse(text);
        assert_eq!(doc.document_node().span(), Span::new(0, text.len()));
        for id in doc.descendants(0) {
            let node = doc.get_node(id).unwrap();
            assert!(node.start <= node.end && node.end <= text.len());
        }
    }

    #[test]
    fn test_open_elements_end_at_text_length() {
        let doc = XmlDocument::parse("<a><b>text");
        for name in ["a", "b"] {
            let node = doc.get_node(find(&doc, name)).unwrap();
            assert!(!node.closed);
            assert_eq!(node.end, 10);
        }
    }

    #[test]
    fn test_dangling_end_tag() {
        let doc = XmlDocument::parse("<a></b></a>");
        let a = doc.root_element().unwrap();
        assert!(a.closed);
        assert!(!a.has_children());
        assert_eq!(doc.dangling_end_tags(), &[Span::new(3, 7)]);
    }

    #[test]
    fn test_close_tag_is_case_sensitive() {
        let doc = XmlDocument::parse("<a></A>");
        assert!(!doc.root_element().unwrap().closed);
        assert_eq!(doc.dangling_end_tags().len(), 1);
    }

    #[test]
    fn test_unterminated_value_consumes_rest() {
        let text = "<a x=\"foo><b/></a>";
        let doc = XmlDocument::parse(text);
        let a = doc.root_element_id().unwrap();
        assert_eq!(doc.get_attribute_value(a, "x"), Some("foo><b/></a>"));
        assert!(!doc.get_node(a).unwrap().has_children());
    }

    #[test]
    fn test_duplicate_attribute_replaces_value() {
        let doc = XmlDocument::parse("<a x='1' y='2' x='3'/>");
        let a = doc.root_element_id().unwrap();
        let attrs: Vec<_> = doc
            .attributes(a)
            .iter()
            .map(|attr| (doc.attribute_name(attr), doc.attribute_value(attr)))
            .collect();
        assert_eq!(attrs, vec![("x", Some("3")), ("y", Some("2"))]);
    }

    #[test]
    fn test_attribute_without_value() {
        let doc = XmlDocument::parse("<a checked></a>");
        let a = doc.root_element_id().unwrap();
        let attr = doc.get_attribute(a, "checked").unwrap();
        assert_eq!(attr.value, None);
        assert_eq!(attr.owner, a);
    }

    #[test]
    fn test_whitespace_text_is_skipped() {
        let doc = XmlDocument::parse("<a>\n  <b/>\n  tail \n</a>");
        let a = doc.root_element_id().unwrap();
        let kinds: Vec<_> = doc
            .children(a)
            .map(|id| doc.get_node(id).unwrap().kind())
            .collect();
        assert_eq!(kinds, vec![NodeKind::Element, NodeKind::Text]);
    }

    #[test]
    fn test_comment_cdata_and_pi() {
        let doc = XmlDocument::parse("<?xml version=\"1.0\"?><a><!-- c --><![CDATA[x<y]]><?pi data?></a>");
        let prolog = doc.children(0).next().unwrap();
        let node = doc.get_node(prolog).unwrap();
        assert!(matches!(&node.data, NodeData::ProcessingInstruction(pi) if pi.prolog));
        assert_eq!(doc.get_attribute_value(prolog, "version"), Some("1.0"));

        let a = doc.root_element_id().unwrap();
        let children: Vec<_> = doc.children(a).collect();
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text_content(children[0]), Some(" c "));
        assert_eq!(doc.text_content(children[1]), Some("x<y"));
        assert_eq!(doc.node_name(children[2]), Some("pi"));
        assert!(children.iter().all(|&c| doc.get_node(c).unwrap().closed));
    }

    #[test]
    fn test_unclosed_comment_runs_to_end() {
        let doc = XmlDocument::parse("<a><!-- <b/>");
        let a = doc.root_element_id().unwrap();
        let comment = doc.children(a).next().unwrap();
        let node = doc.get_node(comment).unwrap();
        assert_eq!(node.kind(), NodeKind::Comment);
        assert!(!node.closed);
        assert_eq!(node.end, 12);
    }

    #[test]
    fn test_unterminated_pi_is_closed_by_next_tag() {
        let doc = XmlDocument::parse("<a><?pi <b/></a>");
        let a = doc.root_element_id().unwrap();
        let children: Vec<_> = doc.children(a).collect();
        assert_eq!(children.len(), 2);
        let pi = doc.get_node(children[0]).unwrap();
        assert!(!pi.closed);
        assert_eq!(pi.end, 8);
        assert_eq!(doc.node_name(children[1]), Some("b"));
        assert!(doc.get_node(a).unwrap().closed);
    }

    #[test]
    fn test_doctype_with_internal_subset() {
        let text = r#"<!DOCTYPE note SYSTEM "note.dtd" [
  <!-- root -->
  <!ELEMENT note (to, body?)>
  <!ATTLIST note lang CDATA #IMPLIED kind (a|b) "a">
  <!ENTITY % common "x">
]><note/>"#;
        let doc = XmlDocument::parse(text);
        let doctype = doc.doctype().unwrap();
        let data = doc.doctype_data().unwrap();
        assert_eq!(doc.text_of(data.name.unwrap()), "note");
        assert_eq!(doc.text_of(data.system_id.unwrap()), "\"note.dtd\"");
        assert!(doc.get_node(doctype).unwrap().closed);

        let kinds: Vec<_> = doc
            .children(doctype)
            .map(|id| doc.get_node(id).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Comment,
                NodeKind::DtdElementDecl,
                NodeKind::DtdAttlistDecl,
                NodeKind::DtdEntityDecl
            ]
        );
        let attlist = doc.children(doctype).nth(2).unwrap();
        let NodeData::DtdAttlistDecl(decl) = &doc.get_node(attlist).unwrap().data else {
            panic!("expected attlist");
        };
        assert_eq!(decl.definitions.len(), 2);
        assert_eq!(doc.text_of(decl.definitions[1].att_type.unwrap()), "(a|b)");
        assert_eq!(doc.text_of(decl.definitions[1].value.unwrap()), "\"a\"");
        assert_eq!(doc.node_name(doc.root_element_id().unwrap()), Some("note"));
    }

    #[test]
    fn test_parse_dtd_file() {
        let doc = XmlDocument::parse_dtd("file:///n.dtd", "<!ELEMENT a EMPTY>\n<!ELEMENT b (#PCDATA)>");
        let names: Vec<_> = doc.children(0).filter_map(|id| doc.node_name(id)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_find_node_at() {
        let text = "<a><b x='1'/>text</a>";
        let doc = XmlDocument::parse(text);
        let b = find(&doc, "b");
        assert_eq!(doc.find_node_at(0), 0);
        assert_eq!(doc.find_node_at(1), doc.root_element_id().unwrap());
        assert_eq!(doc.find_node_at(5), b);
        assert_eq!(doc.find_node_at(13), b);
        assert_eq!(doc.get_node(doc.find_node_at(15)).unwrap().kind(), NodeKind::Text);
        let attr = doc.find_attribute_at(8).unwrap();
        assert_eq!(doc.attribute_name(attr), "x");
    }

    #[test]
    fn test_xml_model_declarations() {
        let text = r#"<?xml-model href="s.rng" type='application/xml' schematypens="http://relaxng.org/ns/structure/1.0"?><r/>"#;
        let doc = XmlDocument::parse(text);
        let models = doc.xml_model_declarations();
        assert_eq!(models.len(), 1);
        assert_eq!(doc.text_of(models[0].href.unwrap()), "s.rng");
        assert_eq!(doc.text_of(models[0].model_type.unwrap()), "application/xml");
        assert_eq!(doc.text_of(models[0].schematypens.unwrap()), ns::RELAXNG);
        assert_eq!(models[0].title, None);
    }

    #[test]
    fn test_schema_location_hints() {
        let text = r#"<r xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
   xsi:schemaLocation="urn:a  a.xsd
   urn:b b.xsd" xsi:noNamespaceSchemaLocation=" s.xsd "/>"#;
        let doc = XmlDocument::parse(text);
        let hints = doc.schema_location_hints();
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[1].namespace.as_deref(), Some("urn:b"));
        assert_eq!(hints[1].location, "b.xsd");
        assert_eq!(doc.text_of(hints[0].span), "a.xsd");

        let hint = doc.no_namespace_schema_location().unwrap();
        assert_eq!(hint.location, "s.xsd");
        assert_eq!(hint.namespace, None);
    }

    #[test]
    fn test_schema_location_requires_xsi_namespace() {
        let doc = XmlDocument::parse(r#"<r xmlns:x="urn:other" x:noNamespaceSchemaLocation="s.xsd"/>"#);
        assert!(doc.no_namespace_schema_location().is_none());
    }

    #[test]
    fn test_element_path_and_namespace() {
        let doc = XmlDocument::parse(r#"<p:a xmlns:p="urn:p"><b xmlns="urn:d"><c/></b></p:a>"#);
        let c = find(&doc, "c");
        let path: Vec<_> = doc
            .element_path(c)
            .into_iter()
            .filter_map(|id| doc.node_local_name(id))
            .collect();
        assert_eq!(path, vec!["a", "b", "c"]);
        assert_eq!(doc.namespace_uri(c), Some("urn:d"));
        assert_eq!(doc.namespace_uri(find(&doc, "p:a")), Some("urn:p"));
    }
}
