//! XML Node representation
//!
//! Uses NodeId (u32) for compact, cache-friendly node references. Every node
//! carries its `[start, end)` byte extent in the document text; names and
//! values are spans into that text rather than copies.

use crate::index::Span;

/// Compact node identifier (index into arena)
pub type NodeId = u32;

/// Compact attribute identifier (index into the attribute arena)
pub type AttrId = u32;

/// Type of XML node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Document root
    Document,
    /// Element node
    Element,
    /// Text content
    Text,
    /// CDATA section
    CData,
    /// Comment
    Comment,
    /// Processing instruction, the XML prolog included
    ProcessingInstruction,
    /// `<!DOCTYPE ...>`
    DocType,
    /// `<!ELEMENT ...>` inside a DTD
    DtdElementDecl,
    /// `<!ATTLIST ...>` inside a DTD
    DtdAttlistDecl,
    /// `<!ENTITY ...>` inside a DTD
    DtdEntityDecl,
}

/// Element-specific data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementData {
    /// Tag name (absent for a bare `<`)
    pub name: Option<Span>,
    /// Offset of the `>` closing the start tag
    pub start_tag_close: Option<usize>,
    /// Offset of the `</` of the matching end tag
    pub end_tag_open: Option<usize>,
    /// Written as `<a/>`
    pub self_closed: bool,
}

/// Processing instruction data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiData {
    pub target: Option<Span>,
    pub content: Option<Span>,
    /// `<?xml ...?>` prolog rather than a general PI
    pub prolog: bool,
}

/// DOCTYPE data; identifier spans include their quotes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocTypeData {
    pub name: Option<Span>,
    /// `PUBLIC` or `SYSTEM`
    pub kind: Option<Span>,
    pub public_id: Option<Span>,
    pub system_id: Option<Span>,
    /// From `[` to `]`, both included
    pub internal_subset: Option<Span>,
}

/// `<!ELEMENT name category-or-content>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtdElementDeclData {
    pub name: Option<Span>,
    /// `EMPTY` or `ANY`
    pub category: Option<Span>,
    /// Parenthesised content model
    pub content: Option<Span>,
}

/// One attribute definition of an `<!ATTLIST>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtdAttrDef {
    pub name: Span,
    pub att_type: Option<Span>,
    /// `#REQUIRED`, `#IMPLIED` or `#FIXED`
    pub default_kind: Option<Span>,
    /// Quoted default value
    pub value: Option<Span>,
}

/// `<!ATTLIST element (name type default)*>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtdAttlistDeclData {
    pub element_name: Option<Span>,
    pub definitions: Vec<DtdAttrDef>,
}

/// `<!ENTITY [%] name (value | PUBLIC pubid sysid | SYSTEM sysid) [NDATA n]>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtdEntityDeclData {
    pub parameter: bool,
    pub name: Option<Span>,
    /// Quoted literal value
    pub value: Option<Span>,
    pub kind: Option<Span>,
    pub public_id: Option<Span>,
    pub system_id: Option<Span>,
    /// The whole `NDATA name` clause
    pub ndata: Option<Span>,
}

/// Kind-specific node payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    /// Text nodes are their own extent
    Text,
    CData { content: Option<Span> },
    Comment { content: Option<Span> },
    ProcessingInstruction(PiData),
    DocType(DocTypeData),
    DtdElementDecl(DtdElementDeclData),
    DtdAttlistDecl(DtdAttlistDeclData),
    DtdEntityDecl(DtdEntityDeclData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Document => NodeKind::Document,
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Text => NodeKind::Text,
            NodeData::CData { .. } => NodeKind::CData,
            NodeData::Comment { .. } => NodeKind::Comment,
            NodeData::ProcessingInstruction(_) => NodeKind::ProcessingInstruction,
            NodeData::DocType(_) => NodeKind::DocType,
            NodeData::DtdElementDecl(_) => NodeKind::DtdElementDecl,
            NodeData::DtdAttlistDecl(_) => NodeKind::DtdAttlistDecl,
            NodeData::DtdEntityDecl(_) => NodeKind::DtdEntityDecl,
        }
    }
}

/// An XML node in the arena
#[derive(Debug, Clone)]
pub struct XmlNode {
    /// Parent node (None for document root)
    pub parent: Option<NodeId>,
    /// First child node
    pub first_child: Option<NodeId>,
    /// Last child node
    pub last_child: Option<NodeId>,
    /// Previous sibling
    pub prev_sibling: Option<NodeId>,
    /// Next sibling
    pub next_sibling: Option<NodeId>,
    /// Byte offset where the node starts
    pub start: usize,
    /// Byte offset one past the node (document length for nodes left open)
    pub end: usize,
    /// Properly terminated
    pub closed: bool,
    /// Start of attributes in attribute arena (elements and the prolog)
    pub attr_start: u32,
    /// Number of attributes
    pub attr_count: u32,
    /// Depth in document tree
    pub depth: u16,
    pub data: NodeData,
}

impl XmlNode {
    /// Create a new document root node
    pub fn document(len: usize) -> Self {
        Self::new(NodeData::Document, None, 0, 0, len)
    }

    pub(crate) fn new(
        data: NodeData,
        parent: Option<NodeId>,
        depth: u16,
        start: usize,
        end: usize,
    ) -> Self {
        XmlNode {
            parent,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            start,
            end,
            closed: false,
            attr_start: 0,
            attr_count: 0,
            depth,
            data,
        }
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    /// The node extent
    #[inline]
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// Check if this is an element node
    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    /// Check if this is a text node
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self.data, NodeData::Text)
    }

    /// Element payload, if this is an element
    #[inline]
    pub fn element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(data) => Some(data),
            _ => None,
        }
    }

    /// Written as `<a/>`
    #[inline]
    pub fn is_self_closed(&self) -> bool {
        self.element().is_some_and(|e| e.self_closed)
    }

    /// Offset of the `</` of the matching end tag
    #[inline]
    pub fn end_tag_open(&self) -> Option<usize> {
        self.element().and_then(|e| e.end_tag_open)
    }

    /// Check if this node has children
    #[inline]
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }

    /// Check if this node has attributes
    #[inline]
    pub fn has_attributes(&self) -> bool {
        self.attr_count > 0
    }

    /// Nodes the builder keeps as cursor only until their closing token
    #[inline]
    pub(crate) fn is_leaf_container(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::CData
                | NodeKind::Comment
                | NodeKind::ProcessingInstruction
                | NodeKind::DtdElementDecl
                | NodeKind::DtdAttlistDecl
                | NodeKind::DtdEntityDecl
        )
    }
}

/// Stored attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Attribute name
    pub name: Span,
    /// Value including quotes; `None` for a name without `=value`
    pub value: Option<Span>,
    /// Element (or prolog) carrying the attribute
    pub owner: NodeId,
}

impl XmlAttribute {
    pub fn new(name: Span, owner: NodeId) -> Self {
        XmlAttribute {
            name,
            value: None,
            owner,
        }
    }

    /// Extent from the name to the end of the value
    pub fn span(&self) -> Span {
        Span::new(self.name.start, self.value.map_or(self.name.end, |v| v.end))
    }

    /// The value without its quotes
    pub fn unquoted_value(&self, input: &str) -> Option<Span> {
        self.value.map(|v| v.unquoted(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let doc = XmlNode::document(12);
        assert_eq!(doc.kind(), NodeKind::Document);
        assert!(doc.parent.is_none());
        assert_eq!(doc.depth, 0);
        assert_eq!(doc.span(), Span::new(0, 12));
    }

    #[test]
    fn test_element_node() {
        let elem = XmlNode::new(NodeData::Element(ElementData::default()), Some(0), 1, 3, 5);
        assert_eq!(elem.kind(), NodeKind::Element);
        assert_eq!(elem.parent, Some(0));
        assert!(!elem.is_self_closed());
        assert_eq!(elem.end_tag_open(), None);
        assert!(!elem.is_leaf_container());
    }

    #[test]
    fn test_attribute_span() {
        let input = "<a x='1' y>";
        let mut x = XmlAttribute::new(Span::new(3, 4), 1);
        x.value = Some(Span::new(5, 8));
        assert_eq!(x.span(), Span::new(3, 8));
        assert_eq!(x.unquoted_value(input).map(|s| s.as_str(input)), Some("1"));
        let y = XmlAttribute::new(Span::new(9, 10), 1);
        assert_eq!(y.span(), Span::new(9, 10));
        assert_eq!(y.unquoted_value(input), None);
    }
}
