//! DOM Module - Arena-based tolerant XML tree
//!
//! Implements an editor-oriented DOM using:
//! - Arena allocation for nodes and attributes
//! - NodeId (u32) indices for cache-friendly traversal
//! - Byte spans into the owned text for names, values and node extents
//! - Lazy namespace resolution over ancestor `xmlns` declarations
//!
//! Any text parses; malformed regions yield unclosed nodes rather than errors.

mod builder;
pub mod document;
pub mod namespace;
pub mod node;

pub use document::{SchemaLocationHint, XmlDocument, XmlModelDeclaration};
pub use namespace::{ns, split_qname, NamespaceResolver, NsBinding};
pub use node::{
    AttrId, DocTypeData, DtdAttlistDeclData, DtdAttrDef, DtdElementDeclData, DtdEntityDeclData,
    ElementData, NodeData, NodeId, NodeKind, PiData, XmlAttribute, XmlNode,
};
