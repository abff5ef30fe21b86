//! xmlcore - XML language-server core
//!
//! Layers, bottom-up:
//! - `core`: restartable tokenizer over possibly-malformed XML and DTD text
//! - `dom`: arena DOM with byte spans, tolerant of any input
//! - `index`: line table for offset / (line, UTF-16 column) conversion and
//!   incremental edits
//! - `model`: XSD, DTD and RelaxNG grammars adapted to one content model,
//!   plus the manager binding grammars to documents
//! - `generator`: XML fragments synthesized from element declarations
//! - `workspace`: open documents and their published snapshots
//!
//! ```
//! use xmlcore::XmlDocument;
//!
//! let doc = XmlDocument::parse("<a><b x=\"1\"/></a>");
//! let b = doc.find_node_at(4);
//! assert_eq!(doc.node_name(b), Some("b"));
//! ```

pub mod core;
pub mod dom;
pub mod error;
pub mod generator;
pub mod index;
pub mod model;
pub mod resource;
pub mod settings;
pub mod workspace;

pub use crate::core::{ScannerState, Token, TokenKind, Tokenizer};
pub use dom::{NodeId, XmlAttribute, XmlDocument, XmlNode};
pub use error::{Cancelled, Error, GrammarError, PositionError, Result};
pub use generator::{Fragment, Segment, XmlGenerator};
pub use index::{PositionIndex, Span};
pub use model::{
    Cardinality, CmAttribute, CmDocument, CmElement, ContentModelManager, Declaration, Dialect,
    GrammarBinding,
};
pub use resource::{FileResolver, MemoryResolver, ResourceResolver};
pub use settings::{ContentModelSettings, FileAssociation, GeneratorSettings};
pub use tokio_util::sync::CancellationToken;
pub use workspace::{TextDocument, Workspace};
