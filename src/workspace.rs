//! Open document store
//!
//! Keeps the live text of every open document and publishes an immutable
//! [`XmlDocument`] snapshot per version. Readers hold an `Arc` to the
//! snapshot they started with; edits never mutate a published snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use lsp_types::TextDocumentContentChangeEvent;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dom::{NodeId, XmlDocument};
use crate::error::Result;
use crate::index::PositionIndex;
use crate::model::{ContentModelManager, Declaration, Dialect, GrammarBinding};

/// Live text of one open document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: String,
    pub version: i32,
    pub index: PositionIndex,
}

impl TextDocument {
    pub fn new(uri: impl Into<String>, version: i32, text: impl Into<String>) -> Self {
        TextDocument {
            uri: uri.into(),
            version,
            index: PositionIndex::new(text),
        }
    }

    pub fn text(&self) -> &str {
        self.index.text()
    }

    /// Parse the current text; standalone DTD resources parse as a subset
    pub fn parse(&self) -> XmlDocument {
        if Dialect::from_uri(&self.uri) == Some(Dialect::Dtd) {
            XmlDocument::parse_dtd(self.uri.clone(), self.index.text())
        } else {
            XmlDocument::from_index(self.uri.clone(), self.index.clone())
        }
    }
}

struct Entry {
    text: TextDocument,
    snapshot: Arc<XmlDocument>,
    /// Grammars resolved for `snapshot`
    bindings: Option<Arc<[GrammarBinding]>>,
}

impl Entry {
    fn new(text: TextDocument, snapshot: Arc<XmlDocument>) -> Self {
        Entry {
            text,
            snapshot,
            bindings: None,
        }
    }
}

/// Open documents by URI
#[derive(Default)]
pub struct Workspace {
    documents: RwLock<HashMap<String, Entry>>,
    /// Grammar cache to invalidate when an open grammar file changes
    manager: Option<Arc<ContentModelManager>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("documents", &self.documents.read().len())
            .finish()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict cached grammars built from documents edited in this workspace
    pub fn with_manager(mut self, manager: Arc<ContentModelManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn did_open(&self, uri: &str, version: i32, text: impl Into<String>) -> Arc<XmlDocument> {
        let text = TextDocument::new(uri, version, text);
        let snapshot = Arc::new(text.parse());
        debug!(uri, version, "document opened");
        self.documents
            .write()
            .insert(uri.to_string(), Entry::new(text, snapshot.clone()));
        self.invalidate(uri);
        snapshot
    }

    /// Apply incremental or full changes and publish a new snapshot.
    ///
    /// An unknown URI opens the document from the final full-text change if
    /// there is one.
    pub fn did_change(
        &self,
        uri: &str,
        version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<Arc<XmlDocument>> {
        let mut documents = self.documents.write();
        let Some(entry) = documents.get_mut(uri) else {
            drop(documents);
            let text = changes
                .iter()
                .rev()
                .find(|c| c.range.is_none())
                .map(|c| c.text.clone())
                .unwrap_or_default();
            return Ok(self.did_open(uri, version, text));
        };
        let mut text = entry.text.clone();
        text.index.update(changes)?;
        text.version = version;
        let snapshot = Arc::new(text.parse());
        trace!(uri, version, changes = changes.len(), "document changed");
        *entry = Entry::new(text, snapshot.clone());
        drop(documents);
        self.invalidate(uri);
        Ok(snapshot)
    }

    pub fn did_close(&self, uri: &str) -> bool {
        let closed = self.documents.write().remove(uri).is_some();
        if closed {
            debug!(uri, "document closed");
            self.invalidate(uri);
        }
        closed
    }

    /// Latest snapshot of `uri`
    pub fn get(&self, uri: &str) -> Option<Arc<XmlDocument>> {
        self.documents.read().get(uri).map(|e| e.snapshot.clone())
    }

    pub fn text_document(&self, uri: &str) -> Option<TextDocument> {
        self.documents.read().get(uri).map(|e| e.text.clone())
    }

    /// Grammars bound to the latest snapshot of `uri`, resolved once per
    /// version. `None` without a manager or for a document that is not open.
    pub fn grammars(&self, uri: &str, token: &CancellationToken) -> Result<Option<Arc<[GrammarBinding]>>> {
        let Some(manager) = &self.manager else {
            return Ok(None);
        };
        let (snapshot, cached) = match self.documents.read().get(uri) {
            Some(entry) => (entry.snapshot.clone(), entry.bindings.clone()),
            None => return Ok(None),
        };
        if let Some(bindings) = cached {
            return Ok(Some(bindings));
        }
        let bindings: Arc<[GrammarBinding]> = manager.resolve_grammars(&snapshot, token)?.into();
        if let Some(entry) = self.documents.write().get_mut(uri) {
            // Another version may have been published meanwhile
            if Arc::ptr_eq(&entry.snapshot, &snapshot) {
                entry.bindings = Some(bindings.clone());
            }
        }
        Ok(Some(bindings))
    }

    /// Declaration of `node` in the latest snapshot of `uri`, using the
    /// bindings cached for that version
    pub fn declaration(&self, uri: &str, node: NodeId, token: &CancellationToken) -> Result<Option<Declaration>> {
        let Some(snapshot) = self.get(uri) else {
            return Ok(None);
        };
        let Some(bindings) = self.grammars(uri, token)? else {
            return Ok(None);
        };
        Ok(ContentModelManager::declaration_in(&bindings, &snapshot, node))
    }

    pub fn uris(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Evict grammars built from `uri`; bindings of open documents may hold
    /// one of them, so every cached binding list is dropped as well
    fn invalidate(&self, uri: &str) {
        if let Some(manager) = &self.manager {
            if manager.evict_uri(uri) > 0 {
                for entry in self.documents.write().values_mut() {
                    entry.bindings = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResolver;
    use crate::settings::ContentModelSettings;
    use lsp_types::{Position, Range};

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let workspace = Workspace::new();
        let first = workspace.did_open("file:///a.xml", 1, "<a>\n  <b/>\n</a>");
        let second = workspace
            .did_change("file:///a.xml", 2, &[edit((1, 3), (1, 4), "item")])
            .unwrap();

        assert_eq!(first.text(), "<a>\n  <b/>\n</a>");
        assert_eq!(second.text(), "<a>\n  <item/>\n</a>");
        let item = second.root_element_id().and_then(|r| second.child_elements(r).next()).unwrap();
        assert_eq!(second.node_name(item), Some("item"));
        assert_eq!(workspace.text_document("file:///a.xml").unwrap().version, 2);
        assert!(Arc::ptr_eq(&workspace.get("file:///a.xml").unwrap(), &second));
    }

    #[test]
    fn test_change_out_of_range_keeps_previous_snapshot() {
        let workspace = Workspace::new();
        let first = workspace.did_open("file:///a.xml", 1, "<a/>");
        let err = workspace
            .did_change("file:///a.xml", 2, &[edit((5, 0), (5, 0), "x")])
            .unwrap_err();
        assert!(matches!(err, crate::Error::Position(_)));
        assert!(Arc::ptr_eq(&workspace.get("file:///a.xml").unwrap(), &first));
    }

    #[test]
    fn test_full_change_on_unknown_document_and_close() {
        let workspace = Workspace::new();
        let full = TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "<r/>".to_string(),
        };
        let doc = workspace.did_change("file:///n.xml", 3, &[full]).unwrap();
        assert_eq!(doc.text(), "<r/>");
        assert_eq!(workspace.len(), 1);
        assert!(workspace.did_close("file:///n.xml"));
        assert!(!workspace.did_close("file:///n.xml"));
        assert!(workspace.get("file:///n.xml").is_none());
        assert!(workspace.is_empty());
    }

    #[test]
    fn test_dtd_document_parses_declarations() {
        let workspace = Workspace::new();
        let doc = workspace.did_open("file:///g/note.dtd", 1, "<!ELEMENT note (to)>\n<!ELEMENT to (#PCDATA)>");
        assert_eq!(doc.children(0).count(), 2);
    }

    #[test]
    fn test_editing_grammar_evicts_cached_grammar() {
        let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:element name="r"/></xs:schema>"#;
        let resolver = Arc::new(MemoryResolver::new().with("file:///w/s.xsd", schema));
        let manager = Arc::new(ContentModelManager::new(ContentModelSettings::default(), resolver));
        let workspace = Workspace::new().with_manager(manager.clone());

        let doc = workspace.did_open(
            "file:///w/doc.xml",
            1,
            r#"<r xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="s.xsd"/>"#,
        );
        manager.resolve_grammars(&doc, &CancellationToken::new()).unwrap();
        assert!(manager.is_cached("file:///w/s.xsd"));

        workspace.did_open("file:///w/s.xsd", 1, schema);
        assert!(!manager.is_cached("file:///w/s.xsd"));
    }

    #[test]
    fn test_grammars_resolve_once_per_version() {
        let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:element name="r"/></xs:schema>"#;
        let resolver = Arc::new(MemoryResolver::new().with("file:///w/s.xsd", schema));
        let manager = Arc::new(ContentModelManager::new(ContentModelSettings::default(), resolver));
        let workspace = Workspace::new().with_manager(manager);
        let token = CancellationToken::new();
        let uri = "file:///w/doc.xml";
        let doc = workspace.did_open(
            uri,
            1,
            r#"<r xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="s.xsd"/>"#,
        );
        let root = doc.root_element_id().unwrap();

        let first = workspace.grammars(uri, &token).unwrap().unwrap();
        assert_eq!(first.len(), 1);
        for _ in 0..3 {
            let decl = workspace.declaration(uri, root, &token).unwrap().unwrap();
            assert_eq!(decl.element().name(), "r");
        }
        assert!(Arc::ptr_eq(&first, &workspace.grammars(uri, &token).unwrap().unwrap()));

        // A new version resolves again
        workspace.did_change(uri, 2, &[edit((0, 0), (0, 0), "")]).unwrap();
        let second = workspace.grammars(uri, &token).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // Editing the grammar drops the cached bindings of its users
        workspace.did_open("file:///w/s.xsd", 1, schema);
        let third = workspace.grammars(uri, &token).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_grammars_without_manager_or_document() {
        let workspace = Workspace::new();
        workspace.did_open("file:///a.xml", 1, "<a/>");
        let token = CancellationToken::new();
        assert!(workspace.grammars("file:///a.xml", &token).unwrap().is_none());
        assert!(workspace.declaration("file:///a.xml", 0, &token).unwrap().is_none());
    }
}
