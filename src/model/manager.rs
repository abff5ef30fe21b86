//! Content Model Manager
//!
//! Finds the grammars bound to a document, loads each grammar resource at
//! most once and answers declaration lookups for DOM nodes.
//!
//! ## Binding discovery (in order)
//!
//! 1. DOCTYPE: internal subset (no fetch), then the external subset
//! 2. `<?xml-model href="..."?>`
//! 3. `xsi:schemaLocation` pairs
//! 4. `xsi:noNamespaceSchemaLocation`
//! 5. File associations (glob over the document path)
//! 6. Catalog `uri` entries for the root namespace
//!
//! Locations pass through the XML catalogs before falling back to resolution
//! against the document URI.
//!
//! ## Cache
//!
//! Each absolute URI owns one slot (`Arc<OnceLock<..>>`) in an LRU map.
//! Concurrent requests for the same URI block on the slot and reuse one
//! outcome; failed or cancelled loads remove their slot again.

use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    CatalogResolver, CmAttribute, CmDocument, CmElement, DeclId, Dialect, DtdDocument,
    RelaxNgDocument, XsdDocument,
};
use crate::dom::{NodeId, XmlAttribute, XmlDocument};
use crate::error::{Cancelled, GrammarError, Result};
use crate::resource::{file_name, is_remote, read_resource, resolve_location, ResourceResolver};
use crate::settings::ContentModelSettings;

type LoadResult = std::result::Result<Arc<dyn CmDocument>, GrammarError>;
type Slot = Arc<OnceLock<LoadResult>>;

/// How a grammar was bound to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Doctype,
    XmlModel,
    SchemaLocation,
    NoNamespaceSchemaLocation,
    FileAssociation,
    Catalog,
}

/// A grammar bound to a document
#[derive(Debug, Clone)]
pub struct GrammarBinding {
    pub kind: BindingKind,
    /// Absolute grammar URI (the document URI for an internal subset)
    pub uri: String,
    /// Namespace the binding was declared for
    pub namespace: Option<String>,
    pub document: Arc<dyn CmDocument>,
}

/// Owned reference to an element declaration
#[derive(Debug, Clone)]
pub struct Declaration {
    document: Arc<dyn CmDocument>,
    id: DeclId,
    kind: BindingKind,
}

impl Declaration {
    pub fn element(&self) -> CmElement<'_> {
        CmElement {
            doc: &*self.document,
            id: self.id,
        }
    }

    pub fn cm_document(&self) -> &Arc<dyn CmDocument> {
        &self.document
    }

    /// Binding the declaration was found through
    pub fn binding_kind(&self) -> BindingKind {
        self.kind
    }
}

/// Owned reference to an attribute declaration
#[derive(Debug, Clone)]
pub struct AttributeDeclaration {
    declaration: Declaration,
    index: usize,
}

impl AttributeDeclaration {
    pub fn attribute(&self) -> CmAttribute<'_> {
        CmAttribute {
            owner: self.declaration.element(),
            index: self.index,
        }
    }

    /// Declaration of the owning element
    pub fn owner(&self) -> &Declaration {
        &self.declaration
    }
}

/// A grammar location found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    kind: BindingKind,
    location: String,
    namespace: Option<String>,
    dialect: Option<Dialect>,
}

/// Grammar binding resolution and declaration lookup
pub struct ContentModelManager {
    settings: ContentModelSettings,
    resolver: Arc<dyn ResourceResolver>,
    catalogs: RwLock<CatalogResolver>,
    associations: Vec<(glob::Pattern, String)>,
    cache: Mutex<LruCache<String, Slot>>,
}

impl std::fmt::Debug for ContentModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentModelManager")
            .field("settings", &self.settings)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl ContentModelManager {
    pub fn new(settings: ContentModelSettings, resolver: Arc<dyn ResourceResolver>) -> Self {
        let catalogs = CatalogResolver::load(&settings.catalogs, &*resolver);
        let associations = compile_associations(&settings);
        let capacity = NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        ContentModelManager {
            settings,
            resolver,
            catalogs: RwLock::new(catalogs),
            associations,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn settings(&self) -> &ContentModelSettings {
        &self.settings
    }

    /// Replace the settings; catalogs are reloaded and the cache dropped
    pub fn set_settings(&mut self, settings: ContentModelSettings) {
        *self.catalogs.get_mut() = CatalogResolver::load(&settings.catalogs, &*self.resolver);
        self.associations = compile_associations(&settings);
        let capacity = NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let cache = self.cache.get_mut();
        cache.clear();
        cache.resize(capacity);
        self.settings = settings;
    }

    /// Grammars bound to `doc`, in discovery order.
    ///
    /// A binding that cannot be loaded is logged and left out; only
    /// cancellation fails the whole resolution.
    pub fn resolve_grammars(
        &self,
        doc: &XmlDocument,
        token: &CancellationToken,
    ) -> Result<Vec<GrammarBinding>> {
        if token.is_cancelled() {
            return Err(Cancelled.into());
        }
        let mut bindings = Vec::new();
        if let Some(dtd) = DtdDocument::from_internal_subset(doc) {
            trace!(uri = doc.uri(), "internal DOCTYPE subset");
            bindings.push(GrammarBinding {
                kind: BindingKind::Doctype,
                uri: doc.uri().to_string(),
                namespace: None,
                document: Arc::new(dtd),
            });
        }

        let requests = self.requests(doc);
        debug!(uri = doc.uri(), requests = requests.len(), "resolving grammar bindings");
        let loaded: Vec<LoadResult> = requests
            .par_iter()
            .map(|request| self.load(&request.location, request.dialect, token))
            .collect();

        for (request, result) in requests.into_iter().zip(loaded) {
            match result {
                Ok(document) => bindings.push(GrammarBinding {
                    kind: request.kind,
                    uri: request.location,
                    namespace: request.namespace,
                    document,
                }),
                Err(GrammarError::Cancelled) => return Err(Cancelled.into()),
                Err(err) => warn!(
                    uri = doc.uri(),
                    grammar = %request.location,
                    kind = ?request.kind,
                    error = %err,
                    "grammar binding skipped"
                ),
            }
        }
        Ok(bindings)
    }

    /// Declaration of the element `node`, resolving the document's grammars
    /// first. Callers holding bindings for the current document version use
    /// [`ContentModelManager::declaration_in`] instead.
    pub fn find_declaration(
        &self,
        doc: &XmlDocument,
        node: NodeId,
        token: &CancellationToken,
    ) -> Result<Option<Declaration>> {
        if doc.element_path(node).is_empty() {
            return Ok(None);
        }
        let bindings = self.resolve_grammars(doc, token)?;
        Ok(Self::declaration_in(&bindings, doc, node))
    }

    /// Declaration of an attribute, looked up on its owner's declaration
    pub fn find_attribute_declaration(
        &self,
        doc: &XmlDocument,
        attribute: &XmlAttribute,
        token: &CancellationToken,
    ) -> Result<Option<AttributeDeclaration>> {
        if doc.element_path(attribute.owner).is_empty() {
            return Ok(None);
        }
        let bindings = self.resolve_grammars(doc, token)?;
        Ok(Self::attribute_declaration_in(&bindings, doc, attribute))
    }

    /// Declaration of the element `node` among already resolved `bindings`.
    ///
    /// Each grammar is walked on its own, in binding order. An XML schema
    /// only sees the trailing run of ancestors in the element's namespace and
    /// starts at its global elements; DTD and RelaxNG grammars describe the
    /// whole document and walk from the root, falling back to that same run.
    pub fn declaration_in(bindings: &[GrammarBinding], doc: &XmlDocument, node: NodeId) -> Option<Declaration> {
        let path = doc.element_path(node);
        let namespace = doc.namespace_uri(*path.last()?);
        let boundary = path
            .iter()
            .rposition(|&id| doc.namespace_uri(id) != namespace)
            .map_or(0, |i| i + 1);
        let local_path = &path[boundary..];

        bindings
            .iter()
            .filter(|binding| serves(&*binding.document, namespace))
            .find_map(|binding| {
                let cm = &*binding.document;
                let id = match cm.dialect() {
                    Dialect::Xsd => walk_path(cm, doc, local_path),
                    Dialect::Dtd | Dialect::RelaxNg => walk_path(cm, doc, &path).or_else(|| {
                        if boundary > 0 {
                            walk_path(cm, doc, local_path)
                        } else {
                            None
                        }
                    }),
                }?;
                Some(Declaration {
                    document: binding.document.clone(),
                    id,
                    kind: binding.kind,
                })
            })
    }

    /// Attribute declaration among already resolved `bindings`
    pub fn attribute_declaration_in(
        bindings: &[GrammarBinding],
        doc: &XmlDocument,
        attribute: &XmlAttribute,
    ) -> Option<AttributeDeclaration> {
        let declaration = Self::declaration_in(bindings, doc, attribute.owner)?;
        let index = declaration
            .element()
            .find_attribute(doc.attribute_name(attribute), doc.attribute_namespace(attribute))?
            .index;
        Some(AttributeDeclaration { declaration, index })
    }

    /// Grammars able to declare `element`: DTD and RelaxNG bindings, and
    /// XML schemas whose target namespace is the element's
    pub fn find_cm_documents_for(
        &self,
        doc: &XmlDocument,
        element: NodeId,
        token: &CancellationToken,
    ) -> Result<Vec<Arc<dyn CmDocument>>> {
        let namespace = doc.namespace_uri(element);
        Ok(self
            .resolve_grammars(doc, token)?
            .into_iter()
            .filter(|b| serves(&*b.document, namespace))
            .map(|b| b.document)
            .collect())
    }

    /// Evict the grammar stored at the document's URI and every grammar
    /// built from it
    pub fn evict(&self, doc: &XmlDocument) -> usize {
        self.evict_uri(doc.uri())
    }

    pub fn evict_uri(&self, uri: &str) -> usize {
        let mut cache = self.cache.lock();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(key, slot)| {
                key.as_str() == uri || matches!(slot.get(), Some(Ok(document)) if document.depends_on(uri))
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        debug!(uri, evicted = stale.len(), "evicted grammars");
        stale.len()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Whether a loaded grammar for `uri` is cached
    pub fn is_cached(&self, uri: &str) -> bool {
        matches!(self.cache.lock().peek(uri).and_then(|slot| slot.get()), Some(Ok(_)))
    }

    /// Load (or reuse) the grammar at `uri`
    fn load(&self, uri: &str, dialect: Option<Dialect>, token: &CancellationToken) -> LoadResult {
        loop {
            if token.is_cancelled() {
                return Err(GrammarError::Cancelled);
            }
            if !self.settings.use_cache {
                return self.parse_grammar(uri, dialect, token);
            }
            let slot = self.slot(uri);
            let result = slot.get_or_init(|| self.parse_grammar(uri, dialect, token)).clone();
            match result {
                Ok(document) => return Ok(document),
                Err(err) => {
                    self.forget(uri, &slot);
                    // Someone else's cancellation: load again ourselves
                    if err == GrammarError::Cancelled && !token.is_cancelled() {
                        trace!(uri, "retrying grammar load cancelled by another request");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn slot(&self, uri: &str) -> Slot {
        let mut cache = self.cache.lock();
        if let Some(slot) = cache.get(uri) {
            trace!(uri, "grammar cache hit");
            return slot.clone();
        }
        let slot: Slot = Arc::new(OnceLock::new());
        if let Some((evicted, _)) = cache.push(uri.to_string(), slot.clone()) {
            if evicted != uri {
                debug!(uri = %evicted, "grammar evicted by cache limit");
            }
        }
        slot
    }

    /// Drop a failed slot unless it was already replaced
    fn forget(&self, uri: &str, slot: &Slot) {
        let mut cache = self.cache.lock();
        if cache.peek(uri).is_some_and(|cached| Arc::ptr_eq(cached, slot)) {
            cache.pop(uri);
        }
    }

    fn parse_grammar(&self, uri: &str, dialect: Option<Dialect>, token: &CancellationToken) -> LoadResult {
        debug!(uri, "loading grammar");
        let text = self.fetch(uri)?;
        let dialect = dialect
            .or_else(|| Dialect::from_uri(uri))
            .or_else(|| Dialect::sniff(&text))
            .ok_or_else(|| GrammarError::Unsupported(uri.to_string()))?;
        let loader = |dependency: &str| {
            let location = self.catalogs.read().resolve_uri(dependency);
            self.fetch(location.as_deref().unwrap_or(dependency))
        };
        let document: Arc<dyn CmDocument> = match dialect {
            Dialect::Xsd => Arc::new(XsdDocument::load(uri, &text, &loader, token)?),
            Dialect::Dtd => Arc::new(DtdDocument::load(uri, &text, &loader, token)?),
            Dialect::RelaxNg => Arc::new(RelaxNgDocument::load(uri, &text, &loader, token)?),
        };
        Ok(document)
    }

    fn fetch(&self, uri: &str) -> std::result::Result<String, GrammarError> {
        if is_remote(uri) && !self.settings.download_enabled {
            return Err(GrammarError::DownloadDisabled(uri.to_string()));
        }
        read_resource(&*self.resolver, uri)
    }

    /// Grammar locations declared by or associated with `doc`, deduplicated
    fn requests(&self, doc: &XmlDocument) -> Vec<Request> {
        let catalogs = self.catalogs.read();
        let base = doc.uri();
        let text = doc.text();
        let locate = |location: &str| {
            catalogs
                .resolve_uri(location)
                .or_else(|| resolve_location(base, location))
        };
        let mut requests: Vec<Request> = Vec::new();
        let mut push = |request: Request| {
            if !requests.iter().any(|r| r.location == request.location) {
                requests.push(request);
            }
        };

        if let Some(doctype) = doc.doctype_data() {
            let public_id = doctype.public_id.map(|s| s.unquoted(text).as_str(text));
            let system_id = doctype.system_id.map(|s| s.unquoted(text).as_str(text));
            let location = catalogs
                .resolve_external(public_id, system_id)
                .or_else(|| system_id.and_then(|id| resolve_location(base, id)));
            if let Some(location) = location {
                push(Request {
                    kind: BindingKind::Doctype,
                    location,
                    namespace: None,
                    dialect: Some(Dialect::Dtd),
                });
            }
        }

        for model in doc.xml_model_declarations() {
            let Some(href) = model.href.map(|s| s.as_str(text)) else {
                continue;
            };
            let dialect = match (model.schematypens, model.model_type) {
                (Some(ns), _) => match Dialect::from_namespace(ns.as_str(text)) {
                    Some(dialect) => Some(dialect),
                    None => {
                        debug!(href, schematypens = ns.as_str(text), "unsupported xml-model schema type");
                        continue;
                    }
                },
                (None, Some(t)) if t.as_str(text) == "application/xml-dtd" => Some(Dialect::Dtd),
                _ => None,
            };
            if let Some(location) = locate(href) {
                push(Request {
                    kind: BindingKind::XmlModel,
                    location,
                    namespace: None,
                    dialect,
                });
            }
        }

        for hint in doc.schema_location_hints() {
            if let Some(location) = locate(&hint.location) {
                push(Request {
                    kind: BindingKind::SchemaLocation,
                    location,
                    namespace: hint.namespace,
                    dialect: Some(Dialect::Xsd),
                });
            }
        }

        if let Some(hint) = doc.no_namespace_schema_location() {
            if let Some(location) = locate(&hint.location) {
                push(Request {
                    kind: BindingKind::NoNamespaceSchemaLocation,
                    location,
                    namespace: None,
                    dialect: Some(Dialect::Xsd),
                });
            }
        }

        let path = Url::parse(base).ok().and_then(|url| url.to_file_path().ok());
        for (pattern, system_id) in &self.associations {
            let matched = path.as_deref().is_some_and(|p| pattern.matches_path(p))
                || pattern.matches(file_name(base));
            if matched {
                if let Some(location) = locate(system_id) {
                    push(Request {
                        kind: BindingKind::FileAssociation,
                        location,
                        namespace: None,
                        dialect: None,
                    });
                }
            }
        }

        let root_namespace = doc.root_element_id().and_then(|root| doc.namespace_uri(root));
        if let Some(namespace) = root_namespace {
            let hinted = doc
                .schema_location_hints()
                .iter()
                .any(|h| h.namespace.as_deref() == Some(namespace));
            if let Some(location) = catalogs.resolve_uri(namespace).filter(|_| !hinted) {
                push(Request {
                    kind: BindingKind::Catalog,
                    location,
                    namespace: Some(namespace.to_string()),
                    dialect: None,
                });
            }
        }

        requests
    }
}

fn compile_associations(settings: &ContentModelSettings) -> Vec<(glob::Pattern, String)> {
    settings
        .file_associations
        .iter()
        .filter_map(|association| match glob::Pattern::new(&association.pattern) {
            Ok(pattern) => Some((pattern, association.system_id.clone())),
            Err(err) => {
                warn!(pattern = %association.pattern, error = %err, "invalid file association pattern");
                None
            }
        })
        .collect()
}

/// Whether `cm` may declare elements in `namespace`
fn serves(cm: &dyn CmDocument, namespace: Option<&str>) -> bool {
    cm.dialect() != Dialect::Xsd || cm.target_namespace() == namespace
}

/// Declaration reached by following `path` (outermost first) through `cm`
fn walk_path(cm: &dyn CmDocument, doc: &XmlDocument, path: &[NodeId]) -> Option<DeclId> {
    let (&root, rest) = path.split_first()?;
    let mut current = cm.find_root_element(doc.node_name(root)?, doc.namespace_uri(root))?;
    for &id in rest {
        current = current.find_child(doc.node_name(id)?, doc.namespace_uri(id))?;
    }
    Some(current.id())
}
