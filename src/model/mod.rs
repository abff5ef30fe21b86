//! Content Model - dialect-agnostic grammar declarations
//!
//! Every grammar dialect (XML Schema, DTD, RelaxNG) is adapted into the same
//! normalized [`DeclTable`]: element declarations with their child uses and
//! cardinalities, attribute declarations, enumerations and documentation.
//! Callers only ever see `Arc<dyn CmDocument>` and the borrowed handles
//! [`CmElement`] and [`CmAttribute`].
//!
//! ## Cardinality
//!
//! Child cardinalities are folded from the grammar's particle tree:
//!
//! ```text
//! (a, (b | c)*, a?)
//!   a: min 1+0 = 1, max 1+1 = 2
//!   b: min 0 (choice of two), max unbounded
//! ```

pub mod catalog;
pub mod dtd;
pub mod manager;
pub mod relaxng;
pub mod xsd;

use std::fmt;

use crate::dom::split_qname;

pub use catalog::CatalogResolver;
pub use dtd::DtdDocument;
pub use manager::{
    AttributeDeclaration, BindingKind, ContentModelManager, Declaration, GrammarBinding,
};
pub use relaxng::RelaxNgDocument;
pub use xsd::XsdDocument;

/// Index of an element declaration in its [`DeclTable`]
pub type DeclId = u32;

/// Upper occurrence bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

/// `{min, max}` occurrence bounds of a child element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cardinality {
    pub min: u32,
    pub max: MaxOccurs,
}

impl Cardinality {
    pub const ONE: Cardinality = Cardinality::new(1, MaxOccurs::Bounded(1));
    pub const OPTIONAL: Cardinality = Cardinality::new(0, MaxOccurs::Bounded(1));
    pub const ZERO_OR_MORE: Cardinality = Cardinality::new(0, MaxOccurs::Unbounded);
    pub const ONE_OR_MORE: Cardinality = Cardinality::new(1, MaxOccurs::Unbounded);

    pub const fn new(min: u32, max: MaxOccurs) -> Self {
        Cardinality { min, max }
    }

    #[inline]
    pub fn is_optional(&self) -> bool {
        self.min == 0
    }

    /// Bounds of a particle nested in a particle with bounds `outer`
    pub fn nested_in(self, outer: Cardinality) -> Cardinality {
        let max = match (self.max, outer.max) {
            (MaxOccurs::Bounded(0), _) | (_, MaxOccurs::Bounded(0)) => MaxOccurs::Bounded(0),
            (MaxOccurs::Bounded(a), MaxOccurs::Bounded(b)) => MaxOccurs::Bounded(a.saturating_mul(b)),
            _ => MaxOccurs::Unbounded,
        };
        Cardinality::new(self.min.saturating_mul(outer.min), max)
    }

    /// Bounds of two uses of the same declaration
    pub fn plus(self, other: Cardinality) -> Cardinality {
        let max = match (self.max, other.max) {
            (MaxOccurs::Bounded(a), MaxOccurs::Bounded(b)) => MaxOccurs::Bounded(a.saturating_add(b)),
            _ => MaxOccurs::Unbounded,
        };
        Cardinality::new(self.min.saturating_add(other.min), max)
    }

    /// The same bounds with the minimum dropped to zero
    pub fn optional(self) -> Cardinality {
        Cardinality::new(0, self.max)
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::ONE
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            MaxOccurs::Bounded(max) => write!(f, "[{}..{}]", self.min, max),
            MaxOccurs::Unbounded => write!(f, "[{}..*]", self.min),
        }
    }
}

/// What an element may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    Empty,
    /// Character data only
    Text,
    /// Character data interleaved with child elements
    Mixed,
    /// Child elements only
    Children,
    /// Anything
    Any,
}

/// A child declaration with its folded cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildUse {
    pub decl: DeclId,
    pub cardinality: Cardinality,
}

/// Attribute declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDecl {
    /// Local name (qualified for DTD attributes)
    pub name: String,
    pub namespace: Option<String>,
    pub required: bool,
    pub default_value: Option<String>,
    pub enumeration: Vec<String>,
    pub documentation: Option<String>,
}

/// Element declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementDecl {
    /// Local name (qualified for DTD elements)
    pub name: String,
    pub namespace: Option<String>,
    pub content: ContentKind,
    /// Children must appear in declaration order
    pub ordered: bool,
    pub children: Vec<ChildUse>,
    pub attributes: Vec<AttributeDecl>,
    /// Allowed values of text-only content
    pub enumeration: Vec<String>,
    pub documentation: Option<String>,
    /// First declaration that uses this one as a child; lookup only
    pub parent: Option<DeclId>,
}

/// General entity declared by a grammar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: String,
    pub value: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Normalized declarations of one grammar resource
#[derive(Debug, Clone, Default)]
pub struct DeclTable {
    elements: Vec<ElementDecl>,
    roots: Vec<DeclId>,
    prefixes: Vec<(String, String)>,
    entities: Vec<EntityDecl>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a declaration
    pub fn push(&mut self, decl: ElementDecl) -> DeclId {
        let id = self.elements.len() as DeclId;
        self.elements.push(decl);
        id
    }

    #[inline]
    pub fn get(&self, id: DeclId) -> Option<&ElementDecl> {
        self.elements.get(id as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: DeclId) -> Option<&mut ElementDecl> {
        self.elements.get_mut(id as usize)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Declarations allowed at document level
    pub fn roots(&self) -> &[DeclId] {
        &self.roots
    }

    pub fn add_root(&mut self, id: DeclId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    /// Attach folded child uses, recording `parent` on first use
    pub fn set_children(&mut self, parent: DeclId, children: Vec<ChildUse>) {
        for child in &children {
            if let Some(decl) = self.get_mut(child.decl) {
                if decl.parent.is_none() && child.decl != parent {
                    decl.parent = Some(parent);
                }
            }
        }
        if let Some(decl) = self.get_mut(parent) {
            decl.children = children;
        }
    }

    /// Namespace prefixes declared by the grammar resource
    pub fn add_prefix(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.push((prefix.into(), namespace.into()));
    }

    pub fn prefix_for(&self, namespace: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, ns)| ns == namespace)
            .map(|(prefix, _)| prefix.as_str())
    }

    pub fn add_entity(&mut self, entity: EntityDecl) {
        if !self.entities.iter().any(|e| e.name == entity.name) {
            self.entities.push(entity);
        }
    }

    pub fn entities(&self) -> &[EntityDecl] {
        &self.entities
    }
}

/// Particle tree built by the adapters before folding into child uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Particle {
    Element(DeclId, Cardinality),
    Sequence(Vec<Particle>, Cardinality),
    Choice(Vec<Particle>, Cardinality),
    /// Unordered group (`xs:all`, `rng:interleave`)
    All(Vec<Particle>, Cardinality),
}

impl Particle {
    /// Fold the tree into one use per declaration: sequences multiply,
    /// a choice with more than one branch zeroes the minimum, repeated
    /// declarations add up
    pub fn fold(&self) -> Vec<ChildUse> {
        let mut uses = Vec::new();
        self.fold_into(Cardinality::ONE, &mut uses);
        uses
    }

    fn fold_into(&self, outer: Cardinality, uses: &mut Vec<ChildUse>) {
        match self {
            Particle::Element(decl, occurs) => {
                let cardinality = occurs.nested_in(outer);
                match uses.iter_mut().find(|u| u.decl == *decl) {
                    Some(existing) => existing.cardinality = existing.cardinality.plus(cardinality),
                    None => uses.push(ChildUse { decl: *decl, cardinality }),
                }
            }
            Particle::Sequence(items, occurs) | Particle::All(items, occurs) => {
                let inner = occurs.nested_in(outer);
                for item in items {
                    item.fold_into(inner, uses);
                }
            }
            Particle::Choice(items, occurs) => {
                let mut inner = occurs.nested_in(outer);
                if items.len() > 1 {
                    inner = inner.optional();
                }
                for item in items {
                    item.fold_into(inner, uses);
                }
            }
        }
    }

    /// Whether the top-level group fixes child order
    pub fn is_ordered(&self) -> bool {
        matches!(self, Particle::Sequence(..) | Particle::Element(..))
    }

    pub fn is_empty_group(&self) -> bool {
        match self {
            Particle::Element(..) => false,
            Particle::Sequence(items, _) | Particle::Choice(items, _) | Particle::All(items, _) => {
                items.iter().all(Particle::is_empty_group)
            }
        }
    }
}

/// Grammar dialect of a content model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Xsd,
    Dtd,
    RelaxNg,
}

impl Dialect {
    /// Dialect implied by a resource extension
    pub fn from_uri(uri: &str) -> Option<Dialect> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "xsd" => Some(Dialect::Xsd),
            "dtd" | "ent" | "mod" => Some(Dialect::Dtd),
            "rng" => Some(Dialect::RelaxNg),
            _ => None,
        }
    }

    /// Dialect implied by a namespace URI (`xml-model` `schematypens`)
    pub fn from_namespace(namespace: &str) -> Option<Dialect> {
        match namespace {
            crate::dom::ns::XS => Some(Dialect::Xsd),
            crate::dom::ns::RELAXNG => Some(Dialect::RelaxNg),
            "http://www.w3.org/XML/1998/namespace/DTD" => Some(Dialect::Dtd),
            _ => None,
        }
    }

    /// Dialect guessed from resource content
    pub fn sniff(text: &str) -> Option<Dialect> {
        let doc = crate::dom::XmlDocument::parse(text);
        match doc.root_element_id() {
            Some(root) => Self::from_namespace(doc.namespace_uri(root)?),
            None if text.contains("<!ELEMENT") || text.contains("<!ENTITY") => Some(Dialect::Dtd),
            None => None,
        }
    }
}

/// A loaded grammar resource.
///
/// Implemented once per dialect; the manager only holds `Arc<dyn CmDocument>`.
pub trait CmDocument: Send + Sync + fmt::Debug {
    /// Absolute URI the grammar was loaded from
    fn uri(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Normalized declarations
    fn table(&self) -> &DeclTable;

    /// Further resources (includes, imports) this grammar was built from
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Namespace the grammar declares its global elements in
    fn target_namespace(&self) -> Option<&str> {
        None
    }

    /// Whether a change to `uri` invalidates this grammar
    fn depends_on(&self, uri: &str) -> bool {
        self.uri() == uri || self.dependencies().iter().any(|d| d == uri)
    }

    /// Whether `decl` is the declaration of an element named `qname` in
    /// `namespace`
    fn matches(&self, decl: &ElementDecl, qname: &str, namespace: Option<&str>) -> bool {
        decl.name == split_qname(qname).1 && decl.namespace.as_deref() == namespace
    }
}

impl dyn CmDocument + '_ {
    /// Declaration handle by id
    pub fn element(&self, id: DeclId) -> Option<CmElement<'_>> {
        self.table().get(id).map(|_| CmElement { doc: self, id })
    }

    /// Document-level declarations
    pub fn root_elements(&self) -> impl Iterator<Item = CmElement<'_>> {
        self.table().roots().iter().map(move |&id| CmElement { doc: self, id })
    }

    /// Document-level declaration of an element named `qname`
    pub fn find_root_element(&self, qname: &str, namespace: Option<&str>) -> Option<CmElement<'_>> {
        self.root_elements()
            .find(|e| self.matches(e.decl(), qname, namespace))
    }
}

/// Borrowed element declaration of any dialect
#[derive(Clone, Copy)]
pub struct CmElement<'a> {
    doc: &'a dyn CmDocument,
    id: DeclId,
}

impl<'a> CmElement<'a> {
    #[inline]
    pub fn id(&self) -> DeclId {
        self.id
    }

    /// Grammar the declaration belongs to
    #[inline]
    pub fn cm_document(&self) -> &'a dyn CmDocument {
        self.doc
    }

    #[inline]
    fn decl(&self) -> &'a ElementDecl {
        &self.doc.table().elements[self.id as usize]
    }

    pub fn name(&self) -> &'a str {
        &self.decl().name
    }

    pub fn local_name(&self) -> &'a str {
        split_qname(self.name()).1
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.decl().namespace.as_deref()
    }

    /// Prefix the grammar declares for `namespace`
    pub fn prefix(&self, namespace: &str) -> Option<&'a str> {
        self.doc.table().prefix_for(namespace)
    }

    pub fn attributes(&self) -> impl Iterator<Item = CmAttribute<'a>> + 'a {
        let this = *self;
        (0..this.decl().attributes.len()).map(move |index| CmAttribute { owner: this, index })
    }

    /// Attribute declaration by (local) name and namespace
    pub fn find_attribute(&self, name: &str, namespace: Option<&str>) -> Option<CmAttribute<'a>> {
        let local = split_qname(name).1;
        self.attributes().find(|a| {
            let decl = a.decl();
            (decl.name == name && (decl.namespace.is_none() || decl.namespace.as_deref() == namespace))
                || (decl.name == local && decl.namespace.as_deref() == namespace)
        })
    }

    /// Child element declarations in declaration order
    pub fn elements(&self) -> impl Iterator<Item = CmElement<'a>> + 'a {
        let doc = self.doc;
        self.decl()
            .children
            .iter()
            .map(move |child| CmElement { doc, id: child.decl })
    }

    /// Child declaration by local name and namespace
    pub fn find_element(&self, local: &str, namespace: Option<&str>) -> Option<CmElement<'a>> {
        self.find_child(local, namespace)
    }

    /// Child declaration for an element written as `qname`
    pub fn find_child(&self, qname: &str, namespace: Option<&str>) -> Option<CmElement<'a>> {
        self.elements()
            .find(|e| self.doc.matches(e.decl(), qname, namespace))
    }

    /// Folded cardinality of the child named `local`
    pub fn cardinality(&self, local: &str) -> Option<Cardinality> {
        let table = self.doc.table();
        self.decl()
            .children
            .iter()
            .find(|c| table.get(c.decl).is_some_and(|d| split_qname(&d.name).1 == local))
            .map(|c| c.cardinality)
    }

    /// Whether the child named `local` may be left out (unknown children are)
    pub fn is_optional(&self, local: &str) -> bool {
        self.cardinality(local).map_or(true, |c| c.is_optional())
    }

    /// Declared with empty content
    pub fn is_empty(&self) -> bool {
        self.decl().content == ContentKind::Empty
    }

    pub fn is_mixed(&self) -> bool {
        self.decl().content == ContentKind::Mixed
    }

    pub fn has_character_content(&self) -> bool {
        matches!(
            self.decl().content,
            ContentKind::Text | ContentKind::Mixed | ContentKind::Any
        )
    }

    pub fn content(&self) -> ContentKind {
        self.decl().content
    }

    pub fn is_ordered(&self) -> bool {
        self.decl().ordered
    }

    /// Allowed values of text-only content
    pub fn enumeration_values(&self) -> &'a [String] {
        &self.decl().enumeration
    }

    pub fn documentation(&self) -> Option<&'a str> {
        self.decl().documentation.as_deref()
    }

    /// Declaration that first used this one as a child
    pub fn parent(&self) -> Option<CmElement<'a>> {
        self.decl().parent.map(|id| CmElement { doc: self.doc, id })
    }

    pub fn document_uri(&self) -> &'a str {
        self.doc.uri()
    }
}

impl PartialEq for CmElement<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(self.doc, other.doc) && self.id == other.id
    }
}

impl Eq for CmElement<'_> {}

impl fmt::Debug for CmElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmElement")
            .field("name", &self.name())
            .field("namespace", &self.namespace())
            .field("uri", &self.document_uri())
            .finish()
    }
}

/// Borrowed attribute declaration of any dialect
#[derive(Clone, Copy)]
pub struct CmAttribute<'a> {
    owner: CmElement<'a>,
    index: usize,
}

impl<'a> CmAttribute<'a> {
    #[inline]
    fn decl(&self) -> &'a AttributeDecl {
        &self.owner.decl().attributes[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.decl().name
    }

    pub fn local_name(&self) -> &'a str {
        split_qname(self.name()).1
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.decl().namespace.as_deref()
    }

    /// Name written with `prefix`, if any
    pub fn name_with_prefix(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", self.local_name()),
            _ => self.name().to_string(),
        }
    }

    pub fn default_value(&self) -> Option<&'a str> {
        self.decl().default_value.as_deref()
    }

    pub fn enumeration_values(&self) -> &'a [String] {
        &self.decl().enumeration
    }

    pub fn is_required(&self) -> bool {
        self.decl().required
    }

    pub fn documentation(&self) -> Option<&'a str> {
        self.decl().documentation.as_deref()
    }

    /// Element declaration carrying the attribute
    pub fn owner(&self) -> CmElement<'a> {
        self.owner
    }
}

impl fmt::Debug for CmAttribute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmAttribute")
            .field("name", &self.name())
            .field("required", &self.is_required())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal dialect for exercising the handles
    #[derive(Debug, Default)]
    pub(crate) struct TableDocument {
        pub uri: String,
        pub table: DeclTable,
    }

    impl CmDocument for TableDocument {
        fn uri(&self) -> &str {
            &self.uri
        }

        fn dialect(&self) -> Dialect {
            Dialect::Xsd
        }

        fn table(&self) -> &DeclTable {
            &self.table
        }
    }

    fn element(name: &str) -> ElementDecl {
        ElementDecl {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fold_sequence_choice_and_repeats() {
        // (a, (b | c)*, a?)
        let particle = Particle::Sequence(
            vec![
                Particle::Element(0, Cardinality::ONE),
                Particle::Choice(
                    vec![
                        Particle::Element(1, Cardinality::ONE),
                        Particle::Element(2, Cardinality::ONE),
                    ],
                    Cardinality::ZERO_OR_MORE,
                ),
                Particle::Element(0, Cardinality::OPTIONAL),
            ],
            Cardinality::ONE,
        );
        let uses = particle.fold();
        assert_eq!(uses.len(), 3);
        assert_eq!(uses[0].cardinality, Cardinality::new(1, MaxOccurs::Bounded(2)));
        assert_eq!(uses[1].cardinality, Cardinality::ZERO_OR_MORE);
        assert!(particle.is_ordered());
    }

    #[test]
    fn test_fold_single_branch_choice_keeps_minimum() {
        let particle = Particle::Choice(
            vec![Particle::Element(0, Cardinality::ONE_OR_MORE)],
            Cardinality::new(2, MaxOccurs::Bounded(3)),
        );
        assert_eq!(
            particle.fold()[0].cardinality,
            Cardinality::new(2, MaxOccurs::Unbounded)
        );
        assert!(!particle.is_ordered());
    }

    #[test]
    fn test_cardinality_display() {
        assert_eq!(Cardinality::ONE.to_string(), "[1..1]");
        assert_eq!(Cardinality::ZERO_OR_MORE.to_string(), "[0..*]");
    }

    #[test]
    fn test_element_handles() {
        let mut table = DeclTable::new();
        let root = table.push(ElementDecl {
            content: ContentKind::Children,
            ordered: true,
            attributes: vec![AttributeDecl {
                name: "id".into(),
                required: true,
                ..Default::default()
            }],
            ..element("root")
        });
        let child = table.push(ElementDecl {
            content: ContentKind::Text,
            enumeration: vec!["x".into(), "y".into()],
            ..element("child")
        });
        table.set_children(root, vec![ChildUse { decl: child, cardinality: Cardinality::ONE }]);
        table.add_root(root);
        table.add_prefix("t", "urn:t");

        let doc: std::sync::Arc<dyn CmDocument> = std::sync::Arc::new(TableDocument {
            uri: "file:///t.xsd".into(),
            table,
        });
        let root = doc.find_root_element("root", None).unwrap();
        assert_eq!(root.elements().count(), 1);
        let child = root.find_element("child", None).unwrap();
        assert_eq!(child.parent(), Some(root));
        assert!(!root.is_optional("child"));
        assert!(root.is_optional("unknown"));
        assert!(child.has_character_content());
        assert_eq!(child.enumeration_values(), ["x".to_string(), "y".to_string()]);
        assert_eq!(root.prefix("urn:t"), Some("t"));
        assert!(root.find_attribute("id", None).unwrap().is_required());
        assert_eq!(root.document_uri(), "file:///t.xsd");
        assert!(doc.find_root_element("child", None).is_none());
    }

    #[rstest::rstest]
    #[case("file:///a/s.xsd", Some(Dialect::Xsd))]
    #[case("http://x/y.DTD?v=1", Some(Dialect::Dtd))]
    #[case("g.rng#frag", Some(Dialect::RelaxNg))]
    #[case("file:///a/s.xml", None)]
    fn test_dialect_from_uri(#[case] uri: &str, #[case] expected: Option<Dialect>) {
        assert_eq!(Dialect::from_uri(uri), expected);
    }

    #[test]
    fn test_dialect_sniff() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"/>"#;
        assert_eq!(Dialect::sniff(xsd), Some(Dialect::Xsd));
        assert_eq!(Dialect::sniff("<!ELEMENT a EMPTY>"), Some(Dialect::Dtd));
        assert_eq!(Dialect::sniff("<a/>"), None);
    }
}
