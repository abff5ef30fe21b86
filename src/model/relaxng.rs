//! RelaxNG content model (XML syntax)
//!
//! Patterns are walked from `start`: `element` patterns become declarations,
//! `attribute` patterns become attribute declarations of the nearest
//! enclosing element, and `ref`s are expanded in place (guarded against
//! element-free reference cycles). `include`d grammars are merged with their
//! overriding `define`s; `externalRef`s are expanded as patterns.

use std::collections::{HashMap, HashSet};

use roxmltree::{Node, NodeId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    AttributeDecl, Cardinality, CmDocument, ContentKind, DeclId, DeclTable, Dialect, ElementDecl,
    Particle,
};
use crate::dom::{ns, split_qname};
use crate::error::GrammarError;
use crate::resource::resolve_location;

const MAX_DEPTH: usize = 64;

/// RelaxNG grammar adapted into declarations
#[derive(Debug, Clone)]
pub struct RelaxNgDocument {
    uri: String,
    table: DeclTable,
    dependencies: Vec<String>,
}

impl RelaxNgDocument {
    /// Adapt the grammar at `uri`; included and externally referenced
    /// grammars are fetched through `loader`
    pub fn load(
        uri: &str,
        text: &str,
        loader: &dyn Fn(&str) -> Result<String, GrammarError>,
        token: &CancellationToken,
    ) -> Result<Self, GrammarError> {
        let sources = collect_sources(uri, text, loader, token)?;

        let mut docs = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            match roxmltree::Document::parse(&source.text) {
                Ok(doc) if doc.root_element().tag_name().namespace() == Some(ns::RELAXNG) => {
                    docs.push(Some(doc))
                }
                Ok(_) if i == 0 => return Err(GrammarError::malformed(uri, "root element is not a RelaxNG pattern")),
                Err(err) if i == 0 => return Err(GrammarError::malformed(uri, err)),
                _ => {
                    warn!(uri = %source.uri, "skipping unreadable grammar");
                    docs.push(None);
                }
            }
        }

        let mut builder = RngBuilder::new(&sources, &docs);
        for (s, start) in builder.starts.clone() {
            let Some(node) = builder.node(s, start) else {
                continue;
            };
            let mut collected = Collected::default();
            let items = builder.children_patterns(s, node, &mut collected, true, &mut Vec::new(), 0);
            for child in Particle::Sequence(items, Cardinality::ONE).fold() {
                builder.table.add_root(child.decl);
            }
            if token.is_cancelled() {
                return Err(GrammarError::Cancelled);
            }
        }

        let mut table = builder.table;
        if let Some(main) = &docs[0] {
            for namespace in main.root_element().namespaces() {
                if let Some(prefix) = namespace.name() {
                    table.add_prefix(prefix, namespace.uri());
                }
            }
        }
        debug!(uri, elements = table.len(), "adapted RelaxNG grammar");

        Ok(RelaxNgDocument {
            uri: uri.to_string(),
            table,
            dependencies: sources.iter().skip(1).map(|s| s.uri.clone()).collect(),
        })
    }
}

impl CmDocument for RelaxNgDocument {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn dialect(&self) -> Dialect {
        Dialect::RelaxNg
    }

    fn table(&self) -> &DeclTable {
        &self.table
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Main,
    Include,
    External,
}

struct Source {
    uri: String,
    text: String,
    kind: SourceKind,
}

fn collect_sources(
    uri: &str,
    text: &str,
    loader: &dyn Fn(&str) -> Result<String, GrammarError>,
    token: &CancellationToken,
) -> Result<Vec<Source>, GrammarError> {
    let mut sources = vec![Source {
        uri: uri.to_string(),
        text: text.to_string(),
        kind: SourceKind::Main,
    }];
    let mut i = 0;
    while i < sources.len() {
        let references = match roxmltree::Document::parse(&sources[i].text) {
            Ok(doc) => grammar_references(&doc, &sources[i].uri),
            Err(_) => Vec::new(),
        };
        for (location, kind) in references {
            if sources.iter().any(|s| s.uri == location) {
                continue;
            }
            if token.is_cancelled() {
                return Err(GrammarError::Cancelled);
            }
            match loader(&location) {
                Ok(text) => sources.push(Source { uri: location, text, kind }),
                Err(GrammarError::Cancelled) => return Err(GrammarError::Cancelled),
                Err(err) => warn!(from = %sources[i].uri, location = %location, error = %err, "skipping grammar reference"),
            }
        }
        i += 1;
    }
    Ok(sources)
}

fn grammar_references(doc: &roxmltree::Document<'_>, base: &str) -> Vec<(String, SourceKind)> {
    doc.descendants()
        .filter(|n| n.tag_name().namespace() == Some(ns::RELAXNG))
        .filter_map(|node| {
            let kind = match node.tag_name().name() {
                "include" => SourceKind::Include,
                "externalRef" => SourceKind::External,
                _ => return None,
            };
            Some((resolve_location(base, node.attribute("href")?)?, kind))
        })
        .collect()
}

/// Attributes, text and values met while walking one element's content
#[derive(Default)]
struct Collected {
    attributes: Vec<AttributeDecl>,
    text: bool,
    values: Vec<String>,
}

struct RngBuilder<'a, 'input> {
    sources: &'a [Source],
    docs: &'a [Option<roxmltree::Document<'input>>],
    defines: HashMap<String, Vec<(usize, NodeId)>>,
    starts: Vec<(usize, NodeId)>,
    elements: HashMap<(usize, NodeId), DeclId>,
    table: DeclTable,
}

impl<'a, 'input> RngBuilder<'a, 'input> {
    fn new(sources: &'a [Source], docs: &'a [Option<roxmltree::Document<'input>>]) -> Self {
        let mut builder = RngBuilder {
            sources,
            docs,
            defines: HashMap::new(),
            starts: Vec::new(),
            elements: HashMap::new(),
            table: DeclTable::new(),
        };

        // Components an include element overrides in the included grammar
        let mut overridden: HashSet<(usize, String)> = HashSet::new();
        let mut start_overridden: HashSet<usize> = HashSet::new();
        for (s, doc) in docs.iter().enumerate() {
            let Some(doc) = doc else {
                continue;
            };
            for include in doc.descendants().filter(|n| is_rng(*n, "include")) {
                let Some(target) = builder.source_index(s, include.attribute("href")) else {
                    continue;
                };
                for child in rng_children(include) {
                    match child.tag_name().name() {
                        "define" => {
                            if let Some(name) = child.attribute("name") {
                                overridden.insert((target, name.to_string()));
                            }
                        }
                        "start" => {
                            start_overridden.insert(target);
                        }
                        _ => {}
                    }
                }
            }
        }

        for (s, doc) in docs.iter().enumerate() {
            let Some(doc) = doc else {
                continue;
            };
            let root = doc.root_element();
            if !is_rng(root, "grammar") {
                if sources[s].kind == SourceKind::Main {
                    // A bare pattern is its own start
                    builder.starts.push((s, root.parent().map_or(root.id(), |p| p.id())));
                }
                continue;
            }
            let roots_allowed = sources[s].kind != SourceKind::External && !start_overridden.contains(&s);
            builder.index_grammar(s, root, roots_allowed, &overridden);
        }
        builder
    }

    fn index_grammar(
        &mut self,
        s: usize,
        container: Node<'a, 'input>,
        roots_allowed: bool,
        overridden: &HashSet<(usize, String)>,
    ) {
        for child in rng_children(container) {
            match child.tag_name().name() {
                "define" => {
                    let Some(name) = child.attribute("name") else {
                        continue;
                    };
                    if !overridden.contains(&(s, name.to_string())) {
                        self.defines.entry(name.to_string()).or_default().push((s, child.id()));
                    }
                }
                "start" if roots_allowed => self.starts.push((s, child.id())),
                // Overrides inside an include belong to the including grammar
                "div" | "include" => self.index_grammar(s, child, roots_allowed, &HashSet::new()),
                _ => {}
            }
        }
    }

    /// Source loaded for `href` as written in source `from`
    fn source_index(&self, from: usize, href: Option<&str>) -> Option<usize> {
        let location = resolve_location(&self.sources.get(from)?.uri, href?)?;
        self.sources.iter().position(|source| source.uri == location)
    }

    fn node(&self, s: usize, id: NodeId) -> Option<Node<'a, 'input>> {
        let docs = self.docs;
        docs.get(s)?.as_ref()?.get_node(id)
    }

    /// Particles of the pattern children of `node`
    fn children_patterns(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        collected: &mut Collected,
        required: bool,
        refs: &mut Vec<String>,
        depth: usize,
    ) -> Vec<Particle> {
        rng_children(node)
            .filter_map(|child| self.pattern(s, child, collected, required, refs, depth + 1))
            .collect()
    }

    fn pattern(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        collected: &mut Collected,
        required: bool,
        refs: &mut Vec<String>,
        depth: usize,
    ) -> Option<Particle> {
        if depth > MAX_DEPTH {
            return None;
        }
        let (items, occurs, group) = match node.tag_name().name() {
            "element" => {
                return self
                    .element_decl(s, node)
                    .map(|id| Particle::Element(id, Cardinality::ONE));
            }
            "attribute" => {
                if let Some(attribute) = self.attribute_decl(s, node, required, depth) {
                    if !collected.attributes.iter().any(|a| a.name == attribute.name) {
                        collected.attributes.push(attribute);
                    }
                }
                return None;
            }
            "text" | "data" | "list" => {
                collected.text = true;
                return None;
            }
            "value" => {
                collected.text = true;
                collected.values.push(node.text().unwrap_or_default().trim().to_string());
                return None;
            }
            "group" => (self.children_patterns(s, node, collected, required, refs, depth), Cardinality::ONE, Group::Sequence),
            "interleave" => (self.children_patterns(s, node, collected, required, refs, depth), Cardinality::ONE, Group::All),
            "mixed" => {
                collected.text = true;
                (self.children_patterns(s, node, collected, required, refs, depth), Cardinality::ONE, Group::All)
            }
            "choice" => {
                let branches = rng_children(node).count();
                let required = required && branches <= 1;
                (self.children_patterns(s, node, collected, required, refs, depth), Cardinality::ONE, Group::Choice)
            }
            "optional" => (self.children_patterns(s, node, collected, false, refs, depth), Cardinality::OPTIONAL, Group::Sequence),
            "zeroOrMore" => (self.children_patterns(s, node, collected, false, refs, depth), Cardinality::ZERO_OR_MORE, Group::Sequence),
            "oneOrMore" => (self.children_patterns(s, node, collected, required, refs, depth), Cardinality::ONE_OR_MORE, Group::Sequence),
            "ref" | "parentRef" => {
                let name = node.attribute("name")?;
                if refs.iter().any(|r| r == name) {
                    return None;
                }
                let definitions = self.defines.get(name).cloned().unwrap_or_default();
                if definitions.is_empty() {
                    trace!(name, "undefined RelaxNG reference");
                    return None;
                }
                let interleave = definitions.iter().any(|&(ds, id)| {
                    self.node(ds, id).and_then(|d| d.attribute("combine")) == Some("interleave")
                });
                let multiple = definitions.len() > 1;
                refs.push(name.to_string());
                let mut items = Vec::new();
                for (ds, id) in definitions {
                    let Some(define) = self.node(ds, id) else {
                        continue;
                    };
                    let required = required && (!multiple || interleave);
                    let body = self.children_patterns(ds, define, collected, required, refs, depth);
                    items.push(Particle::Sequence(body, Cardinality::ONE));
                }
                refs.pop();
                let group = match (multiple, interleave) {
                    (true, true) => Group::All,
                    (true, false) => Group::Choice,
                    _ => Group::Sequence,
                };
                (items, Cardinality::ONE, group)
            }
            "externalRef" => {
                let target = self.source_index(s, node.attribute("href"))?;
                let docs = self.docs;
                let root = docs.get(target)?.as_ref()?.root_element();
                return if is_rng(root, "grammar") {
                    let starts: Vec<Node<'a, 'input>> =
                        rng_children(root).filter(|n| is_rng(*n, "start")).collect();
                    let items = starts
                        .into_iter()
                        .flat_map(|start| self.children_patterns(target, start, collected, required, refs, depth))
                        .collect();
                    Some(Particle::Sequence(items, Cardinality::ONE))
                } else {
                    self.pattern(target, root, collected, required, refs, depth + 1)
                };
            }
            "grammar" => {
                let items = rng_children(node)
                    .filter(|n| is_rng(*n, "start"))
                    .flat_map(|start| self.children_patterns(s, start, collected, required, refs, depth))
                    .collect();
                (items, Cardinality::ONE, Group::Sequence)
            }
            _ => return None,
        };
        Some(match group {
            Group::Sequence => Particle::Sequence(items, occurs),
            Group::Choice => Particle::Choice(items, occurs),
            Group::All => Particle::All(items, occurs),
        })
    }

    fn element_decl(&mut self, s: usize, node: Node<'a, 'input>) -> Option<DeclId> {
        if let Some(&id) = self.elements.get(&(s, node.id())) {
            return Some(id);
        }
        let (name, namespace, name_class) = pattern_name(node, true)?;
        let id = self.table.push(ElementDecl {
            name,
            namespace,
            documentation: documentation(node),
            ..Default::default()
        });
        self.elements.insert((s, node.id()), id);

        let mut collected = Collected::default();
        let mut refs = Vec::new();
        let items: Vec<Particle> = rng_children(node)
            .filter(|child| Some(child.id()) != name_class)
            .filter_map(|child| self.pattern(s, child, &mut collected, true, &mut refs, 0))
            .collect();
        let ordered = match items.as_slice() {
            [single] => single.is_ordered(),
            _ => true,
        };
        let particle = Particle::Sequence(items, Cardinality::ONE);
        let has_children = !particle.is_empty_group();
        let content = match (has_children, collected.text) {
            (true, true) => ContentKind::Mixed,
            (true, false) => ContentKind::Children,
            (false, true) => ContentKind::Text,
            (false, false) => ContentKind::Empty,
        };
        if let Some(decl) = self.table.get_mut(id) {
            decl.content = content;
            decl.ordered = ordered;
            decl.attributes = collected.attributes;
            if !has_children {
                decl.enumeration = collected.values;
            }
        }
        self.table.set_children(id, particle.fold());
        Some(id)
    }

    fn attribute_decl(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        required: bool,
        depth: usize,
    ) -> Option<AttributeDecl> {
        let (name, namespace, name_class) = pattern_name(node, false)?;
        let mut collected = Collected::default();
        let mut refs = Vec::new();
        for child in rng_children(node).filter(|child| Some(child.id()) != name_class) {
            self.pattern(s, child, &mut collected, false, &mut refs, depth + 1);
        }
        Some(AttributeDecl {
            name,
            namespace,
            required,
            default_value: node
                .attribute((ns::RELAXNG_ANNOTATIONS, "defaultValue"))
                .map(str::to_string),
            enumeration: collected.values,
            documentation: documentation(node),
        })
    }
}

#[derive(Clone, Copy)]
enum Group {
    Sequence,
    Choice,
    All,
}

fn is_rng(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(ns::RELAXNG) && node.tag_name().name() == local
}

fn rng_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().namespace() == Some(ns::RELAXNG))
}

/// `ns` in scope at `node`; the empty string means no namespace
fn inherited_ns(node: Node<'_, '_>) -> Option<String> {
    node.ancestors()
        .find_map(|n| n.attribute("ns"))
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
}

/// Local name, namespace and the `<name>` child (if the name came from
/// one) of an `element` or `attribute` pattern. Attributes only inherit `ns`
/// through a `<name>` child.
fn pattern_name(node: Node<'_, '_>, inherit: bool) -> Option<(String, Option<String>, Option<NodeId>)> {
    if let Some(qname) = node.attribute("name") {
        let (prefix, local) = split_qname(qname.trim());
        let namespace = match prefix {
            Some(prefix) => node.lookup_namespace_uri(Some(prefix)).map(str::to_string),
            None if inherit => inherited_ns(node),
            None => node.attribute("ns").filter(|ns| !ns.is_empty()).map(str::to_string),
        };
        return Some((local.to_string(), namespace, None));
    }
    let class = rng_children(node).next()?;
    let name = match class.tag_name().name() {
        "name" => class,
        // First concrete name of a name-class choice
        "choice" => class.descendants().find(|n| is_rng(*n, "name"))?,
        _ => return None,
    };
    let (prefix, local) = split_qname(name.text()?.trim());
    let namespace = match prefix {
        Some(prefix) => name.lookup_namespace_uri(Some(prefix)).map(str::to_string),
        None => inherited_ns(name),
    };
    Some((local.to_string(), namespace, Some(class.id())))
}

fn documentation(node: Node<'_, '_>) -> Option<String> {
    let parts: Vec<&str> = node
        .children()
        .filter(|n| n.tag_name().namespace() == Some(ns::RELAXNG_ANNOTATIONS) && n.tag_name().name() == "documentation")
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ADDRESS_BOOK: &str = r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0"
         xmlns:a="http://relaxng.org/ns/compatibility/annotations/1.0"
         ns="urn:book">
  <start><ref name="book"/></start>
  <define name="book">
    <element name="addressBook">
      <a:documentation>All contacts</a:documentation>
      <zeroOrMore><ref name="card"/></zeroOrMore>
    </element>
  </define>
  <define name="card">
    <element name="card">
      <attribute name="id"/>
      <optional><attribute name="kind" a:defaultValue="home">
        <choice><value>home</value><value>work</value></choice>
      </attribute></optional>
      <element><name>fullName</name><text/></element>
      <choice>
        <element name="email"><text/></element>
        <element name="phone"><text/></element>
      </choice>
      <ref name="extra"/>
    </element>
  </define>
  <define name="extra" combine="interleave">
    <optional><element name="note"><empty/></element></optional>
  </define>
  <define name="extra" combine="interleave">
    <element name="tag"><choice><value>a</value><value>b</value></choice></element>
  </define>
</grammar>"#;

    fn no_loader(uri: &str) -> Result<String, GrammarError> {
        Err(GrammarError::Unresolved(uri.to_string()))
    }

    fn load(text: &str) -> Arc<dyn CmDocument> {
        Arc::new(RelaxNgDocument::load("file:///g/book.rng", text, &no_loader, &CancellationToken::new()).unwrap())
    }

    #[test]
    fn test_start_and_documentation() {
        let doc = load(ADDRESS_BOOK);
        let roots: Vec<&str> = doc.root_elements().map(|e| e.name()).collect();
        assert_eq!(roots, ["addressBook"]);
        let book = doc.find_root_element("addressBook", Some("urn:book")).unwrap();
        assert_eq!(book.documentation(), Some("All contacts"));
        assert_eq!(book.cardinality("card"), Some(Cardinality::ZERO_OR_MORE));
    }

    #[test]
    fn test_card_content() {
        let doc = load(ADDRESS_BOOK);
        let book = doc.find_root_element("addressBook", Some("urn:book")).unwrap();
        let card = book.find_element("card", Some("urn:book")).unwrap();
        let names: Vec<&str> = card.elements().map(|e| e.name()).collect();
        assert_eq!(names, ["fullName", "email", "phone", "note", "tag"]);
        assert!(!card.is_optional("fullName"));
        assert!(card.is_optional("email"));
        assert!(card.is_optional("note"));
        assert!(!card.is_optional("tag"));
        assert_eq!(card.find_element("fullName", Some("urn:book")).unwrap().namespace(), Some("urn:book"));

        let tag = card.find_element("tag", Some("urn:book")).unwrap();
        assert_eq!(tag.enumeration_values(), ["a".to_string(), "b".to_string()]);
        assert!(card.find_element("note", Some("urn:book")).unwrap().is_empty());
    }

    #[test]
    fn test_attributes_required_outside_optional() {
        let doc = load(ADDRESS_BOOK);
        let card = doc
            .find_root_element("addressBook", Some("urn:book"))
            .and_then(|b| b.find_element("card", Some("urn:book")))
            .unwrap();
        let id = card.find_attribute("id", None).unwrap();
        assert!(id.is_required());
        assert_eq!(id.namespace(), None);
        let kind = card.find_attribute("kind", None).unwrap();
        assert!(!kind.is_required());
        assert_eq!(kind.default_value(), Some("home"));
        assert_eq!(kind.enumeration_values(), ["home".to_string(), "work".to_string()]);
    }

    #[test]
    fn test_recursive_refs_terminate() {
        let doc = load(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
  <start><ref name="list"/></start>
  <define name="list"><element name="list"><zeroOrMore><ref name="item"/></zeroOrMore></element></define>
  <define name="item"><choice><ref name="list"/><element name="leaf"><empty/></element><ref name="item"/></choice></define>
</grammar>"#,
        );
        let list = doc.find_root_element("list", None).unwrap();
        assert_eq!(list.find_element("list", None), Some(list));
        assert!(list.find_element("leaf", None).is_some());
    }

    #[test]
    fn test_bare_element_pattern() {
        let doc = load(
            r#"<element name="note" xmlns="http://relaxng.org/ns/structure/1.0"><interleave><element name="to"><text/></element><element name="from"><text/></element></interleave></element>"#,
        );
        let note = doc.find_root_element("note", None).unwrap();
        assert!(!note.is_ordered());
        assert_eq!(note.elements().count(), 2);
    }

    #[test]
    fn test_include_with_override() {
        let main = r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
  <include href="base.rng">
    <define name="body"><element name="custom"><empty/></element></define>
  </include>
</grammar>"#;
        let loader = |uri: &str| -> Result<String, GrammarError> {
            assert_eq!(uri, "file:///g/base.rng");
            Ok(r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
  <start><element name="doc"><ref name="body"/></element></start>
  <define name="body"><element name="default"><empty/></element></define>
</grammar>"#
                .to_string())
        };
        let rng = RelaxNgDocument::load("file:///g/main.rng", main, &loader, &CancellationToken::new()).unwrap();
        assert!(rng.depends_on("file:///g/base.rng"));
        let rng: Arc<dyn CmDocument> = Arc::new(rng);
        let doc = rng.find_root_element("doc", None).unwrap();
        assert!(doc.find_element("custom", None).is_some());
        assert!(doc.find_element("default", None).is_none());
    }

    #[test]
    fn test_not_relaxng() {
        let result = RelaxNgDocument::load("file:///x.rng", "<doc/>", &no_loader, &CancellationToken::new());
        assert!(matches!(result, Err(GrammarError::Malformed { .. })));
    }
}
