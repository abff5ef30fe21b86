//! XML Schema content model
//!
//! Schema files are parsed with `roxmltree` and walked component by
//! component: global declarations are indexed by qualified name, then every
//! global element is adapted along with everything it reaches. Local element
//! declarations are memoized by schema node, so recursive types produce a
//! cyclic declaration graph instead of unbounded expansion.
//!
//! Loading happens in two phases: first every `include`/`import`/`redefine`
//! target is fetched (cycle-safe, by URI), then all texts are parsed and
//! adapted together.

use std::collections::HashMap;

use roxmltree::{Node, NodeId, ParsingOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    AttributeDecl, Cardinality, CmDocument, ContentKind, DeclId, DeclTable, Dialect, ElementDecl,
    MaxOccurs, Particle,
};
use crate::dom::ns;
use crate::error::GrammarError;
use crate::resource::resolve_location;

/// Nesting limit for type derivation and group references
const MAX_DEPTH: usize = 64;

/// XML Schema adapted into declarations
#[derive(Debug, Clone)]
pub struct XsdDocument {
    uri: String,
    table: DeclTable,
    target_namespace: Option<String>,
    dependencies: Vec<String>,
}

impl XsdDocument {
    /// Adapt the schema at `uri`; included and imported schemas are fetched
    /// through `loader`
    pub fn load(
        uri: &str,
        text: &str,
        loader: &dyn Fn(&str) -> Result<String, GrammarError>,
        token: &CancellationToken,
    ) -> Result<Self, GrammarError> {
        let sources = collect_sources(uri, text, loader, token)?;

        let mut schemas = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            match parse(&source.text) {
                Ok(doc) if is_xs(doc.root_element(), "schema") => schemas.push(Schema::new(doc, source)),
                Ok(_) if i == 0 => return Err(GrammarError::malformed(uri, "root element is not xs:schema")),
                Err(err) if i == 0 => return Err(GrammarError::malformed(uri, err)),
                _ => warn!(uri = %source.uri, "skipping unreadable schema"),
            }
        }

        let mut builder = XsdBuilder::new(&schemas);
        for (s, schema) in schemas.iter().enumerate() {
            for node in xs_children(schema.doc.root_element()).filter(|n| is_xs(*n, "element")) {
                if let Some(id) = builder.element_decl(s, node, true) {
                    builder.table.add_root(id);
                }
                if token.is_cancelled() {
                    return Err(GrammarError::Cancelled);
                }
            }
        }

        let dependencies = sources.iter().skip(1).map(|s| s.uri.clone()).collect();
        let mut table = builder.table;
        for namespace in schemas[0].doc.root_element().namespaces() {
            if let Some(prefix) = namespace.name() {
                table.add_prefix(prefix, namespace.uri());
            }
        }
        debug!(uri, elements = table.len(), schemas = schemas.len(), "adapted XML schema");

        Ok(XsdDocument {
            uri: uri.to_string(),
            target_namespace: schemas[0].target_namespace.clone(),
            table,
            dependencies,
        })
    }

}

impl CmDocument for XsdDocument {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn dialect(&self) -> Dialect {
        Dialect::Xsd
    }

    fn table(&self) -> &DeclTable {
        &self.table
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }
}

/// A fetched schema text
struct Source {
    uri: String,
    text: String,
    /// Target namespace inherited by an `include` without its own
    inherited_namespace: Option<String>,
}

fn parse(text: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options)
}

/// Fetch the schema and everything it includes or imports, breadth first
fn collect_sources(
    uri: &str,
    text: &str,
    loader: &dyn Fn(&str) -> Result<String, GrammarError>,
    token: &CancellationToken,
) -> Result<Vec<Source>, GrammarError> {
    let mut sources = vec![Source {
        uri: uri.to_string(),
        text: text.to_string(),
        inherited_namespace: None,
    }];
    let mut i = 0;
    while i < sources.len() {
        let references = match parse(&sources[i].text) {
            Ok(doc) => schema_references(&doc, &sources[i]),
            Err(_) => Vec::new(),
        };
        for (location, inherited_namespace) in references {
            if sources.iter().any(|s| s.uri == location) {
                continue;
            }
            if token.is_cancelled() {
                return Err(GrammarError::Cancelled);
            }
            match loader(&location) {
                Ok(text) => {
                    trace!(from = %sources[i].uri, location = %location, "loaded schema reference");
                    sources.push(Source {
                        uri: location,
                        text,
                        inherited_namespace,
                    });
                }
                Err(GrammarError::Cancelled) => return Err(GrammarError::Cancelled),
                Err(err) => warn!(from = %sources[i].uri, location = %location, error = %err, "skipping schema reference"),
            }
        }
        i += 1;
    }
    Ok(sources)
}

/// Resolved locations of `include`, `redefine`, `override` and `import`,
/// with the namespace an include inherits
fn schema_references(doc: &roxmltree::Document<'_>, source: &Source) -> Vec<(String, Option<String>)> {
    let root = doc.root_element();
    let namespace = root
        .attribute("targetNamespace")
        .map(str::to_string)
        .or_else(|| source.inherited_namespace.clone());
    xs_children(root)
        .filter_map(|node| {
            let inherited = match node.tag_name().name() {
                "include" | "redefine" | "override" => namespace.clone(),
                "import" => None,
                _ => return None,
            };
            let location = resolve_location(&source.uri, node.attribute("schemaLocation")?)?;
            Some((location, inherited))
        })
        .collect()
}

struct Schema<'input> {
    doc: roxmltree::Document<'input>,
    target_namespace: Option<String>,
    /// Included without a target namespace of its own
    chameleon: bool,
    element_qualified: bool,
    attribute_qualified: bool,
}

impl<'input> Schema<'input> {
    fn new(doc: roxmltree::Document<'input>, source: &Source) -> Self {
        let root = doc.root_element();
        let declared = root.attribute("targetNamespace").map(str::to_string);
        let chameleon = declared.is_none() && source.inherited_namespace.is_some();
        Schema {
            target_namespace: declared.or_else(|| source.inherited_namespace.clone()),
            chameleon,
            element_qualified: root.attribute("elementFormDefault") == Some("qualified"),
            attribute_qualified: root.attribute("attributeFormDefault") == Some("qualified"),
            doc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Component {
    Element,
    Attribute,
    ComplexType,
    SimpleType,
    Group,
    AttributeGroup,
}

impl Component {
    fn of(node: Node<'_, '_>) -> Option<Self> {
        Some(match node.tag_name().name() {
            "element" => Component::Element,
            "attribute" => Component::Attribute,
            "complexType" => Component::ComplexType,
            "simpleType" => Component::SimpleType,
            "group" => Component::Group,
            "attributeGroup" => Component::AttributeGroup,
            _ => return None,
        })
    }
}

type GlobalKey = (Component, Option<String>, String);

/// Content gathered from a type definition
#[derive(Default)]
struct Content {
    particles: Vec<Particle>,
    attributes: Vec<AttributeDecl>,
    enumeration: Vec<String>,
    mixed: bool,
    simple: bool,
    any: bool,
}

impl Content {
    fn kind(&self) -> ContentKind {
        let has_children = self.particles.iter().any(|p| !p.is_empty_group());
        if self.any {
            ContentKind::Any
        } else if self.simple {
            ContentKind::Text
        } else if has_children && self.mixed {
            ContentKind::Mixed
        } else if has_children {
            ContentKind::Children
        } else if self.mixed {
            ContentKind::Text
        } else {
            ContentKind::Empty
        }
    }

    fn set_attribute(&mut self, attribute: AttributeDecl) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name == attribute.name && a.namespace == attribute.namespace)
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }
}

struct XsdBuilder<'a, 'input> {
    schemas: &'a [Schema<'input>],
    globals: HashMap<GlobalKey, (usize, NodeId)>,
    elements: HashMap<(usize, NodeId), DeclId>,
    table: DeclTable,
}

impl<'a, 'input> XsdBuilder<'a, 'input> {
    fn new(schemas: &'a [Schema<'input>]) -> Self {
        let mut globals = HashMap::new();
        for (s, schema) in schemas.iter().enumerate() {
            let root = schema.doc.root_element();
            let redefined = xs_children(root)
                .filter(|n| is_xs(*n, "redefine") || is_xs(*n, "override"))
                .flat_map(xs_children);
            for node in redefined.chain(xs_children(root)) {
                let (Some(component), Some(name)) = (Component::of(node), node.attribute("name")) else {
                    continue;
                };
                globals
                    .entry((component, schema.target_namespace.clone(), name.to_string()))
                    .or_insert((s, node.id()));
            }
        }
        XsdBuilder {
            schemas,
            globals,
            elements: HashMap::new(),
            table: DeclTable::new(),
        }
    }

    /// Namespace and local name of a QName-valued attribute of `node`
    fn qname(&self, s: usize, node: Node<'a, 'input>, value: &str) -> (Option<String>, String) {
        let (prefix, local) = crate::dom::split_qname(value.trim());
        let mut namespace = node.lookup_namespace_uri(prefix).map(str::to_string);
        let schema = &self.schemas[s];
        if namespace.is_none() && prefix.is_none() && schema.chameleon {
            namespace = schema.target_namespace.clone();
        }
        (namespace, local.to_string())
    }

    fn resolve(
        &self,
        component: Component,
        s: usize,
        node: Node<'a, 'input>,
        value: &str,
    ) -> Option<(usize, Node<'a, 'input>)> {
        let (namespace, local) = self.qname(s, node, value);
        let &(gs, id) = self.globals.get(&(component, namespace, local))?;
        let schemas = self.schemas;
        Some((gs, schemas[gs].doc.get_node(id)?))
    }

    fn element_decl(&mut self, s: usize, node: Node<'a, 'input>, global: bool) -> Option<DeclId> {
        if let Some(reference) = node.attribute("ref") {
            let Some((gs, target)) = self.resolve(Component::Element, s, node, reference) else {
                trace!(reference, "unresolved element reference");
                return None;
            };
            return self.element_decl(gs, target, true);
        }
        if let Some(&id) = self.elements.get(&(s, node.id())) {
            return Some(id);
        }

        let schemas = self.schemas;
        let schema = &schemas[s];
        let name = node.attribute("name")?;
        let qualified = global
            || node
                .attribute("form")
                .map_or(schema.element_qualified, |form| form == "qualified");
        let id = self.table.push(ElementDecl {
            name: name.to_string(),
            namespace: if qualified { schema.target_namespace.clone() } else { None },
            documentation: documentation(node),
            ..Default::default()
        });
        self.elements.insert((s, node.id()), id);

        let mut content = Content::default();
        if let Some(complex) = xs_child(node, "complexType") {
            self.complex_type(s, complex, &mut content, 0);
        } else if let Some(simple) = xs_child(node, "simpleType") {
            content.simple = true;
            content.enumeration = self.enumeration(s, simple, 0);
        } else if let Some(type_name) = node.attribute("type") {
            self.named_type(s, node, type_name, &mut content, 0);
        } else if let Some(head) = node.attribute("substitutionGroup") {
            // Untyped members take the head's type
            if let Some((hs, head)) = self.resolve(Component::Element, s, node, head) {
                match head.attribute("type") {
                    Some(type_name) => self.named_type(hs, head, type_name, &mut content, 0),
                    None => content.any = true,
                }
            }
        } else {
            content.any = true;
        }

        let kind = content.kind();
        let ordered = match content.particles.as_slice() {
            [single] => single.is_ordered(),
            _ => true,
        };
        let children = Particle::Sequence(content.particles, Cardinality::ONE).fold();
        if let Some(decl) = self.table.get_mut(id) {
            decl.content = kind;
            decl.ordered = ordered;
            decl.attributes = content.attributes;
            decl.enumeration = content.enumeration;
        }
        self.table.set_children(id, children);
        Some(id)
    }

    /// Apply the type named by a `type` or `base` attribute
    fn named_type(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        type_name: &str,
        content: &mut Content,
        depth: usize,
    ) {
        let (namespace, local) = self.qname(s, node, type_name);
        if namespace.as_deref() == Some(ns::XS) {
            match local.as_str() {
                "anyType" => content.any = true,
                "boolean" => {
                    content.simple = true;
                    content.enumeration = vec!["true".to_string(), "false".to_string()];
                }
                _ => content.simple = true,
            }
            return;
        }
        if let Some((ts, complex)) = self.resolve(Component::ComplexType, s, node, type_name) {
            self.complex_type(ts, complex, content, depth + 1);
        } else if let Some((ts, simple)) = self.resolve(Component::SimpleType, s, node, type_name) {
            content.simple = true;
            content.enumeration = self.enumeration(ts, simple, depth + 1);
        } else {
            trace!(type_name, "unresolved type");
            content.any = true;
        }
    }

    /// Gather the content of a `complexType`, or of the `extension` /
    /// `restriction` of a derived one
    fn complex_type(&mut self, s: usize, node: Node<'a, 'input>, content: &mut Content, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        if node.attribute("mixed") == Some("true") {
            content.mixed = true;
        }
        for child in xs_children(node) {
            match child.tag_name().name() {
                "sequence" | "choice" | "all" | "group" => {
                    if let Some(particle) = self.particle(s, child, depth) {
                        content.particles.push(particle);
                    }
                }
                "attribute" | "attributeGroup" => self.attributes(s, child, content, depth),
                "simpleContent" => {
                    content.simple = true;
                    for derivation in xs_children(child) {
                        if let Some(base) = derivation.attribute("base") {
                            let mut base_content = Content::default();
                            self.named_type(s, derivation, base, &mut base_content, depth + 1);
                            content.attributes.extend(base_content.attributes);
                            content.enumeration = base_content.enumeration;
                        }
                        let facets = enumeration_facets(derivation);
                        if !facets.is_empty() {
                            content.enumeration = facets;
                        }
                        for attribute in xs_children(derivation) {
                            self.attributes(s, attribute, content, depth);
                        }
                    }
                }
                "complexContent" => {
                    if child.attribute("mixed") == Some("true") {
                        content.mixed = true;
                    }
                    for derivation in xs_children(child) {
                        let extension = is_xs(derivation, "extension");
                        if let Some(base) = derivation.attribute("base") {
                            if extension {
                                self.named_type(s, derivation, base, content, depth + 1);
                                content.any = false;
                            } else {
                                let mut base_content = Content::default();
                                self.named_type(s, derivation, base, &mut base_content, depth + 1);
                                content.attributes.extend(base_content.attributes);
                            }
                        }
                        self.complex_type(s, derivation, content, depth + 1);
                    }
                }
                _ => {}
            }
        }
    }

    fn particle(&mut self, s: usize, node: Node<'a, 'input>, depth: usize) -> Option<Particle> {
        if depth > MAX_DEPTH {
            return None;
        }
        let occurs = occurs(node);
        if occurs.max == MaxOccurs::Bounded(0) {
            return None;
        }
        let items = |builder: &mut Self| -> Vec<Particle> {
            xs_children(node)
                .filter_map(|child| builder.particle(s, child, depth + 1))
                .collect()
        };
        match node.tag_name().name() {
            "element" => self
                .element_decl(s, node, false)
                .map(|id| Particle::Element(id, occurs)),
            "sequence" => Some(Particle::Sequence(items(self), occurs)),
            "choice" => Some(Particle::Choice(items(self), occurs)),
            "all" => Some(Particle::All(items(self), occurs)),
            "group" => {
                let (gs, group) = match node.attribute("ref") {
                    Some(reference) => self.resolve(Component::Group, s, node, reference)?,
                    None => (s, node),
                };
                let model = xs_children(group)
                    .find(|n| matches!(n.tag_name().name(), "sequence" | "choice" | "all"))?;
                let inner = self.particle(gs, model, depth + 1)?;
                Some(Particle::Sequence(vec![inner], occurs))
            }
            _ => None,
        }
    }

    /// Apply an `attribute` or `attributeGroup` use to `content`
    fn attributes(&mut self, s: usize, node: Node<'a, 'input>, content: &mut Content, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match node.tag_name().name() {
            "attribute" => {
                let use_ = node.attribute("use");
                let declaration = match node.attribute("ref") {
                    Some(reference) => self
                        .resolve(Component::Attribute, s, node, reference)
                        .and_then(|(gs, global)| self.attribute_decl(gs, global, true, depth)),
                    None => self.attribute_decl(s, node, false, depth),
                };
                let Some(mut attribute) = declaration else {
                    return;
                };
                if use_ == Some("prohibited") {
                    content
                        .attributes
                        .retain(|a| !(a.name == attribute.name && a.namespace == attribute.namespace));
                    return;
                }
                attribute.required = use_ == Some("required");
                if let Some(value) = node.attribute("default").or_else(|| node.attribute("fixed")) {
                    attribute.default_value = Some(value.to_string());
                }
                if attribute.documentation.is_none() {
                    attribute.documentation = documentation(node);
                }
                content.set_attribute(attribute);
            }
            "attributeGroup" => {
                let (gs, group) = match node.attribute("ref") {
                    Some(reference) => match self.resolve(Component::AttributeGroup, s, node, reference) {
                        Some(found) => found,
                        None => return,
                    },
                    None => (s, node),
                };
                for child in xs_children(group) {
                    self.attributes(gs, child, content, depth + 1);
                }
            }
            _ => {}
        }
    }

    fn attribute_decl(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        global: bool,
        depth: usize,
    ) -> Option<AttributeDecl> {
        let schemas = self.schemas;
        let schema = &schemas[s];
        let qualified = global
            || node
                .attribute("form")
                .map_or(schema.attribute_qualified, |form| form == "qualified");
        let mut content = Content::default();
        if let Some(simple) = xs_child(node, "simpleType") {
            content.enumeration = self.enumeration(s, simple, depth + 1);
        } else if let Some(type_name) = node.attribute("type") {
            self.named_type(s, node, type_name, &mut content, depth + 1);
        }
        Some(AttributeDecl {
            name: node.attribute("name")?.to_string(),
            namespace: if qualified { schema.target_namespace.clone() } else { None },
            required: false,
            default_value: node
                .attribute("default")
                .or_else(|| node.attribute("fixed"))
                .map(str::to_string),
            enumeration: content.enumeration,
            documentation: documentation(node),
        })
    }

    /// Enumerated values of a `simpleType`, following restriction bases and
    /// union members
    fn enumeration(&mut self, s: usize, node: Node<'a, 'input>, depth: usize) -> Vec<String> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        let mut values = Vec::new();
        for child in xs_children(node) {
            match child.tag_name().name() {
                "restriction" => {
                    let facets = enumeration_facets(child);
                    if !facets.is_empty() {
                        values.extend(facets);
                    } else if let Some(simple) = xs_child(child, "simpleType") {
                        values.extend(self.enumeration(s, simple, depth + 1));
                    } else if let Some(base) = child.attribute("base") {
                        values.extend(self.type_enumeration(s, child, base, depth + 1));
                    }
                }
                "union" => {
                    if let Some(members) = child.attribute("memberTypes") {
                        for member in members.split_ascii_whitespace() {
                            values.extend(self.type_enumeration(s, child, member, depth + 1));
                        }
                    }
                    for simple in xs_children(child).filter(|n| is_xs(*n, "simpleType")) {
                        values.extend(self.enumeration(s, simple, depth + 1));
                    }
                }
                _ => {}
            }
        }
        values
    }

    fn type_enumeration(
        &mut self,
        s: usize,
        node: Node<'a, 'input>,
        type_name: &str,
        depth: usize,
    ) -> Vec<String> {
        let mut content = Content::default();
        self.named_type(s, node, type_name, &mut content, depth);
        content.enumeration
    }
}

fn is_xs(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(ns::XS) && node.tag_name().name() == local
}

fn xs_children<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().namespace() == Some(ns::XS))
}

fn xs_child<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    xs_children(node).find(|n| n.tag_name().name() == local)
}

fn occurs(node: Node<'_, '_>) -> Cardinality {
    let min = node
        .attribute("minOccurs")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1);
    let max = match node.attribute("maxOccurs").map(str::trim) {
        Some("unbounded") => MaxOccurs::Unbounded,
        Some(value) => MaxOccurs::Bounded(value.parse().unwrap_or(1)),
        None => MaxOccurs::Bounded(1),
    };
    Cardinality::new(min, max)
}

fn enumeration_facets(node: Node<'_, '_>) -> Vec<String> {
    xs_children(node)
        .filter(|n| n.tag_name().name() == "enumeration")
        .filter_map(|n| n.attribute("value"))
        .map(str::to_string)
        .collect()
}

/// Text of the `xs:annotation/xs:documentation` children of `node`
fn documentation(node: Node<'_, '_>) -> Option<String> {
    let parts: Vec<String> = xs_children(node)
        .filter(|n| n.tag_name().name() == "annotation")
        .flat_map(xs_children)
        .filter(|n| n.tag_name().name() == "documentation")
        .map(|doc| {
            doc.descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|text| !text.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}
