//! DTD content model
//!
//! Declarations come from the tolerant DOM: the children of a DOCTYPE node
//! (internal subset) or of a document parsed with [`XmlDocument::parse_dtd`]
//! (external `.dtd` resource). Content specs are expanded with the parameter
//! entities in scope and folded into the shared [`DeclTable`].

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    AttributeDecl, Cardinality, ChildUse, CmDocument, ContentKind, DeclId, DeclTable, Dialect,
    ElementDecl, EntityDecl, MaxOccurs, Particle,
};
use crate::core::dtd::{
    expand_parameter_entities, parse_att_default, parse_att_type, parse_content_spec, AttDefault,
    ContentParticle, ContentSpec, Occurrence,
};
use crate::dom::{NodeData, NodeId, XmlDocument};
use crate::error::GrammarError;
use crate::resource::resolve_location;

/// DTD grammar adapted into declarations
#[derive(Debug, Clone)]
pub struct DtdDocument {
    uri: String,
    table: DeclTable,
    dependencies: Vec<String>,
}

impl DtdDocument {
    /// Adapt the internal subset of `doc`, without fetching anything
    pub fn from_internal_subset(doc: &XmlDocument) -> Option<Self> {
        let doctype = doc.doctype()?;
        doc.doctype_data()?.internal_subset?;
        let mut builder = DtdBuilder::default();
        builder.collect(doc, doctype, None).ok()?;
        Some(builder.finish(doc.uri()))
    }

    /// Adapt an external DTD resource; external parameter entities are
    /// loaded through `loader`
    pub fn load(
        uri: &str,
        text: &str,
        loader: &dyn Fn(&str) -> Result<String, GrammarError>,
        token: &CancellationToken,
    ) -> Result<Self, GrammarError> {
        let mut builder = DtdBuilder::default();
        let mut visited = vec![uri.to_string()];
        builder.collect_resource(uri, text, loader, token, &mut visited)?;
        debug!(uri, elements = builder.elements.len(), "adapted DTD");
        Ok(builder.finish(uri))
    }

    /// Adapt DTD text with no external references followed
    pub fn parse(uri: &str, text: &str) -> Self {
        let doc = XmlDocument::parse_dtd(uri, text);
        let mut builder = DtdBuilder::default();
        // no token, cannot be cancelled
        let _ = builder.collect(&doc, 0, None);
        builder.finish(uri)
    }
}

impl CmDocument for DtdDocument {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn dialect(&self) -> Dialect {
        Dialect::Dtd
    }

    fn table(&self) -> &DeclTable {
        &self.table
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// DTD names are not namespace-aware: the qualified name is the name
    fn matches(&self, decl: &ElementDecl, qname: &str, _namespace: Option<&str>) -> bool {
        decl.name == qname
    }
}

struct RawElement {
    name: String,
    content: String,
    documentation: Option<String>,
}

struct RawAttribute {
    element: String,
    name: String,
    att_type: String,
    keyword: Option<String>,
    value: Option<String>,
    documentation: Option<String>,
}

#[derive(Default)]
struct DtdBuilder {
    parameter_entities: HashMap<String, String>,
    elements: Vec<RawElement>,
    attributes: Vec<RawAttribute>,
    entities: Vec<EntityDecl>,
    externals: Vec<String>,
    dependencies: Vec<String>,
}

impl DtdBuilder {
    fn collect_resource(
        &mut self,
        uri: &str,
        text: &str,
        loader: &dyn Fn(&str) -> Result<String, GrammarError>,
        token: &CancellationToken,
        visited: &mut Vec<String>,
    ) -> Result<(), GrammarError> {
        let doc = XmlDocument::parse_dtd(uri, text);
        let first_external = self.externals.len();
        self.collect(&doc, 0, Some(token))?;

        let externals: Vec<String> = self.externals[first_external..].to_vec();
        for external in externals {
            if visited.contains(&external) {
                continue;
            }
            visited.push(external.clone());
            match loader(&external) {
                Ok(text) => {
                    self.dependencies.push(external.clone());
                    self.collect_resource(&external, &text, loader, token, visited)?;
                }
                Err(GrammarError::Cancelled) => return Err(GrammarError::Cancelled),
                Err(err) => warn!(uri, external = %external, error = %err, "skipping external parameter entity"),
            }
        }
        Ok(())
    }

    /// Record the declarations that are children of `container`
    fn collect(
        &mut self,
        doc: &XmlDocument,
        container: NodeId,
        token: Option<&CancellationToken>,
    ) -> Result<(), GrammarError> {
        for id in doc.children(container) {
            let Some(node) = doc.get_node(id) else {
                continue;
            };
            match &node.data {
                NodeData::DtdEntityDecl(decl) => {
                    let Some(name) = decl.name.map(|s| doc.text_of(s).to_string()) else {
                        continue;
                    };
                    let value = decl.value.map(|s| doc.text_of(s.unquoted(doc.text())).to_string());
                    let system_id = decl
                        .system_id
                        .map(|s| doc.text_of(s.unquoted(doc.text())).to_string());
                    if decl.parameter {
                        if let Some(value) = value {
                            self.parameter_entities.entry(name).or_insert(value);
                        } else if let Some(location) =
                            system_id.and_then(|sys| resolve_location(doc.uri(), &sys))
                        {
                            self.externals.push(location);
                        }
                    } else if !self.entities.iter().any(|e| e.name == name) {
                        self.entities.push(EntityDecl {
                            name,
                            value,
                            public_id: decl
                                .public_id
                                .map(|s| doc.text_of(s.unquoted(doc.text())).to_string()),
                            system_id,
                        });
                    }
                }
                NodeData::DtdElementDecl(decl) => {
                    let Some(name) = decl.name.map(|s| doc.text_of(s).to_string()) else {
                        continue;
                    };
                    let content = decl
                        .category
                        .or(decl.content)
                        .map_or("ANY", |s| doc.text_of(s))
                        .to_string();
                    self.elements.push(RawElement {
                        name,
                        content,
                        documentation: preceding_comment(doc, id),
                    });
                }
                NodeData::DtdAttlistDecl(decl) => {
                    let Some(element) = decl.element_name.map(|s| doc.text_of(s).to_string()) else {
                        continue;
                    };
                    let documentation = preceding_comment(doc, id);
                    for def in &decl.definitions {
                        self.attributes.push(RawAttribute {
                            element: element.clone(),
                            name: doc.text_of(def.name).to_string(),
                            att_type: def.att_type.map_or("CDATA", |s| doc.text_of(s)).to_string(),
                            keyword: def.default_kind.map(|s| doc.text_of(s).to_string()),
                            value: def.value.map(|s| doc.text_of(s.unquoted(doc.text())).to_string()),
                            documentation: documentation.clone(),
                        });
                    }
                }
                _ => continue,
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(GrammarError::Cancelled);
            }
        }
        Ok(())
    }

    fn finish(self, uri: &str) -> DtdDocument {
        let mut table = DeclTable::new();
        let mut ids: HashMap<&str, DeclId> = HashMap::new();
        let mut specs = Vec::new();

        for raw in &self.elements {
            if ids.contains_key(raw.name.as_str()) {
                trace!(name = %raw.name, "duplicate element declaration");
                continue;
            }
            let content = expand_parameter_entities(&raw.content, &self.parameter_entities);
            let spec = match content.trim() {
                "EMPTY" => ContentSpec::Empty,
                "ANY" => ContentSpec::Any,
                model => parse_content_spec(model).unwrap_or_else(|err| {
                    trace!(name = %raw.name, error = err, "unreadable content model");
                    ContentSpec::Any
                }),
            };
            let id = table.push(ElementDecl {
                name: raw.name.clone(),
                documentation: raw.documentation.clone(),
                ..Default::default()
            });
            ids.insert(raw.name.as_str(), id);
            specs.push((id, spec));
        }

        for (id, spec) in specs {
            let (content, ordered, children) = match &spec {
                ContentSpec::Empty => (ContentKind::Empty, false, Vec::new()),
                ContentSpec::Any => (ContentKind::Any, false, Vec::new()),
                ContentSpec::Mixed(names) if names.is_empty() => (ContentKind::Text, false, Vec::new()),
                ContentSpec::Mixed(names) => {
                    let children = names
                        .iter()
                        .filter_map(|n| ids.get(n.as_str()))
                        .map(|&decl| ChildUse { decl, cardinality: Cardinality::ZERO_OR_MORE })
                        .collect();
                    (ContentKind::Mixed, false, children)
                }
                ContentSpec::Children(particle) => match to_particle(particle, &ids) {
                    Some(particle) => (ContentKind::Children, particle.is_ordered(), particle.fold()),
                    None => (ContentKind::Children, true, Vec::new()),
                },
            };
            if let Some(decl) = table.get_mut(id) {
                decl.content = content;
                decl.ordered = ordered;
            }
            table.set_children(id, children);
            table.add_root(id);
        }

        for raw in &self.attributes {
            let Some(decl) = ids.get(raw.element.as_str()).and_then(|&id| table.get_mut(id)) else {
                continue;
            };
            if decl.attributes.iter().any(|a| a.name == raw.name) {
                continue;
            }
            let att_type = parse_att_type(&expand_parameter_entities(&raw.att_type, &self.parameter_entities));
            let default = parse_att_default(raw.keyword.as_deref(), raw.value.as_deref());
            decl.attributes.push(AttributeDecl {
                name: raw.name.clone(),
                namespace: None,
                required: default == AttDefault::Required,
                default_value: default.value().map(str::to_string),
                enumeration: att_type.values().to_vec(),
                documentation: raw.documentation.clone(),
            });
        }

        for entity in self.entities {
            table.add_entity(entity);
        }

        DtdDocument {
            uri: uri.to_string(),
            table,
            dependencies: self.dependencies,
        }
    }
}

fn cardinality(occurrence: Occurrence) -> Cardinality {
    Cardinality::new(
        occurrence.min(),
        occurrence.max().map_or(MaxOccurs::Unbounded, MaxOccurs::Bounded),
    )
}

/// Particle over declared names; undeclared names are dropped
fn to_particle(particle: &ContentParticle, ids: &HashMap<&str, DeclId>) -> Option<Particle> {
    match particle {
        ContentParticle::Name { name, occurrence } => ids
            .get(name.as_str())
            .map(|&id| Particle::Element(id, cardinality(*occurrence))),
        ContentParticle::Seq { items, occurrence } => Some(Particle::Sequence(
            items.iter().filter_map(|p| to_particle(p, ids)).collect(),
            cardinality(*occurrence),
        )),
        ContentParticle::Choice { items, occurrence } => Some(Particle::Choice(
            items.iter().filter_map(|p| to_particle(p, ids)).collect(),
            cardinality(*occurrence),
        )),
    }
}

/// Trimmed text of a comment directly before `id`
fn preceding_comment(doc: &XmlDocument, id: NodeId) -> Option<String> {
    let prev = doc.get_node(id)?.prev_sibling?;
    match &doc.get_node(prev)?.data {
        NodeData::Comment { content: Some(span) } => {
            let text = doc.text_of(*span).trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const BOOK_DTD: &str = r#"<!ENTITY % inline "em | b">
<!-- A book -->
<!ELEMENT book (title, chapter+, appendix?)>
<!ELEMENT title (#PCDATA)>
<!ELEMENT chapter (#PCDATA | %inline;)*>
<!ELEMENT appendix EMPTY>
<!ELEMENT em (#PCDATA)>
<!ELEMENT b ANY>
<!-- Book attributes -->
<!ATTLIST book
    id ID #REQUIRED
    lang (en | fr) "en"
    version CDATA #FIXED "1.0">
<!ENTITY copy "&#169;">
"#;

    fn book() -> Arc<dyn CmDocument> {
        Arc::new(DtdDocument::parse("file:///book.dtd", BOOK_DTD))
    }

    #[test]
    fn test_children_and_cardinality() {
        let doc = book();
        let book = doc.find_root_element("book", None).unwrap();
        assert!(book.is_ordered());
        let names: Vec<&str> = book.elements().map(|e| e.name()).collect();
        assert_eq!(names, ["title", "chapter", "appendix"]);
        assert_eq!(book.cardinality("chapter"), Some(Cardinality::ONE_OR_MORE));
        assert!(book.is_optional("appendix"));
        assert!(!book.is_optional("title"));
        assert_eq!(book.documentation(), Some("A book"));
        assert_eq!(book.find_element("title", None).unwrap().parent(), Some(book));
    }

    #[test]
    fn test_mixed_with_parameter_entity() {
        let doc = book();
        let chapter = doc.find_root_element("chapter", None).unwrap();
        assert!(chapter.is_mixed());
        assert!(chapter.has_character_content());
        let names: Vec<&str> = chapter.elements().map(|e| e.name()).collect();
        assert_eq!(names, ["em", "b"]);
        assert_eq!(chapter.cardinality("em"), Some(Cardinality::ZERO_OR_MORE));
    }

    #[test]
    fn test_content_categories() {
        let doc = book();
        assert!(doc.find_root_element("appendix", None).unwrap().is_empty());
        assert_eq!(doc.find_root_element("b", None).unwrap().content(), ContentKind::Any);
        assert_eq!(doc.find_root_element("title", None).unwrap().content(), ContentKind::Text);
    }

    #[test]
    fn test_attlist() {
        let doc = book();
        let book = doc.find_root_element("book", None).unwrap();
        let id = book.find_attribute("id", None).unwrap();
        assert!(id.is_required());
        assert_eq!(id.documentation(), Some("Book attributes"));
        let lang = book.find_attribute("lang", None).unwrap();
        assert!(!lang.is_required());
        assert_eq!(lang.default_value(), Some("en"));
        assert_eq!(lang.enumeration_values(), ["en".to_string(), "fr".to_string()]);
        assert_eq!(book.find_attribute("version", None).unwrap().default_value(), Some("1.0"));
    }

    #[test]
    fn test_entities_listed() {
        let doc = book();
        let entities = doc.table().entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "copy");
        assert_eq!(entities[0].value.as_deref(), Some("&#169;"));
    }

    #[test]
    fn test_internal_subset() {
        let xml = "<!DOCTYPE note [\n<!ELEMENT note (to, body)>\n<!ELEMENT to (#PCDATA)>\n<!ELEMENT body (#PCDATA)>\n]>\n<note/>";
        let doc = XmlDocument::parse_with_uri("file:///note.xml", xml);
        let dtd: Arc<dyn CmDocument> = Arc::new(DtdDocument::from_internal_subset(&doc).unwrap());
        assert_eq!(dtd.uri(), "file:///note.xml");
        let note = dtd.find_root_element("note", None).unwrap();
        assert_eq!(note.elements().count(), 2);

        let plain = XmlDocument::parse("<!DOCTYPE note SYSTEM \"note.dtd\"><note/>");
        assert!(DtdDocument::from_internal_subset(&plain).is_none());
    }

    #[test]
    fn test_prefixed_names_match_qualified() {
        let doc: Arc<dyn CmDocument> = Arc::new(DtdDocument::parse(
            "file:///p.dtd",
            "<!ELEMENT x:root (x:item*)><!ELEMENT x:item EMPTY>",
        ));
        let root = doc.find_root_element("x:root", Some("urn:ignored")).unwrap();
        assert!(root.find_child("x:item", None).is_some());
        assert!(doc.find_root_element("root", None).is_none());
    }

    #[test]
    fn test_external_parameter_entity_loaded() {
        let main = "<!ENTITY % mod SYSTEM \"mod.ent\">\n%mod;\n<!ELEMENT doc (part*)>";
        let loader = |uri: &str| -> Result<String, GrammarError> {
            assert_eq!(uri, "file:///dtd/mod.ent");
            Ok("<!ELEMENT part EMPTY>".to_string())
        };
        let dtd = DtdDocument::load("file:///dtd/main.dtd", main, &loader, &CancellationToken::new()).unwrap();
        assert!(dtd.depends_on("file:///dtd/mod.ent"));
        let dtd: Arc<dyn CmDocument> = Arc::new(dtd);
        let doc = dtd.find_root_element("doc", None).unwrap();
        assert!(doc.find_element("part", None).is_some());
    }

    #[test]
    fn test_cancelled_load() {
        let token = CancellationToken::new();
        token.cancel();
        let loader = |_: &str| -> Result<String, GrammarError> { Ok(String::new()) };
        let result = DtdDocument::load("file:///a.dtd", "<!ELEMENT a EMPTY>", &loader, &token);
        assert_eq!(result.unwrap_err(), GrammarError::Cancelled);
    }
}
