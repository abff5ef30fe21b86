//! XML Generator
//!
//! Synthesizes an XML fragment from an element declaration: the start tag
//! with its required attributes, one instance of each required child down to
//! `max_depth` levels, and the end tag. Editing markers (tab stops,
//! placeholders, choices) are kept abstract in a [`Fragment`] and rendered as
//! snippet syntax or plain text by the caller.

use std::collections::HashMap;
use std::fmt::Write as _;

use lsp_types::{MarkupContent, MarkupKind};

use crate::dom::{NamespaceResolver, NodeData, NodeId, XmlDocument};
use crate::model::{CmAttribute, CmElement};
use crate::resource::file_name;
use crate::settings::GeneratorSettings;

/// One piece of a generated fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Cursor stop `n`
    TabStop(u32),
    /// Cursor stop `n` preselecting a default value
    Placeholder(u32, String),
    /// Cursor stop `n` offering a fixed list of values
    Choice(u32, Vec<String>),
    /// Where the cursor ends up
    FinalCursor,
}

/// Generated text with abstract editing markers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    segments: Vec<Segment>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append text, merging with a preceding text segment
    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    pub fn push(&mut self, segment: Segment) {
        match segment {
            Segment::Text(text) => self.push_str(&text),
            other => self.segments.push(other),
        }
    }

    pub fn append(&mut self, other: Fragment) {
        for segment in other.segments {
            self.push(segment);
        }
    }

    /// Render with `$n`, `${n:default}`, `${n|a,b|}` and `$0` markers
    pub fn to_snippet(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => escape_snippet_text(text, &mut out),
                Segment::TabStop(n) => {
                    let _ = write!(out, "${n}");
                }
                Segment::Placeholder(n, value) => {
                    let _ = write!(out, "${{{n}:");
                    escape_snippet_text(value, &mut out);
                    out.push('}');
                }
                Segment::Choice(n, values) => {
                    let _ = write!(out, "${{{n}|");
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        escape_choice_value(value, &mut out);
                    }
                    out.push_str("|}");
                }
                Segment::FinalCursor => out.push_str("$0"),
            }
        }
        out
    }

    /// Render without markers; choices show their first value and
    /// placeholders their default
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(_, value) => out.push_str(value),
                Segment::Choice(_, values) => {
                    if let Some(first) = values.first() {
                        out.push_str(first);
                    }
                }
                Segment::TabStop(_) | Segment::FinalCursor => {}
            }
        }
        out
    }
}

impl std::fmt::Display for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_plain_text())
    }
}

fn escape_snippet_text(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(c, '$' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_choice_value(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(c, '$' | '}' | '\\' | ',' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Fragment generator for element declarations
#[derive(Debug, Clone)]
pub struct XmlGenerator<'d> {
    settings: GeneratorSettings,
    /// DOM position the fragment is generated for, used to reuse prefixes
    /// already bound in the document
    context: Option<(&'d XmlDocument, NodeId)>,
}

/// State of one generation run
struct Run<'a> {
    out: Fragment,
    snippet_index: u32,
    /// Declarations being expanded on the current path
    path: Vec<CmElement<'a>>,
}

impl Run<'_> {
    fn next_index(&mut self) -> u32 {
        self.snippet_index += 1;
        self.snippet_index
    }
}

impl<'d> XmlGenerator<'d> {
    pub fn new(settings: GeneratorSettings) -> Self {
        XmlGenerator {
            settings,
            context: None,
        }
    }

    /// Resolve attribute prefixes against the namespaces in scope at `node`
    pub fn with_context(mut self, doc: &'d XmlDocument, node: NodeId) -> Self {
        self.context = Some((doc, node));
        self
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Fragment for `element` written with `prefix`
    pub fn generate(&self, element: CmElement<'_>, prefix: Option<&str>) -> Fragment {
        let mut run = Run {
            out: Fragment::new(),
            snippet_index: 0,
            path: Vec::new(),
        };
        self.element(element, prefix, 0, &mut run);
        if self.settings.snippets {
            run.out.push(Segment::FinalCursor);
        }
        run.out
    }

    /// Fragment with the children of `element` only, skipping children
    /// whose local name is in `existing`
    pub fn generate_children(
        &self,
        element: CmElement<'_>,
        prefix: Option<&str>,
        existing: &[&str],
    ) -> Fragment {
        let mut run = Run {
            out: Fragment::new(),
            snippet_index: 0,
            path: vec![element],
        };
        for child in element.elements() {
            if existing.contains(&child.local_name()) || !self.wants_child(element, child) {
                continue;
            }
            self.element(child, prefix, 1, &mut run);
        }
        if self.settings.snippets {
            run.out.push(Segment::FinalCursor);
        }
        run.out
    }

    /// Required attributes of `element` as ` name="value"` text
    pub fn generate_attributes(&self, element: CmElement<'_>) -> Fragment {
        let mut run = Run {
            out: Fragment::new(),
            snippet_index: 0,
            path: Vec::new(),
        };
        self.attributes(element, &mut run);
        run.out
    }

    fn wants_child(&self, parent: CmElement<'_>, child: CmElement<'_>) -> bool {
        !self.settings.only_required || !parent.is_optional(child.local_name())
    }

    /// Writes `element` unless it is already being expanded; returns
    /// whether anything was written
    fn element<'a>(&self, element: CmElement<'a>, prefix: Option<&str>, level: usize, run: &mut Run<'a>) -> bool {
        if run.path.contains(&element) {
            return false;
        }
        let settings = &self.settings;
        let name = qualified(prefix, element.local_name());
        if level > 0 {
            self.newline(level, &mut run.out);
        }
        run.out.push_str(&format!("<{name}"));
        self.attributes(element, run);

        let children: Vec<CmElement<'a>> = element.elements().collect();
        if !children.is_empty() {
            run.out.push_str(">");
            let mut written = false;
            if level < settings.max_depth {
                run.path.push(element);
                for child in children {
                    if self.wants_child(element, child) && self.element(child, prefix, level + 1, run) {
                        written = true;
                    }
                }
                run.path.pop();
                if written {
                    self.newline(level, &mut run.out);
                }
            }
            if !written && settings.snippets {
                let n = run.next_index();
                run.out.push(Segment::TabStop(n));
            }
            if settings.auto_close_tags {
                run.out.push_str(&format!("</{name}>"));
            }
        } else if element.is_empty() && settings.auto_close_tags {
            run.out.push_str("/>");
        } else {
            run.out.push_str(">");
            let values = element.enumeration_values();
            if !values.is_empty() {
                if settings.snippets {
                    let n = run.next_index();
                    run.out.push(Segment::Choice(n, values.to_vec()));
                } else {
                    run.out.push_str(&values[0]);
                }
            }
            if settings.snippets {
                let n = run.next_index();
                run.out.push(Segment::TabStop(n));
            }
            if settings.auto_close_tags {
                run.out.push_str(&format!("</{name}>"));
            }
        }
        true
    }

    fn attributes(&self, element: CmElement<'_>, run: &mut Run<'_>) {
        let required: Vec<CmAttribute<'_>> = element.attributes().filter(|a| a.is_required()).collect();
        let mut prefixes: HashMap<&str, String> = HashMap::new();
        for attribute in &required {
            let Some(namespace) = attribute.namespace().filter(|ns| !ns.is_empty()) else {
                continue;
            };
            if prefixes.contains_key(namespace) {
                continue;
            }
            let prefix = match self.dom_prefix(namespace) {
                Some(prefix) => Some(prefix.to_string()),
                None => element.prefix(namespace).map(|prefix| {
                    if prefix != "xml" {
                        run.out
                            .push_str(&format!(" xmlns:{prefix}={q}{namespace}{q}", q = self.settings.quote));
                    }
                    prefix.to_string()
                }),
            };
            if let Some(prefix) = prefix {
                prefixes.insert(namespace, prefix);
            }
        }

        for attribute in required {
            let index = if self.settings.snippets { run.next_index() } else { 0 };
            let prefix = attribute.namespace().and_then(|ns| prefixes.get(ns)).map(String::as_str);
            run.out.push_str(&format!(" {}={}", attribute.name_with_prefix(prefix), self.settings.quote));
            run.out.append(generate_attribute_value(
                attribute.default_value(),
                attribute.enumeration_values(),
                self.settings.snippets,
                index,
                false,
                self.settings.quote,
            ));
            run.out.push_str(&self.settings.quote.to_string());
        }
    }

    /// Prefix bound in the DOM context for `namespace`
    fn dom_prefix(&self, namespace: &str) -> Option<&'d str> {
        let (doc, node) = self.context?;
        let element = doc
            .ancestors_or_self(node)
            .find(|&id| matches!(doc.get_node(id).map(|n| &n.data), Some(NodeData::Element(_))))?;
        NamespaceResolver::new(doc).prefix_for(element, namespace).flatten()
    }

    fn newline(&self, level: usize, out: &mut Fragment) {
        out.push_str(&self.settings.line_delimiter);
        out.push_str(&self.settings.indent.repeat(level));
    }
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

/// Attribute value for completion: a choice over the enumeration, the
/// default value as placeholder, or a bare tab stop. With `with_quote` the
/// value is wrapped as `="..."` and followed by the final cursor.
pub fn generate_attribute_value(
    default_value: Option<&str>,
    enumeration: &[String],
    snippets: bool,
    snippet_index: u32,
    with_quote: bool,
    quote: char,
) -> Fragment {
    let mut value = Fragment::new();
    if with_quote {
        value.push_str(&format!("={quote}"));
    }
    if !snippets {
        if let Some(default) = default_value {
            value.push_str(default);
        }
    } else if !enumeration.is_empty() {
        value.push(Segment::Choice(snippet_index, enumeration.to_vec()));
    } else if let Some(default) = default_value {
        value.push(Segment::Placeholder(snippet_index, default.to_string()));
    } else {
        value.push(Segment::TabStop(snippet_index));
    }
    if with_quote {
        value.push_str(&quote.to_string());
        if snippets {
            value.push(Segment::FinalCursor);
        }
    }
    value
}

/// Documentation followed by a `Source:` line naming the grammar file.
///
/// Returns `None` for blank documentation.
pub fn generate_documentation(documentation: &str, source_uri: Option<&str>, markdown: bool) -> Option<String> {
    if documentation.trim().is_empty() {
        return None;
    }
    let mut doc = documentation.to_string();
    if let Some(uri) = source_uri {
        doc.push_str("\n\n");
        if markdown {
            let _ = write!(doc, "Source: [{}]({uri})", file_name(uri));
        } else {
            let _ = write!(doc, "Source: {}", file_name(uri));
        }
    }
    Some(doc)
}

/// Hover content for an element declaration
pub fn element_documentation(element: CmElement<'_>, markdown: bool) -> Option<MarkupContent> {
    markup(element.documentation()?, element.document_uri(), markdown)
}

/// Hover content for an attribute declaration
pub fn attribute_documentation(attribute: CmAttribute<'_>, markdown: bool) -> Option<MarkupContent> {
    markup(attribute.documentation()?, attribute.owner().document_uri(), markdown)
}

fn markup(documentation: &str, uri: &str, markdown: bool) -> Option<MarkupContent> {
    let value = generate_documentation(documentation, Some(uri), markdown)?;
    Some(MarkupContent {
        kind: if markdown {
            MarkupKind::Markdown
        } else {
            MarkupKind::PlainText
        },
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::TableDocument;
    use crate::model::{
        AttributeDecl, Cardinality, ChildUse, CmDocument, ContentKind, DeclTable, ElementDecl,
    };

    fn decl(name: &str, content: ContentKind) -> ElementDecl {
        ElementDecl {
            name: name.to_string(),
            content,
            ..Default::default()
        }
    }

    fn attribute(name: &str) -> AttributeDecl {
        AttributeDecl {
            name: name.to_string(),
            required: true,
            ..Default::default()
        }
    }

    /// `person(name, email?, nick*)` with `id` (required), `kind` (enumerated)
    fn people() -> TableDocument {
        let mut table = DeclTable::new();
        let mut person = decl("person", ContentKind::Children);
        person.attributes = vec![
            attribute("id"),
            AttributeDecl {
                enumeration: vec!["friend".to_string(), "work".to_string()],
                ..attribute("kind")
            },
            AttributeDecl {
                required: false,
                ..attribute("note")
            },
        ];
        let person = table.push(person);
        let name = table.push(decl("name", ContentKind::Text));
        let email = table.push(decl("email", ContentKind::Text));
        let nick = table.push(decl("nick", ContentKind::Text));
        table.set_children(
            person,
            vec![
                ChildUse { decl: name, cardinality: Cardinality::ONE },
                ChildUse { decl: email, cardinality: Cardinality::OPTIONAL },
                ChildUse { decl: nick, cardinality: Cardinality::ZERO_OR_MORE },
            ],
        );
        table.add_root(person);
        TableDocument {
            uri: "file:///g/people.xsd".to_string(),
            table,
        }
    }

    fn root(doc: &dyn CmDocument) -> CmElement<'_> {
        doc.root_elements().next().unwrap()
    }

    #[test]
    fn test_required_children_and_attributes_snippet() {
        let doc = people();
        let fragment = XmlGenerator::new(GeneratorSettings::default()).generate(root(&doc), None);
        assert_eq!(
            fragment.to_snippet(),
            "<person id=\"$1\" kind=\"${2|friend,work|}\">\n\t<name>$3</name>\n</person>$0"
        );
    }

    #[test]
    fn test_plain_text_with_optional_children() {
        let doc = people();
        let settings = GeneratorSettings::default()
            .with_snippets(false)
            .with_only_required(false)
            .with_indent("  ");
        let text = XmlGenerator::new(settings).generate(root(&doc), Some("p")).to_plain_text();
        assert_eq!(
            text,
            "<p:person id=\"\" kind=\"\">\n  <p:name></p:name>\n  <p:email></p:email>\n  <p:nick></p:nick>\n</p:person>"
        );
    }

    #[test]
    fn test_depth_limit_and_self_closing() {
        let mut table = DeclTable::new();
        let a = table.push(decl("a", ContentKind::Children));
        let b = table.push(decl("b", ContentKind::Children));
        let c = table.push(decl("c", ContentKind::Empty));
        table.set_children(a, vec![ChildUse { decl: b, cardinality: Cardinality::ONE }]);
        table.set_children(b, vec![ChildUse { decl: c, cardinality: Cardinality::ONE }]);
        table.add_root(a);
        let doc = TableDocument { uri: "g.dtd".to_string(), table };

        let snippet = XmlGenerator::new(GeneratorSettings::default()).generate(root(&doc), None);
        assert_eq!(snippet.to_snippet(), "<a>\n\t<b>$1</b>\n</a>$0");

        let deep = XmlGenerator::new(GeneratorSettings::default().with_max_depth(3).with_snippets(false))
            .generate(root(&doc), None);
        assert_eq!(deep.to_plain_text(), "<a>\n\t<b>\n\t\t<c/>\n\t</b>\n</a>");
    }

    #[test]
    fn test_recursive_declaration_is_truncated() {
        let mut table = DeclTable::new();
        let section = table.push(decl("section", ContentKind::Children));
        table.set_children(section, vec![ChildUse { decl: section, cardinality: Cardinality::ONE }]);
        table.add_root(section);
        let doc = TableDocument { uri: "g.rng".to_string(), table };
        let text = XmlGenerator::new(GeneratorSettings::default().with_max_depth(10).with_snippets(false))
            .generate(root(&doc), None)
            .to_plain_text();
        assert_eq!(text, "<section></section>");
    }

    #[test]
    fn test_recursive_child_leaves_no_blank_line() {
        let mut table = DeclTable::new();
        let item = table.push(decl("item", ContentKind::Children));
        let name = table.push(decl("name", ContentKind::Text));
        table.set_children(
            item,
            vec![
                ChildUse { decl: item, cardinality: Cardinality::ONE },
                ChildUse { decl: name, cardinality: Cardinality::ONE },
            ],
        );
        table.add_root(item);
        let doc = TableDocument { uri: "g.rng".to_string(), table };
        let text = XmlGenerator::new(GeneratorSettings::default().with_max_depth(10).with_snippets(false))
            .generate(root(&doc), None)
            .to_plain_text();
        assert_eq!(text, "<item>\n\t<name></name>\n</item>");
        assert!(!text.lines().any(|line| line.trim().is_empty()));
    }

    #[test]
    fn test_text_enumeration_and_no_end_tag() {
        let mut table = DeclTable::new();
        let mut skill = decl("skill", ContentKind::Text);
        skill.enumeration = vec!["Java".to_string(), "XML".to_string()];
        let skill = table.push(skill);
        table.add_root(skill);
        let doc = TableDocument { uri: "g.xsd".to_string(), table };

        let fragment = XmlGenerator::new(GeneratorSettings::default()).generate(root(&doc), None);
        assert_eq!(fragment.to_snippet(), "<skill>${1|Java,XML|}$2</skill>$0");
        assert_eq!(fragment.to_plain_text(), "<skill>Java</skill>");

        let open = XmlGenerator::new(GeneratorSettings::default().with_auto_close_tags(false))
            .generate(root(&doc), None);
        assert_eq!(open.to_snippet(), "<skill>${1|Java,XML|}$2$0");
    }

    #[test]
    fn test_generate_children_skips_existing() {
        let doc = people();
        let generator = XmlGenerator::new(GeneratorSettings::default().with_snippets(false).with_only_required(false));
        let text = generator
            .generate_children(root(&doc), None, &["email"])
            .to_plain_text();
        assert_eq!(text, "\n\t<name></name>\n\t<nick></nick>");
    }

    #[test]
    fn test_namespaced_attribute_prefix_from_grammar_and_dom() {
        let mut table = DeclTable::new();
        let mut item = decl("item", ContentKind::Empty);
        item.attributes = vec![AttributeDecl {
            namespace: Some("urn:links".to_string()),
            ..attribute("href")
        }];
        let item = table.push(item);
        table.add_root(item);
        table.add_prefix("xl", "urn:links");
        let doc = TableDocument { uri: "g.xsd".to_string(), table };
        let settings = GeneratorSettings::default().with_snippets(false);

        let text = XmlGenerator::new(settings.clone()).generate(root(&doc), None).to_plain_text();
        assert_eq!(text, "<item xmlns:xl=\"urn:links\" xl:href=\"\"/>");

        let xml = XmlDocument::parse(r#"<list xmlns:l="urn:links"><x/></list>"#);
        let x = xml.descendants(0).find(|&id| xml.node_name(id) == Some("x")).unwrap();
        let text = XmlGenerator::new(settings)
            .with_context(&xml, x)
            .generate(root(&doc), None)
            .to_plain_text();
        assert_eq!(text, "<item l:href=\"\"/>");
    }

    #[test]
    fn test_attribute_value_forms() {
        let values = vec!["a".to_string(), "b|c".to_string()];
        assert_eq!(
            generate_attribute_value(None, &values, true, 1, true, '"').to_snippet(),
            "=\"${1|a,b\\|c|}\"$0"
        );
        assert_eq!(
            generate_attribute_value(Some("x}"), &[], true, 2, false, '\'').to_snippet(),
            "${2:x\\}}"
        );
        assert_eq!(
            generate_attribute_value(Some("1.0"), &[], false, 0, true, '\'').to_plain_text(),
            "='1.0'"
        );
    }

    #[test]
    fn test_documentation() {
        assert_eq!(generate_documentation("  ", Some("file:///a.xsd"), true), None);
        assert_eq!(
            generate_documentation("A person", Some("file:///g/people.xsd"), true).as_deref(),
            Some("A person\n\nSource: [people.xsd](file:///g/people.xsd)")
        );
        assert_eq!(
            generate_documentation("A person", Some("file:///g/people.xsd"), false).as_deref(),
            Some("A person\n\nSource: people.xsd")
        );

        let mut doc = people();
        doc.table.get_mut(0).unwrap().documentation = Some("A person".to_string());
        let markup = element_documentation(root(&doc), true).unwrap();
        assert_eq!(markup.kind, MarkupKind::Markdown);
        assert!(markup.value.ends_with("(file:///g/people.xsd)"));
        assert!(attribute_documentation(root(&doc).attributes().next().unwrap(), false).is_none());
    }
}
