//! DTD Declaration Grammar
//!
//! The tokenizer captures `<!ELEMENT>` content models and `<!ATTLIST>`
//! types and defaults as raw spans; this module turns them into structured
//! content specs, attribute types and defaults. Parsing is tolerant: an
//! unterminated group is closed at the end of its text.

use std::borrow::Cow;
use std::collections::HashMap;

/// Occurrence indicator of a content particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Occurrence {
    #[default]
    Once,
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

impl Occurrence {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'?' => Some(Occurrence::Optional),
            b'*' => Some(Occurrence::ZeroOrMore),
            b'+' => Some(Occurrence::OneOrMore),
            _ => None,
        }
    }

    /// Minimum number of occurrences
    pub fn min(self) -> u32 {
        match self {
            Occurrence::Once | Occurrence::OneOrMore => 1,
            Occurrence::Optional | Occurrence::ZeroOrMore => 0,
        }
    }

    /// Maximum number of occurrences, `None` for unbounded
    pub fn max(self) -> Option<u32> {
        match self {
            Occurrence::Once | Occurrence::Optional => Some(1),
            Occurrence::ZeroOrMore | Occurrence::OneOrMore => None,
        }
    }
}

/// Children content model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentParticle {
    Name { name: String, occurrence: Occurrence },
    /// `(a, b, c)`
    Seq { items: Vec<ContentParticle>, occurrence: Occurrence },
    /// `(a | b | c)`
    Choice { items: Vec<ContentParticle>, occurrence: Occurrence },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSpec {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`: allowed element names
    Mixed(Vec<String>),
    Children(ContentParticle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

impl AttType {
    /// Enumerated values, if any
    pub fn values(&self) -> &[String] {
        match self {
            AttType::Notation(values) | AttType::Enumeration(values) => values,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttDefault {
    Required,
    Implied,
    Fixed(String),
    Default(String),
}

impl AttDefault {
    /// Declared default or fixed value
    pub fn value(&self) -> Option<&str> {
        match self {
            AttDefault::Fixed(v) | AttDefault::Default(v) => Some(v),
            _ => None,
        }
    }
}

/// Parse content spec from DTD ELEMENT declaration
pub fn parse_content_spec(content: &str) -> Result<ContentSpec, &'static str> {
    let content = content.trim_start();

    if content.starts_with("EMPTY") {
        Ok(ContentSpec::Empty)
    } else if content.starts_with("ANY") {
        Ok(ContentSpec::Any)
    } else if let Some(inner) = content.strip_prefix('(') {
        if inner.trim_start().starts_with("#PCDATA") {
            Ok(ContentSpec::Mixed(parse_mixed_names(inner)))
        } else {
            let mut parser = GroupParser { input: content.as_bytes(), pos: 0 };
            Ok(ContentSpec::Children(parser.group()?))
        }
    } else {
        Err("Invalid content specification")
    }
}

/// Extract element names from mixed content: (#PCDATA|a|b)*
fn parse_mixed_names(content: &str) -> Vec<String> {
    let body = content.split(')').next().unwrap_or("");
    body.split('|')
        .skip(1)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

struct GroupParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl GroupParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn occurrence(&mut self) -> Occurrence {
        match self.input.get(self.pos).copied().and_then(Occurrence::from_byte) {
            Some(occurrence) => {
                self.pos += 1;
                occurrence
            }
            None => Occurrence::Once,
        }
    }

    /// `'(' cp ((',' | '|') cp)* ')' occurrence?`, positioned on `(`
    fn group(&mut self) -> Result<ContentParticle, &'static str> {
        self.pos += 1;
        let mut items = Vec::new();
        let mut choice = false;
        loop {
            self.skip_ws();
            match self.input.get(self.pos) {
                None => break,
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(b'(') => items.push(self.group()?),
                Some(_) => items.push(self.name()?),
            }
            self.skip_ws();
            match self.input.get(self.pos) {
                Some(b',') => self.pos += 1,
                Some(b'|') => {
                    choice = true;
                    self.pos += 1;
                }
                Some(b')') | None => {}
                Some(_) => return Err("Expected ',' '|' or ')' in content model"),
            }
        }
        let occurrence = self.occurrence();
        Ok(if choice {
            ContentParticle::Choice { items, occurrence }
        } else {
            ContentParticle::Seq { items, occurrence }
        })
    }

    fn name(&mut self) -> Result<ContentParticle, &'static str> {
        let start = self.pos;
        while self.pos < self.input.len() && is_name_char(self.input[self.pos]) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err("Expected a name in content model");
        }
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        let occurrence = self.occurrence();
        Ok(ContentParticle::Name { name, occurrence })
    }
}

/// Parse the attribute type of an ATTLIST definition
pub fn parse_att_type(text: &str) -> AttType {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("NOTATION") {
        return AttType::Notation(group_values(rest));
    }
    match text {
        "CDATA" => AttType::CData,
        "ID" => AttType::Id,
        "IDREF" => AttType::IdRef,
        "IDREFS" => AttType::IdRefs,
        "ENTITY" => AttType::Entity,
        "ENTITIES" => AttType::Entities,
        "NMTOKEN" => AttType::NmToken,
        "NMTOKENS" => AttType::NmTokens,
        _ if text.starts_with('(') => AttType::Enumeration(group_values(text)),
        _ => AttType::CData,
    }
}

/// Values of an enumeration group `(a | b | c)`
fn group_values(text: &str) -> Vec<String> {
    let text = text.trim();
    let inner = text.strip_prefix('(').unwrap_or(text);
    let inner = inner.split(')').next().unwrap_or("");
    inner
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the default declaration of an ATTLIST definition from its keyword
/// (`#REQUIRED`, `#IMPLIED`, `#FIXED`) and unquoted value
pub fn parse_att_default(keyword: Option<&str>, value: Option<&str>) -> AttDefault {
    match (keyword, value) {
        (Some("#REQUIRED"), _) => AttDefault::Required,
        (Some("#FIXED"), value) => AttDefault::Fixed(value.unwrap_or_default().to_string()),
        (None, Some(value)) => AttDefault::Default(value.to_string()),
        _ => AttDefault::Implied,
    }
}

const MAX_EXPANSION_DEPTH: usize = 8;

/// Replace `%name;` references with parameter entity values.
///
/// Unknown references are left as written; expansion stops at a fixed depth
/// so self-referencing entities terminate.
pub fn expand_parameter_entities<'a>(
    text: &'a str,
    entities: &HashMap<String, String>,
) -> Cow<'a, str> {
    expand_depth(text, entities, 0)
}

fn expand_depth<'a>(
    text: &'a str,
    entities: &HashMap<String, String>,
    depth: usize,
) -> Cow<'a, str> {
    if depth >= MAX_EXPANSION_DEPTH || memchr::memchr(b'%', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut changed = false;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        let after = &rest[i + 1..];
        let name_len = after.bytes().take_while(|b| is_name_char(*b)).count();
        let value = (after.as_bytes().get(name_len) == Some(&b';'))
            .then(|| entities.get(&after[..name_len]))
            .flatten();
        match value {
            Some(value) => {
                out.push_str(&expand_depth(value, entities, depth + 1));
                rest = &after[name_len + 1..];
                changed = true;
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

#[inline]
fn is_name_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b':') || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(name: &str, occurrence: Occurrence) -> ContentParticle {
        ContentParticle::Name {
            name: name.to_string(),
            occurrence,
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(parse_content_spec(" EMPTY"), Ok(ContentSpec::Empty));
        assert_eq!(parse_content_spec("ANY"), Ok(ContentSpec::Any));
        assert!(parse_content_spec("nonsense").is_err());
    }

    #[test]
    fn test_mixed_content() {
        assert_eq!(
            parse_content_spec("(#PCDATA | em | strong)*"),
            Ok(ContentSpec::Mixed(vec!["em".into(), "strong".into()]))
        );
        assert_eq!(parse_content_spec("( #PCDATA )"), Ok(ContentSpec::Mixed(vec![])));
    }

    #[test]
    fn test_children_content() {
        let spec = parse_content_spec("(head, (p | list)*, foot?)+").unwrap();
        let expected = ContentParticle::Seq {
            items: vec![
                name("head", Occurrence::Once),
                ContentParticle::Choice {
                    items: vec![name("p", Occurrence::Once), name("list", Occurrence::Once)],
                    occurrence: Occurrence::ZeroOrMore,
                },
                name("foot", Occurrence::Optional),
            ],
            occurrence: Occurrence::OneOrMore,
        };
        assert_eq!(spec, ContentSpec::Children(expected));
    }

    #[test]
    fn test_unterminated_group_is_closed() {
        let spec = parse_content_spec("(a, b").unwrap();
        assert_eq!(
            spec,
            ContentSpec::Children(ContentParticle::Seq {
                items: vec![name("a", Occurrence::Once), name("b", Occurrence::Once)],
                occurrence: Occurrence::Once,
            })
        );
        assert!(parse_content_spec("(a b)").is_err());
    }

    #[test]
    fn test_att_types() {
        assert_eq!(parse_att_type("CDATA"), AttType::CData);
        assert_eq!(parse_att_type("IDREFS"), AttType::IdRefs);
        assert_eq!(
            parse_att_type("( yes | no )"),
            AttType::Enumeration(vec!["yes".into(), "no".into()])
        );
        let notation = parse_att_type("NOTATION (gif|png)");
        assert_eq!(notation.values(), ["gif".to_string(), "png".to_string()]);
    }

    #[test]
    fn test_att_defaults() {
        assert_eq!(parse_att_default(Some("#REQUIRED"), None), AttDefault::Required);
        assert_eq!(parse_att_default(Some("#IMPLIED"), None), AttDefault::Implied);
        assert_eq!(
            parse_att_default(Some("#FIXED"), Some("1.0")).value(),
            Some("1.0")
        );
        assert_eq!(
            parse_att_default(None, Some("a")),
            AttDefault::Default("a".into())
        );
    }

    #[test]
    fn test_expand_parameter_entities() {
        let mut entities = HashMap::new();
        entities.insert("inline".to_string(), "em | %more;".to_string());
        entities.insert("more".to_string(), "strong".to_string());
        entities.insert("loop".to_string(), "%loop;".to_string());

        let expanded = expand_parameter_entities("(#PCDATA | %inline;)*", &entities);
        assert_eq!(expanded, "(#PCDATA | em | strong)*");
        assert!(matches!(
            expand_parameter_entities("(a | b)", &entities),
            Cow::Borrowed(_)
        ));
        assert_eq!(expand_parameter_entities("%unknown; 50%", &entities), "%unknown; 50%");
        assert_eq!(expand_parameter_entities("%loop;", &entities), "%loop;");
    }
}
