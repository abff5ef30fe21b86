//! XML Tokenizer - Tolerant state machine for editor token extraction
//!
//! Unlike a conformance parser, this tokenizer never fails. Every call to
//! [`Tokenizer::scan`] yields a token, malformed input produces `Unknown`
//! (or a token carrying an error message), and end of input always yields `Eos`.
//!
//! Token kinds cover:
//! - Start/end tags and their attributes
//! - Text content, comments, CDATA sections
//! - Processing instructions and the XML prolog
//! - DOCTYPE declarations with a nested sub-grammar for the internal subset
//!   (`<!ELEMENT>`, `<!ATTLIST>`, `<!ENTITY>`)

use super::scanner::Scanner;
use tracing::trace;

/// Current scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScannerState {
    WithinContent,
    AfterOpeningStartTag,
    WithinTag,
    AfterAttributeName,
    BeforeAttributeValue,
    AfterOpeningEndTag,
    WithinEndTag,
    WithinComment,
    WithinCData,
    PrologOrPi,
    WithinPi,
    WithinDoctype,
    AfterDoctypeName,
    AfterDoctypePublic,
    AfterDoctypeSystem,
    AfterDoctypePublicId,
    WithinInternalDtd,
    WithinElementDtd,
    AfterElementDtdName,
    AfterElementDtdContent,
    WithinAttlistDtd,
    AfterAttlistElementName,
    AfterAttlistAttributeName,
    AfterAttlistAttributeType,
    AfterAttlistFixed,
    WithinDtdEntity,
    AfterDtdEntityName,
    AfterDtdEntityPublic,
    AfterDtdEntitySystem,
    AfterDtdEntityDecl,
    /// Recovery state for an `<!ELEMENT>`, `<!ATTLIST>` or `<!ENTITY>` that
    /// does not follow the expected shape
    IncorrectDtdTagFormat,
}

/// Type of XML token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `<`
    StartTagOpen,
    /// Element name after `<`
    StartTag,
    /// `>` ending a start tag
    StartTagClose,
    /// `/>`
    StartTagSelfClose,
    /// `</`
    EndTagOpen,
    /// Element name after `</`
    EndTag,
    /// `>` ending an end tag
    EndTagClose,
    AttributeName,
    /// `=` between attribute name and value
    DelimiterAssign,
    /// Attribute value, quotes included
    AttributeValue,
    Content,
    Whitespace,
    /// `<!--`
    StartCommentTag,
    Comment,
    /// `-->`
    EndCommentTag,
    /// `<![CDATA[`
    CDataTagOpen,
    CDataContent,
    /// `]]>`
    CDataTagClose,
    /// `<?`
    StartPrologOrPi,
    /// `xml` target of the prolog
    PrologName,
    /// Target of any other processing instruction
    PiName,
    PiContent,
    /// `?>` ending a processing instruction
    PiEnd,
    /// `?>` ending the prolog
    PrologEnd,
    /// `<!DOCTYPE`
    StartDoctypeTag,
    DoctypeName,
    DoctypeKindPublic,
    DoctypeKindSystem,
    /// Quoted public identifier
    DoctypePublicId,
    /// Quoted system identifier
    DoctypeSystemId,
    /// `[` opening the internal subset
    InternalDtdStart,
    /// `]` closing the internal subset
    EndInternalDtd,
    /// `<!ELEMENT`
    StartElementDtd,
    ElementDtdName,
    /// `EMPTY` or `ANY`
    ElementDtdCategory,
    /// Parenthesised content model, occurrence indicator included
    ElementDtdContent,
    /// `<!ATTLIST`
    StartAttlistDtd,
    AttlistDtdElementName,
    AttlistDtdAttributeName,
    /// `CDATA`, `ID`, `NOTATION`, an enumeration group, ...
    AttlistDtdType,
    /// `#REQUIRED`, `#IMPLIED` or `#FIXED`
    AttlistDtdDefault,
    /// Quoted default value
    AttlistDtdValue,
    /// `<!ENTITY`
    StartEntityDtd,
    /// `%` marking a parameter entity
    DtdEntityPercent,
    DtdEntityName,
    /// Quoted literal value
    DtdEntityValue,
    DtdEntityKindPublic,
    DtdEntityKindSystem,
    DtdEntityPublicId,
    DtdEntitySystemId,
    /// `NDATA name`
    DtdEntityNData,
    /// `>` closing a DTD declaration
    EndDtdTag,
    /// Any other `<!...>` or `<...>` in a DTD
    DtdUndefinedTag,
    /// Content a DTD declaration does not expect
    DtdTagExcessContent,
    /// `>` closing the DOCTYPE
    EndDoctypeTag,
    Unknown,
    /// End of stream
    Eos,
}

/// A scanned token: kind plus byte span into the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Set when the token itself is a recovery from malformed input
    pub error: Option<&'static str>,
}

impl Token {
    /// Get the token text from the scanned input
    #[inline]
    pub fn text<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end).unwrap_or("")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

const UNEXPECTED_WHITESPACE: &str = "Tag name must directly follow the open bracket.";
const UNEXPECTED_DOCTYPE_CONTENT: &str = "Unexpected content in DOCTYPE declaration.";

/// Tolerant XML tokenizer
pub struct Tokenizer<'a> {
    stream: Scanner<'a>,
    state: ScannerState,
    has_space_after_tag: bool,
    doctype_named: bool,
    element_dtd_named: bool,
    /// Either inside `[ ]` of a DOCTYPE or scanning a standalone DTD file
    in_internal_dtd: bool,
    dtd_file: bool,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer at the start of a document
    pub fn new(input: &'a str) -> Self {
        Self::with_state(input, 0, ScannerState::WithinContent)
    }

    /// Create a tokenizer that resumes at `offset` in `state`
    pub fn with_state(input: &'a str, offset: usize, state: ScannerState) -> Self {
        Tokenizer {
            stream: Scanner::with_offset(input, offset),
            state,
            has_space_after_tag: false,
            doctype_named: false,
            element_dtd_named: false,
            in_internal_dtd: state == ScannerState::WithinInternalDtd,
            dtd_file: false,
            finished: false,
        }
    }

    /// Create a tokenizer for a standalone DTD resource
    ///
    /// The whole input is scanned as an internal subset that has no closing `]`.
    pub fn for_dtd_file(input: &'a str) -> Self {
        let mut tokenizer = Self::with_state(input, 0, ScannerState::WithinInternalDtd);
        tokenizer.dtd_file = true;
        tokenizer
    }

    /// Get the current scanner state
    #[inline]
    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Get the current position
    #[inline]
    pub fn position(&self) -> usize {
        self.stream.position()
    }

    /// Scan the next token.
    ///
    /// Always makes progress: a step that does not advance is turned into a
    /// one-character `Unknown` token.
    pub fn scan(&mut self) -> Token {
        let offset = self.stream.position();
        let old_state = self.state;
        let token = self.internal_scan();
        if token.kind != TokenKind::Eos && offset == self.stream.position() {
            trace!(offset, ?old_state, state = ?self.state, "scanner has not advanced");
            self.stream.advance_char();
            return self.finish(offset, TokenKind::Unknown);
        }
        token
    }

    #[inline]
    fn finish(&self, offset: usize, kind: TokenKind) -> Token {
        Token {
            kind,
            start: offset,
            end: self.stream.position(),
            error: None,
        }
    }

    #[inline]
    fn finish_with_error(&self, offset: usize, kind: TokenKind, error: &'static str) -> Token {
        Token {
            error: Some(error),
            ..self.finish(offset, kind)
        }
    }

    /// State to return to after a comment or processing instruction
    #[inline]
    fn content_state(&self) -> ScannerState {
        if self.in_internal_dtd {
            ScannerState::WithinInternalDtd
        } else {
            ScannerState::WithinContent
        }
    }

    /// Bytes that end a malformed DTD declaration
    #[inline]
    fn dtd_stops(&self) -> &'static [u8] {
        if self.dtd_file {
            b"<>"
        } else {
            b"<>]"
        }
    }

    /// Close a DTD declaration on `>`
    fn end_dtd_tag(&mut self, offset: usize) -> Option<Token> {
        if self.stream.advance_if_byte(b'>') {
            self.state = ScannerState::WithinInternalDtd;
            return Some(self.finish(offset, TokenKind::EndDtdTag));
        }
        None
    }

    fn internal_scan(&mut self) -> Token {
        use ScannerState as S;
        use TokenKind as T;

        loop {
            let offset = self.stream.position();
            if self.stream.is_eof() {
                return self.finish(offset, T::Eos);
            }

            match self.state {
                S::WithinComment => {
                    if self.stream.advance_if_bytes(b"-->") {
                        self.state = self.content_state();
                        return self.finish(offset, T::EndCommentTag);
                    }
                    self.stream.advance_until_bytes(b"-->");
                    return self.finish(offset, T::Comment);
                }

                S::WithinContent => {
                    if self.stream.advance_if_byte(b'<') {
                        if self.stream.peek() == Some(b'!') {
                            if self.stream.advance_if_bytes(b"!--") {
                                self.state = S::WithinComment;
                                return self.finish(offset, T::StartCommentTag);
                            }
                            if self.stream.advance_if_bytes(b"![CDATA[") {
                                self.state = S::WithinCData;
                                return self.finish(offset, T::CDataTagOpen);
                            }
                            if self.stream.advance_if_bytes(b"!DOCTYPE") {
                                self.state = S::WithinDoctype;
                                self.doctype_named = false;
                                return self.finish(offset, T::StartDoctypeTag);
                            }
                        } else if self.stream.advance_if_byte(b'?') {
                            self.state = S::PrologOrPi;
                            return self.finish(offset, T::StartPrologOrPi);
                        }
                        if self.stream.advance_if_byte(b'/') {
                            self.state = S::AfterOpeningEndTag;
                            return self.finish(offset, T::EndTagOpen);
                        }
                        self.state = S::AfterOpeningStartTag;
                        return self.finish(offset, T::StartTagOpen);
                    }
                    self.stream.advance_until_byte(b'<');
                    return self.finish(offset, T::Content);
                }

                S::WithinCData => {
                    if self.stream.advance_if_bytes(b"]]>") {
                        self.state = S::WithinContent;
                        return self.finish(offset, T::CDataTagClose);
                    }
                    self.stream.advance_until_bytes(b"]]>");
                    return self.finish(offset, T::CDataContent);
                }

                S::PrologOrPi => {
                    if self.stream.advance_if_bytes(b"?>") {
                        self.state = self.content_state();
                        return self.finish(offset, T::PiEnd);
                    }
                    if let Some(name) = self.stream.read_name() {
                        if name == "xml" {
                            self.has_space_after_tag = false;
                            self.state = S::WithinTag;
                            return self.finish(offset, T::PrologName);
                        }
                        self.state = S::WithinPi;
                        return self.finish(offset, T::PiName);
                    }
                    self.stream.advance_until_bytes_or_new_tag(b"?>");
                    if self.stream.peek() == Some(b'<') {
                        self.state = self.content_state();
                    }
                    if self.stream.position() > offset {
                        return self.finish(offset, T::Unknown);
                    }
                }

                S::WithinPi => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_bytes(b"?>") {
                        self.state = self.content_state();
                        return self.finish(offset, T::PiEnd);
                    }
                    self.stream.advance_until_bytes_or_new_tag(b"?>");
                    if self.stream.peek() == Some(b'<') {
                        self.state = self.content_state();
                    }
                    if self.stream.position() > offset {
                        return self.finish(offset, T::PiContent);
                    }
                }

                S::AfterOpeningEndTag => {
                    if self.stream.read_name().is_some() {
                        self.state = S::WithinEndTag;
                        return self.finish(offset, T::EndTag);
                    }
                    if self.stream.skip_whitespace() {
                        return self.finish_with_error(offset, T::Whitespace, UNEXPECTED_WHITESPACE);
                    }
                    self.state = S::WithinEndTag;
                    if !self.stream.advance_until_byte_or_new_tag(b'>') {
                        return self.finish(offset, T::Unknown);
                    }
                    if self.stream.peek() == Some(b'<') {
                        self.state = S::WithinContent;
                    }
                    if self.stream.position() > offset {
                        return self.finish(offset, T::Unknown);
                    }
                }

                S::WithinEndTag => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_byte(b'>') {
                        self.state = S::WithinContent;
                        return self.finish(offset, T::EndTagClose);
                    }
                    if self.stream.peek() == Some(b'<') {
                        self.state = S::WithinContent;
                        continue;
                    }
                    self.stream.advance_until_byte_or_new_tag(b'>');
                    return self.finish(offset, T::Unknown);
                }

                S::AfterOpeningStartTag => {
                    if self.stream.read_name().is_some() {
                        self.has_space_after_tag = false;
                        self.state = S::WithinTag;
                        return self.finish(offset, T::StartTag);
                    }
                    if self.stream.skip_whitespace() {
                        return self.finish_with_error(offset, T::Whitespace, UNEXPECTED_WHITESPACE);
                    }
                    self.state = S::WithinTag;
                    if !self.stream.advance_until_byte_or_new_tag(b'>') {
                        return self.finish(offset, T::Unknown);
                    }
                    if self.stream.peek() == Some(b'<') {
                        self.state = S::WithinContent;
                    }
                    if self.stream.position() > offset {
                        return self.finish(offset, T::Unknown);
                    }
                }

                S::WithinTag => {
                    if self.stream.skip_whitespace() {
                        self.has_space_after_tag = true;
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_bytes(b"?>") {
                        self.state = self.content_state();
                        return self.finish(offset, T::PrologEnd);
                    }
                    if self.has_space_after_tag && self.stream.read_attribute_name().is_some() {
                        self.has_space_after_tag = false;
                        self.state = S::AfterAttributeName;
                        return self.finish(offset, T::AttributeName);
                    }
                    if self.stream.advance_if_bytes(b"/>") {
                        self.state = S::WithinContent;
                        return self.finish(offset, T::StartTagSelfClose);
                    }
                    if self.stream.advance_if_byte(b'>') {
                        self.state = S::WithinContent;
                        return self.finish(offset, T::StartTagClose);
                    }
                    if self.stream.peek() == Some(b'<') {
                        self.state = self.content_state();
                        continue;
                    }
                    self.stream.advance_until_byte_or_new_tag(b'>');
                    return self.finish(offset, T::Unknown);
                }

                S::AfterAttributeName => {
                    if self.stream.skip_whitespace() {
                        self.has_space_after_tag = true;
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_byte(b'=') {
                        self.state = S::BeforeAttributeValue;
                        return self.finish(offset, T::DelimiterAssign);
                    }
                    self.state = S::WithinTag;
                }

                S::BeforeAttributeValue => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    self.state = S::WithinTag;
                    self.has_space_after_tag = false;
                    if self.stream.read_quoted().is_some()
                        || self.stream.read_unquoted_value().is_some()
                    {
                        return self.finish(offset, T::AttributeValue);
                    }
                }

                S::WithinDoctype => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_byte(b'[') {
                        self.state = S::WithinInternalDtd;
                        self.in_internal_dtd = true;
                        return self.finish(offset, T::InternalDtdStart);
                    }
                    if self.stream.advance_if_byte(b'>') {
                        self.state = S::WithinContent;
                        return self.finish(offset, T::EndDoctypeTag);
                    }
                    if self.stream.read_name().is_some() {
                        if self.doctype_named {
                            return self.finish_with_error(
                                offset,
                                T::Unknown,
                                UNEXPECTED_DOCTYPE_CONTENT,
                            );
                        }
                        self.doctype_named = true;
                        self.state = S::AfterDoctypeName;
                        return self.finish(offset, T::DoctypeName);
                    }
                    self.state = S::WithinContent;
                }

                S::AfterDoctypeName => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.advance_if_byte(b'[') {
                        self.state = S::WithinInternalDtd;
                        self.in_internal_dtd = true;
                        return self.finish(offset, T::InternalDtdStart);
                    }
                    if self.stream.advance_if_bytes(b"PUBLIC") {
                        self.state = S::AfterDoctypePublic;
                        return self.finish(offset, T::DoctypeKindPublic);
                    }
                    if self.stream.advance_if_bytes(b"SYSTEM") {
                        self.state = S::AfterDoctypeSystem;
                        return self.finish(offset, T::DoctypeKindSystem);
                    }
                    self.state = S::WithinDoctype;
                }

                S::AfterDoctypePublic => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if self.stream.read_quoted().is_some() {
                        self.state = S::AfterDoctypePublicId;
                        return self.finish(offset, T::DoctypePublicId);
                    }
                    self.state = S::WithinDoctype;
                }

                S::AfterDoctypeSystem | S::AfterDoctypePublicId => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    self.state = S::WithinDoctype;
                    if self.stream.read_quoted().is_some() {
                        return self.finish(offset, T::DoctypeSystemId);
                    }
                }

                S::WithinInternalDtd => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if !self.dtd_file && self.stream.advance_if_byte(b']') {
                        self.state = S::WithinDoctype;
                        self.in_internal_dtd = false;
                        return self.finish(offset, T::EndInternalDtd);
                    }
                    if self.stream.advance_if_bytes(b"<!") {
                        if self.stream.advance_if_bytes(b"ELEMENT") {
                            self.state = S::WithinElementDtd;
                            self.element_dtd_named = false;
                            return self.finish(offset, T::StartElementDtd);
                        }
                        if self.stream.advance_if_bytes(b"ATTLIST") {
                            self.state = S::WithinAttlistDtd;
                            return self.finish(offset, T::StartAttlistDtd);
                        }
                        if self.stream.advance_if_bytes(b"ENTITY") {
                            self.state = S::WithinDtdEntity;
                            return self.finish(offset, T::StartEntityDtd);
                        }
                        if self.stream.advance_if_bytes(b"--") {
                            self.state = S::WithinComment;
                            return self.finish(offset, T::StartCommentTag);
                        }
                        self.stream.advance_until_byte_or_new_tag(b'>');
                        self.stream.advance_if_byte(b'>');
                        return self.finish(offset, T::DtdUndefinedTag);
                    }
                    if self.stream.advance_if_bytes(b"<?") {
                        self.state = S::PrologOrPi;
                        return self.finish(offset, T::StartPrologOrPi);
                    }
                    if self.stream.advance_if_byte(b'<') {
                        self.stream.advance_until_byte_or_new_tag(b'>');
                        self.stream.advance_if_byte(b'>');
                        return self.finish(offset, T::DtdUndefinedTag);
                    }
                    // Parameter entity references and stray text
                    let stops: &[u8] = if self.dtd_file { b"<" } else { b"<]" };
                    self.stream.advance_until_any_of(stops);
                    return self.finish(offset, T::Unknown);
                }

                S::IncorrectDtdTagFormat => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if matches!(self.stream.peek(), Some(b'<' | b']')) {
                        self.state = S::WithinInternalDtd;
                        continue;
                    }
                    self.stream.advance_until_any_of(self.dtd_stops());
                    return self.finish(offset, T::DtdTagExcessContent);
                }

                S::WithinElementDtd => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if !self.element_dtd_named && self.stream.read_name().is_some() {
                        self.element_dtd_named = true;
                        self.state = S::AfterElementDtdName;
                        return self.finish(offset, T::ElementDtdName);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterElementDtdName => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    let stops = self.dtd_stops();
                    if self.stream.read_group(stops).is_some() {
                        self.state = S::AfterElementDtdContent;
                        return self.finish(offset, T::ElementDtdContent);
                    }
                    if let Some(category) = self.stream.read_name() {
                        if category == "EMPTY" || category == "ANY" {
                            self.state = S::AfterElementDtdContent;
                            return self.finish(offset, T::ElementDtdCategory);
                        }
                        self.state = S::IncorrectDtdTagFormat;
                        return self.finish(offset, T::DtdTagExcessContent);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterElementDtdContent => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::WithinAttlistDtd => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.read_name().is_some() {
                        self.state = S::AfterAttlistElementName;
                        return self.finish(offset, T::AttlistDtdElementName);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterAttlistElementName => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.read_name().is_some() {
                        self.state = S::AfterAttlistAttributeName;
                        return self.finish(offset, T::AttlistDtdAttributeName);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterAttlistAttributeName | S::AfterAttlistAttributeType => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    let stops = self.dtd_stops();
                    if self.stream.read_group(stops).is_some() {
                        self.state = S::AfterAttlistAttributeType;
                        return self.finish(offset, T::AttlistDtdType);
                    }
                    if self.state == S::AfterAttlistAttributeName {
                        if self.stream.read_name().is_some() {
                            self.state = S::AfterAttlistAttributeType;
                            return self.finish(offset, T::AttlistDtdType);
                        }
                    } else {
                        if self.stream.advance_if_bytes(b"#REQUIRED")
                            || self.stream.advance_if_bytes(b"#IMPLIED")
                        {
                            self.state = S::AfterAttlistElementName;
                            return self.finish(offset, T::AttlistDtdDefault);
                        }
                        if self.stream.advance_if_bytes(b"#FIXED") {
                            self.state = S::AfterAttlistFixed;
                            return self.finish(offset, T::AttlistDtdDefault);
                        }
                        if self.stream.read_quoted().is_some() {
                            self.state = S::AfterAttlistElementName;
                            return self.finish(offset, T::AttlistDtdValue);
                        }
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterAttlistFixed => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.read_quoted().is_some() {
                        self.state = S::AfterAttlistElementName;
                        return self.finish(offset, T::AttlistDtdValue);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::WithinDtdEntity => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.advance_if_byte(b'%') {
                        return self.finish(offset, T::DtdEntityPercent);
                    }
                    if self.stream.read_name().is_some() {
                        self.state = S::AfterDtdEntityName;
                        return self.finish(offset, T::DtdEntityName);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterDtdEntityName => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.read_quoted().is_some() {
                        self.state = S::AfterDtdEntityDecl;
                        return self.finish(offset, T::DtdEntityValue);
                    }
                    if self.stream.advance_if_bytes(b"SYSTEM") {
                        self.state = S::AfterDtdEntitySystem;
                        return self.finish(offset, T::DtdEntityKindSystem);
                    }
                    if self.stream.advance_if_bytes(b"PUBLIC") {
                        self.state = S::AfterDtdEntityPublic;
                        return self.finish(offset, T::DtdEntityKindPublic);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterDtdEntityPublic | S::AfterDtdEntitySystem => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.read_quoted().is_some() {
                        if self.state == S::AfterDtdEntityPublic {
                            self.state = S::AfterDtdEntitySystem;
                            return self.finish(offset, T::DtdEntityPublicId);
                        }
                        self.state = S::AfterDtdEntityDecl;
                        return self.finish(offset, T::DtdEntitySystemId);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }

                S::AfterDtdEntityDecl => {
                    if self.stream.skip_whitespace() {
                        return self.finish(offset, T::Whitespace);
                    }
                    if let Some(token) = self.end_dtd_tag(offset) {
                        return token;
                    }
                    if self.stream.advance_if_bytes(b"NDATA") {
                        self.stream.skip_whitespace();
                        self.stream.read_name();
                        return self.finish(offset, T::DtdEntityNData);
                    }
                    self.state = S::IncorrectDtdTagFormat;
                }
            }
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    /// Yields every token including the final `Eos`, then stops
    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        let token = self.scan();
        if token.kind == TokenKind::Eos {
            self.finished = true;
        }
        Some(token)
    }
}
