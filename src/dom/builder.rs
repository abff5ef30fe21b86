//! DOM Builder - token stream to arena tree
//!
//! Drives the [`Tokenizer`] over the whole text and keeps one cursor, the
//! innermost open node. The builder never fails: every token either updates
//! the cursor or is ignored, and at end of stream every node still open is
//! closed as unterminated with `end` set to the document length.
//!
//! Close-tag matching searches upward from the cursor for the nearest open
//! element with the same (case-sensitive) name. Elements skipped on the way
//! are left unclosed and end where the close tag starts. A close tag without
//! a match changes nothing and is remembered as dangling.

use super::node::{
    AttrId, DocTypeData, DtdAttlistDeclData, DtdAttrDef, DtdElementDeclData, DtdEntityDeclData,
    ElementData, NodeData, NodeId, PiData, XmlAttribute, XmlNode,
};
use crate::core::tokenizer::{Token, TokenKind, Tokenizer};
use crate::index::Span;

/// Arena parts produced by one build
pub(crate) struct BuiltTree {
    pub nodes: Vec<XmlNode>,
    pub attributes: Vec<XmlAttribute>,
    pub dangling_end_tags: Vec<Span>,
}

pub(crate) struct DomBuilder<'t> {
    text: &'t str,
    nodes: Vec<XmlNode>,
    attributes: Vec<XmlAttribute>,
    dangling_end_tags: Vec<Span>,
    cursor: NodeId,
    /// Attribute waiting for its value
    pending_attribute: Option<AttrId>,
    /// Offset of the `</` being processed
    end_tag_open: Option<usize>,
    /// Element matched by the current end tag, finalized on `>`
    last_closed: Option<NodeId>,
    /// Dangling end tag whose `>` is still to come
    pending_dangling: Option<usize>,
    in_internal_subset: bool,
}

impl<'t> DomBuilder<'t> {
    pub fn new(text: &'t str) -> Self {
        let mut nodes = Vec::with_capacity(256);
        nodes.push(XmlNode::document(text.len()));
        DomBuilder {
            text,
            nodes,
            attributes: Vec::with_capacity(128),
            dangling_end_tags: Vec::new(),
            cursor: 0,
            pending_attribute: None,
            end_tag_open: None,
            last_closed: None,
            pending_dangling: None,
            in_internal_subset: false,
        }
    }

    /// Build the tree of an XML document
    pub fn build(self) -> BuiltTree {
        let tokenizer = Tokenizer::new(self.text);
        self.run(tokenizer)
    }

    /// Build the tree of a standalone DTD: declarations become children of
    /// the document node
    pub fn build_dtd(mut self) -> BuiltTree {
        let tokenizer = Tokenizer::for_dtd_file(self.text);
        self.in_internal_subset = true;
        self.run(tokenizer)
    }

    fn run(mut self, tokenizer: Tokenizer<'_>) -> BuiltTree {
        for token in tokenizer {
            if token.kind == TokenKind::Eos {
                break;
            }
            self.on_token(token);
        }
        self.finish()
    }

    fn on_token(&mut self, token: Token) {
        use TokenKind as T;

        match token.kind {
            T::StartTagOpen => {
                self.close_leaves(token.start, false);
                let id = self.open_child(NodeData::Element(ElementData::default()), token);
                self.cursor = id;
            }
            T::StartTag => {
                let node = &mut self.nodes[self.cursor as usize];
                node.end = token.end;
                if let Some(element) = node.element_mut() {
                    if element.name.is_none() {
                        element.name = Some(span(token));
                    }
                }
            }
            T::StartTagClose => {
                let node = &mut self.nodes[self.cursor as usize];
                if let Some(element) = node.element_mut() {
                    element.start_tag_close = Some(token.start);
                    node.end = token.end;
                }
                self.pending_attribute = None;
            }
            T::StartTagSelfClose => {
                let cursor = self.cursor;
                let node = &mut self.nodes[cursor as usize];
                if let Some(element) = node.element_mut() {
                    element.self_closed = true;
                    element.start_tag_close = Some(token.start);
                    node.end = token.end;
                    node.closed = true;
                    self.ascend();
                }
                self.pending_attribute = None;
            }
            T::AttributeName => self.on_attribute_name(token),
            T::AttributeValue => {
                if let Some(id) = self.pending_attribute.take() {
                    self.attributes[id as usize].value = Some(span(token));
                    self.nodes[self.cursor as usize].end = token.end;
                }
            }
            T::EndTagOpen => {
                self.close_leaves(token.start, false);
                self.end_tag_open = Some(token.start);
                self.last_closed = None;
                self.pending_dangling = None;
            }
            T::EndTag => self.on_end_tag(token),
            T::EndTagClose => {
                if let Some(id) = self.last_closed.take() {
                    self.nodes[id as usize].end = token.end;
                } else if let Some(i) = self.pending_dangling.take() {
                    self.dangling_end_tags[i].end = token.end;
                }
                self.end_tag_open = None;
            }
            T::Content => {
                self.close_leaves(token.start, self.in_internal_subset);
                if !token.text(self.text).trim().is_empty() && !self.in_internal_subset {
                    let id = self.open_child(NodeData::Text, token);
                    self.nodes[id as usize].closed = true;
                }
            }

            T::StartCommentTag => {
                self.close_leaves(token.start, self.in_internal_subset);
                self.cursor = self.open_child(NodeData::Comment { content: None }, token);
            }
            T::Comment => {
                if let NodeData::Comment { content } = &mut self.nodes[self.cursor as usize].data {
                    *content = Some(span(token));
                }
            }
            T::CDataTagOpen => {
                self.close_leaves(token.start, false);
                self.cursor = self.open_child(NodeData::CData { content: None }, token);
            }
            T::CDataContent => {
                if let NodeData::CData { content } = &mut self.nodes[self.cursor as usize].data {
                    *content = Some(span(token));
                }
            }
            T::EndCommentTag | T::CDataTagClose => self.close_cursor_leaf(token),

            T::StartPrologOrPi => {
                self.close_leaves(token.start, self.in_internal_subset);
                let data = NodeData::ProcessingInstruction(PiData::default());
                self.cursor = self.open_child(data, token);
            }
            T::PrologName | T::PiName => {
                if let NodeData::ProcessingInstruction(pi) = &mut self.nodes[self.cursor as usize].data {
                    pi.target = Some(span(token));
                    pi.prolog = token.kind == T::PrologName;
                }
            }
            T::PiContent => {
                if let NodeData::ProcessingInstruction(pi) = &mut self.nodes[self.cursor as usize].data {
                    let start = pi.content.map_or(token.start, |c| c.start);
                    pi.content = Some(Span::new(start, token.end));
                }
            }
            T::PiEnd | T::PrologEnd => {
                if matches!(
                    self.nodes[self.cursor as usize].data,
                    NodeData::ProcessingInstruction(_)
                ) {
                    self.close_cursor_leaf(token);
                    self.pending_attribute = None;
                }
            }

            T::StartDoctypeTag => {
                self.close_leaves(token.start, false);
                let data = NodeData::DocType(DocTypeData::default());
                self.cursor = self.open_child(data, token);
            }
            T::DoctypeName
            | T::DoctypeKindPublic
            | T::DoctypeKindSystem
            | T::DoctypePublicId
            | T::DoctypeSystemId => {
                if let NodeData::DocType(doctype) = &mut self.nodes[self.cursor as usize].data {
                    let slot = match token.kind {
                        T::DoctypeName => &mut doctype.name,
                        T::DoctypeKindPublic | T::DoctypeKindSystem => &mut doctype.kind,
                        T::DoctypePublicId => &mut doctype.public_id,
                        _ => &mut doctype.system_id,
                    };
                    *slot = Some(span(token));
                }
            }
            T::InternalDtdStart => {
                let len = self.text.len();
                if let NodeData::DocType(doctype) = &mut self.nodes[self.cursor as usize].data {
                    doctype.internal_subset = Some(Span::new(token.start, len));
                    self.in_internal_subset = true;
                }
            }
            T::EndInternalDtd => {
                self.close_leaves(token.start, true);
                if let NodeData::DocType(doctype) = &mut self.nodes[self.cursor as usize].data {
                    if let Some(subset) = &mut doctype.internal_subset {
                        subset.end = token.end;
                    }
                }
                self.in_internal_subset = false;
            }
            T::EndDoctypeTag => {
                self.close_leaves(token.start, true);
                let node = &mut self.nodes[self.cursor as usize];
                if matches!(node.data, NodeData::DocType(_)) {
                    node.end = token.end;
                    node.closed = true;
                    self.ascend();
                }
                self.in_internal_subset = false;
            }

            T::StartElementDtd | T::StartAttlistDtd | T::StartEntityDtd => {
                self.close_leaves(token.start, true);
                let data = match token.kind {
                    T::StartElementDtd => NodeData::DtdElementDecl(DtdElementDeclData::default()),
                    T::StartAttlistDtd => NodeData::DtdAttlistDecl(DtdAttlistDeclData::default()),
                    _ => NodeData::DtdEntityDecl(DtdEntityDeclData::default()),
                };
                self.cursor = self.open_child(data, token);
            }
            T::ElementDtdName | T::ElementDtdCategory | T::ElementDtdContent => {
                if let NodeData::DtdElementDecl(decl) = &mut self.nodes[self.cursor as usize].data {
                    let slot = match token.kind {
                        T::ElementDtdName => &mut decl.name,
                        T::ElementDtdCategory => &mut decl.category,
                        _ => &mut decl.content,
                    };
                    *slot = Some(span(token));
                }
            }
            T::AttlistDtdElementName
            | T::AttlistDtdAttributeName
            | T::AttlistDtdType
            | T::AttlistDtdDefault
            | T::AttlistDtdValue => {
                if let NodeData::DtdAttlistDecl(decl) = &mut self.nodes[self.cursor as usize].data {
                    on_attlist_token(decl, token);
                }
            }
            T::DtdEntityPercent
            | T::DtdEntityName
            | T::DtdEntityValue
            | T::DtdEntityKindPublic
            | T::DtdEntityKindSystem
            | T::DtdEntityPublicId
            | T::DtdEntitySystemId
            | T::DtdEntityNData => {
                if let NodeData::DtdEntityDecl(decl) = &mut self.nodes[self.cursor as usize].data {
                    let value = Some(span(token));
                    match token.kind {
                        T::DtdEntityPercent => decl.parameter = true,
                        T::DtdEntityName => decl.name = value,
                        T::DtdEntityValue => decl.value = value,
                        T::DtdEntityKindPublic | T::DtdEntityKindSystem => decl.kind = value,
                        T::DtdEntityPublicId => decl.public_id = value,
                        T::DtdEntitySystemId => decl.system_id = value,
                        _ => decl.ndata = value,
                    }
                }
            }
            T::EndDtdTag => {
                let node = &self.nodes[self.cursor as usize];
                if matches!(
                    node.data,
                    NodeData::DtdElementDecl(_)
                        | NodeData::DtdAttlistDecl(_)
                        | NodeData::DtdEntityDecl(_)
                ) {
                    self.close_cursor_leaf(token);
                }
            }

            T::DelimiterAssign
            | T::Whitespace
            | T::DtdUndefinedTag
            | T::DtdTagExcessContent
            | T::Unknown
            | T::Eos => {}
        }
    }

    fn on_attribute_name(&mut self, token: Token) {
        let cursor = self.cursor;
        let owner = &self.nodes[cursor as usize];
        let accepts = owner.is_element()
            || matches!(&owner.data, NodeData::ProcessingInstruction(pi) if pi.prolog);
        if !accepts {
            return;
        }
        let name = token.text(self.text);
        let start = owner.attr_start as usize;
        let existing = (start..start + owner.attr_count as usize)
            .find(|&i| self.attributes[i].name.as_str(self.text) == name);

        let id = match existing {
            // A repeated name replaces the earlier value, keeping its position
            Some(i) => {
                self.attributes[i].value = None;
                i as AttrId
            }
            None => {
                let id = self.attributes.len() as AttrId;
                let node = &mut self.nodes[cursor as usize];
                if node.attr_count == 0 {
                    node.attr_start = id;
                }
                node.attr_count += 1;
                self.attributes.push(XmlAttribute::new(span(token), cursor));
                id
            }
        };
        self.nodes[cursor as usize].end = token.end;
        self.pending_attribute = Some(id);
    }

    fn on_end_tag(&mut self, token: Token) {
        let name = token.text(self.text);
        let end_tag_open = self.end_tag_open.unwrap_or(token.start);

        // Search first, mutate only on a match
        let mut matched = None;
        let mut current = Some(self.cursor);
        while let Some(id) = current {
            if id == 0 {
                break;
            }
            let node = &self.nodes[id as usize];
            if let Some(element) = node.element() {
                if element.name.map(|n| n.as_str(self.text)) == Some(name) {
                    matched = Some(id);
                    break;
                }
            }
            current = node.parent;
        }

        let Some(matched) = matched else {
            self.pending_dangling = Some(self.dangling_end_tags.len());
            self.dangling_end_tags.push(Span::new(end_tag_open, token.end));
            return;
        };

        let mut current = self.cursor;
        while current != matched {
            let node = &mut self.nodes[current as usize];
            node.closed = false;
            node.end = end_tag_open;
            current = node.parent.unwrap_or(0);
        }
        let node = &mut self.nodes[matched as usize];
        node.closed = true;
        node.end = token.end;
        if let Some(element) = node.element_mut() {
            element.end_tag_open = Some(end_tag_open);
        }
        self.cursor = node.parent.unwrap_or(0);
        self.last_closed = Some(matched);
    }

    /// Create a node as last child of the cursor
    fn open_child(&mut self, data: NodeData, token: Token) -> NodeId {
        let parent = self.cursor;
        let depth = self.nodes[parent as usize].depth.saturating_add(1);
        let id = self.nodes.len() as NodeId;
        self.nodes
            .push(XmlNode::new(data, Some(parent), depth, token.start, token.end));
        self.link_child(parent, id);
        id
    }

    fn link_child(&mut self, parent_id: NodeId, child_id: NodeId) {
        let last_child_opt = self.nodes[parent_id as usize].last_child;

        if let Some(last_child_id) = last_child_opt {
            self.nodes[child_id as usize].prev_sibling = Some(last_child_id);
            self.nodes[last_child_id as usize].next_sibling = Some(child_id);
        } else {
            self.nodes[parent_id as usize].first_child = Some(child_id);
        }
        self.nodes[parent_id as usize].last_child = Some(child_id);
    }

    #[inline]
    fn ascend(&mut self) {
        self.cursor = self.nodes[self.cursor as usize].parent.unwrap_or(0);
    }

    /// Terminate the cursor leaf with its closing token
    fn close_cursor_leaf(&mut self, token: Token) {
        let node = &mut self.nodes[self.cursor as usize];
        if node.is_leaf_container() {
            node.end = token.end;
            node.closed = true;
            self.ascend();
        }
    }

    /// Leave unterminated leaves (PI, comment, CDATA, DTD declaration) and,
    /// unless `keep_doctype`, an unterminated DOCTYPE, ending them at `offset`
    fn close_leaves(&mut self, offset: usize, keep_doctype: bool) {
        loop {
            let node = &mut self.nodes[self.cursor as usize];
            let is_doctype = matches!(node.data, NodeData::DocType(_));
            if !(node.is_leaf_container() || (is_doctype && !keep_doctype)) {
                break;
            }
            node.closed = false;
            node.end = offset.max(node.start);
            self.ascend();
            if is_doctype {
                self.in_internal_subset = false;
            }
        }
        self.pending_attribute = None;
    }

    fn finish(mut self) -> BuiltTree {
        let len = self.text.len();
        let mut current = self.cursor;
        while current != 0 {
            let node = &mut self.nodes[current as usize];
            node.closed = false;
            node.end = len;
            current = node.parent.unwrap_or(0);
        }
        let root = &mut self.nodes[0];
        root.end = len;
        root.closed = true;
        BuiltTree {
            nodes: self.nodes,
            attributes: self.attributes,
            dangling_end_tags: self.dangling_end_tags,
        }
    }
}

fn on_attlist_token(decl: &mut DtdAttlistDeclData, token: Token) {
    use TokenKind as T;

    let value = Some(span(token));
    if token.kind == T::AttlistDtdElementName {
        decl.element_name = value;
        return;
    }
    if token.kind == T::AttlistDtdAttributeName {
        decl.definitions.push(DtdAttrDef {
            name: span(token),
            att_type: None,
            default_kind: None,
            value: None,
        });
        return;
    }
    let Some(def) = decl.definitions.last_mut() else {
        return;
    };
    match token.kind {
        // `NOTATION (a|b)` arrives as two type tokens
        T::AttlistDtdType => {
            def.att_type = Some(match def.att_type {
                Some(first) => Span::new(first.start, token.end),
                None => span(token),
            });
        }
        T::AttlistDtdDefault => def.default_kind = value,
        _ => def.value = value,
    }
}

#[inline]
fn span(token: Token) -> Span {
    Span::new(token.start, token.end)
}
