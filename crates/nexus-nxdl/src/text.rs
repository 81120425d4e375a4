//! Indented text projection of NXDL
//!
//! ```text
//! # header comment
//! category: application
//! doc: |
//!   Description of the definition.
//! type: group
//! NXdemo(NXobject):
//!   (NXentry):
//!     title(NX_CHAR):
//!       exists: recommended
//!     \@default:
//! ```
//!
//! `key: value` lines are XML attributes of the enclosing element, `key:` lines open a
//! child. `doc: |` opens a documentation block whose content sits one step deeper.
//! Inside such a block any line starting with `#` is a comment; documentation lines
//! that begin with `#` or `\` carry an extra leading `\`.

use crate::comments::{CommentStream, Slot};
use crate::syntax::{
    Attributes, Dim, Dimensions, Doc, ElementKind, Enumeration, Item, NxdlDocument, NxdlElement,
    Symbol, Symbols, anchor, dedent, normalize_lines, sorted_attributes,
};
use crate::{Error, Result};
use std::collections::BTreeSet;
use tracing::debug;

const STEP: usize = 2;

/// Keys with a fixed meaning inside an element body
pub const KEYWORDS: [&str; 9] = [
    "doc",
    "exists",
    "unit",
    "enumeration",
    "dimensions",
    "symbols",
    "dim",
    "dim_parameters",
    "category",
];

/// `NX` followed by a lowercase letter names a base class, anything else is a field type
pub fn is_group_type(token: &str) -> bool {
    token
        .strip_prefix("NX")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Inline lists
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListNode {
    Null,
    Text(String),
    List(Vec<ListNode>),
}

fn format_list(nodes: &[ListNode]) -> String {
    let parts: Vec<String> = nodes.iter().map(format_node).collect();
    format!("[{}]", parts.join(", "))
}

fn format_node(node: &ListNode) -> String {
    match node {
        ListNode::Null => "null".to_string(),
        ListNode::Text(text) if list_needs_quotes(text) => json_quote(text),
        ListNode::Text(text) => text.clone(),
        ListNode::List(items) => format_list(items),
    }
}

fn list_needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text != text.trim()
        || text == "null"
        || text.contains([',', '[', ']', '"', '\n'])
        || text.starts_with(['#', '\\'])
}

fn parse_list(text: &str, line: usize) -> Result<Vec<ListNode>> {
    let mut cursor = ListCursor { text, pos: 0, line };
    cursor.skip_spaces();
    let items = cursor.list()?;
    cursor.skip_spaces();
    if cursor.pos != text.len() {
        return Err(Error::text(line, "unexpected characters after list"));
    }
    Ok(items)
}

struct ListCursor<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl ListCursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn list(&mut self) -> Result<Vec<ListNode>> {
        if self.peek() != Some(b'[') {
            return Err(Error::text(self.line, "expected '['"));
        }
        self.pos += 1;
        self.skip_spaces();
        let mut items = Vec::new();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            self.skip_spaces();
            items.push(self.node()?);
            self.skip_spaces();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(Error::text(self.line, "unterminated list")),
            }
        }
    }

    fn node(&mut self) -> Result<ListNode> {
        match self.peek() {
            Some(b'[') => Ok(ListNode::List(self.list()?)),
            Some(b'"') => {
                let end = quoted_end(self.text, self.pos)
                    .ok_or_else(|| Error::text(self.line, "unterminated string"))?;
                let value = json_unquote(&self.text[self.pos..=end], self.line)?;
                self.pos = end + 1;
                Ok(ListNode::Text(value))
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == b',' || b == b']' {
                        break;
                    }
                    self.pos += 1;
                }
                match self.text[start..self.pos].trim() {
                    "" => Err(Error::text(self.line, "empty list item")),
                    "null" => Ok(ListNode::Null),
                    token => Ok(ListNode::Text(token.to_string())),
                }
            }
        }
    }
}

/// Index of the quote closing the JSON string that starts at `start`
fn quoted_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn json_quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn json_unquote(text: &str, line: usize) -> Result<String> {
    serde_json::from_str(text).map_err(|e| Error::text(line, format!("bad quoted string: {e}")))
}

/// Inline value text after `key: `
fn scalar_text(value: &str) -> String {
    let ambiguous = value.is_empty()
        || value != value.trim()
        || value.contains('\n')
        || value.starts_with(['"', '[', '|', '#', '\\', '{']);
    if ambiguous {
        json_quote(value)
    } else {
        value.to_string()
    }
}

fn unquote(value: &str, line: usize) -> Result<String> {
    if value.starts_with('"') {
        json_unquote(value, line)
    } else {
        Ok(value.to_string())
    }
}

/// Key text for enumeration items and symbols
fn free_key_text(key: &str) -> String {
    let ambiguous = key.is_empty()
        || key != key.trim()
        || KEYWORDS.contains(&key)
        || key.contains([':', '\n'])
        || key.starts_with(['"', '#', '\\', '[', '@']);
    if ambiguous {
        json_quote(key)
    } else {
        key.to_string()
    }
}

fn escape_doc_line(line: &str) -> String {
    let body = line.trim_start();
    if body.starts_with(['#', '\\']) {
        let indent = line.len() - body.len();
        format!("{}\\{}", &line[..indent], body)
    } else {
        line.to_string()
    }
}

fn unescape_doc_line(line: &str) -> String {
    let body = line.trim_start();
    match body.strip_prefix('\\') {
        Some(rest) => format!("{}{}", &line[..line.len() - body.len()], rest),
        None => line.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Project a syntax tree onto the text form
pub fn emit(document: &NxdlDocument) -> Result<String> {
    let mut writer = TextWriter {
        out: String::new(),
        comments: &document.comments,
        after_comment: false,
    };
    writer.definition(&document.root)?;
    Ok(writer.out)
}

struct TextWriter<'a> {
    out: String,
    comments: &'a CommentStream,
    after_comment: bool,
}

impl TextWriter<'_> {
    fn pad(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push(' ');
        }
    }

    fn line(&mut self, indent: usize, text: &str) {
        self.pad(indent);
        self.out.push_str(text);
        self.out.push('\n');
        self.after_comment = false;
    }

    fn comment_lines(&mut self, lines: &[String], indent: usize) {
        if lines.is_empty() {
            self.pad(indent);
            self.out.push_str("#\n");
        }
        for line in lines {
            self.pad(indent);
            self.out.push('#');
            if !line.is_empty() {
                self.out.push(' ');
                self.out.push_str(line);
            }
            self.out.push('\n');
        }
    }

    fn comments(&mut self, annotation: &str, slot: Slot, indent: usize) {
        let stream = self.comments;
        for comment in stream.anchored(annotation, slot) {
            if self.after_comment {
                self.out.push('\n');
            }
            self.comment_lines(&comment.lines, indent);
            self.after_comment = true;
        }
    }

    fn attribute_lines(&mut self, attributes: &Attributes, skip: &[&str], indent: usize) {
        for (key, value) in sorted_attributes(attributes) {
            if skip.contains(&key) {
                continue;
            }
            self.line(indent, &format!("{key}: {}", scalar_text(value)));
        }
    }

    fn doc_block(&mut self, key: &str, doc: &Doc, ann: &str, indent: usize) {
        self.line(indent, &format!("{key}: |"));
        let content = indent + STEP;
        let stream = self.comments;
        for k in 0..=doc.lines.len() {
            for (n, comment) in stream.anchored(ann, Slot::InDoc(k)).enumerate() {
                let at = if n % 2 == 0 { content } else { content + 1 };
                self.comment_lines(&comment.lines, at);
                self.after_comment = true;
            }
            if let Some(line) = doc.lines.get(k) {
                if line.is_empty() {
                    self.out.push('\n');
                    self.after_comment = false;
                } else {
                    self.line(content, &escape_doc_line(line));
                }
            }
        }
    }

    fn definition(&mut self, root: &NxdlElement) -> Result<()> {
        let name = root
            .name()
            .ok_or_else(|| Error::unsupported("definition", "missing name attribute"))?;
        if root.dimensions.is_some() || root.enumeration.is_some() {
            return Err(Error::unsupported(
                "definition",
                "dimensions or enumeration directly on the definition",
            ));
        }

        self.comments(anchor::ROOT, Slot::Before, 0);
        if let Some(category) = root.attr("category") {
            self.line(0, &format!("category: {}", scalar_text(category)));
        }
        if let Some(doc) = &root.doc {
            let a = anchor::doc(anchor::ROOT);
            self.comments(&a, Slot::Before, 0);
            self.doc_block("doc", doc, &a, 0);
        }
        if let Some(symbols) = &root.symbols {
            let a = anchor::symbols(anchor::ROOT);
            self.comments(&a, Slot::Before, 0);
            self.symbols(symbols, &a, 0)?;
        }
        self.attribute_lines(&root.attributes, &["name", "extends", "category"], 0);

        match root.attr("extends") {
            Some(extends) => self.line(0, &format!("{name}({extends}):")),
            None => self.line(0, &format!("{name}:")),
        }
        for (i, child) in root.children.iter().enumerate() {
            self.element(child, &anchor::child(anchor::ROOT, i), STEP)?;
        }
        self.comments(anchor::ROOT, Slot::End, STEP);
        self.comments(anchor::DOCUMENT, Slot::End, 0);
        Ok(())
    }

    fn element(&mut self, element: &NxdlElement, ann: &str, indent: usize) -> Result<()> {
        self.comments(ann, Slot::Before, indent);
        let key = element_key(element, ann)?;
        self.line(indent, &format!("{key}:"));

        let body = indent + STEP;
        let mut skip: Vec<&str> = vec!["name", "units"];
        if matches!(
            element.kind,
            ElementKind::Group | ElementKind::Field | ElementKind::Attribute
        ) {
            skip.push("type");
        }
        if let Some(enumeration) = &element.enumeration {
            let a = anchor::enumeration(ann);
            self.comments(&a, Slot::Before, body);
            self.enumeration(enumeration, &a, body)?;
        }
        if let Some((exists, folded)) = fold_exists(&element.attributes) {
            self.line(body, &format!("exists: {exists}"));
            skip.extend(folded);
        }
        if let Some(units) = element.attr("units") {
            self.line(body, &format!("unit: {}", scalar_text(units)));
        }
        self.attribute_lines(&element.attributes, &skip, body);

        if let Some(dimensions) = &element.dimensions {
            let a = anchor::dimensions(ann);
            self.comments(&a, Slot::Before, body);
            self.dimensions(dimensions, &a, body);
        }
        if let Some(doc) = &element.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, body);
            self.doc_block("doc", doc, &a, body);
        }
        if let Some(symbols) = &element.symbols {
            let a = anchor::symbols(ann);
            self.comments(&a, Slot::Before, body);
            self.symbols(symbols, &a, body)?;
        }
        for (i, child) in element.children.iter().enumerate() {
            self.element(child, &anchor::child(ann, i), body)?;
        }
        self.comments(ann, Slot::End, body);
        Ok(())
    }

    fn symbols(&mut self, symbols: &Symbols, ann: &str, indent: usize) -> Result<()> {
        self.line(indent, "symbols:");
        let body = indent + STEP;
        self.attribute_lines(&symbols.attributes, &[], body);
        if let Some(doc) = &symbols.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, body);
            self.doc_block("doc", doc, &a, body);
        }
        for (i, symbol) in symbols.symbols.iter().enumerate() {
            let name = symbol
                .name()
                .ok_or_else(|| Error::unsupported("symbol", "missing name attribute"))?;
            if symbol.attributes.len() > 1 {
                return Err(Error::unsupported(
                    format!("symbol '{name}'"),
                    "attributes other than name",
                ));
            }
            let a = anchor::child(ann, i);
            self.comments(&a, Slot::Before, body);
            let key = free_key_text(name);
            match &symbol.doc {
                Some(doc) => self.doc_block(&key, doc, &anchor::doc(&a), body),
                None => self.line(body, &format!("{key}:")),
            }
        }
        self.comments(ann, Slot::End, body);
        Ok(())
    }

    fn enumeration(&mut self, enumeration: &Enumeration, ann: &str, indent: usize) -> Result<()> {
        let inline = enumeration.attributes.is_empty()
            && enumeration
                .items
                .iter()
                .all(|item| {
                    item.doc.is_none() && item.attributes.len() == 1 && item.value().is_some()
                })
            && !self.comments.has_within(ann);
        if inline {
            let values: Vec<ListNode> = enumeration
                .items
                .iter()
                .filter_map(Item::value)
                .map(|v| ListNode::Text(v.to_string()))
                .collect();
            self.line(indent, &format!("enumeration: {}", format_list(&values)));
            return Ok(());
        }

        self.line(indent, "enumeration:");
        let body = indent + STEP;
        self.attribute_lines(&enumeration.attributes, &[], body);
        for (i, item) in enumeration.items.iter().enumerate() {
            let value = item
                .value()
                .ok_or_else(|| Error::unsupported("enumeration item", "missing value attribute"))?;
            let a = anchor::child(ann, i);
            self.comments(&a, Slot::Before, body);
            self.line(body, &format!("{}:", free_key_text(value)));
            let item_body = body + STEP;
            self.attribute_lines(&item.attributes, &["value"], item_body);
            if let Some(doc) = &item.doc {
                let d = anchor::doc(&a);
                self.comments(&d, Slot::Before, item_body);
                self.doc_block("doc", doc, &d, item_body);
            }
            self.comments(&a, Slot::End, item_body);
        }
        self.comments(ann, Slot::End, body);
        Ok(())
    }

    fn dimensions(&mut self, dimensions: &Dimensions, ann: &str, indent: usize) {
        self.line(indent, "dimensions:");
        let body = indent + STEP;
        self.attribute_lines(&dimensions.attributes, &[], body);
        if let Some(doc) = &dimensions.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, body);
            self.doc_block("doc", doc, &a, body);
        }

        if !dimensions.dims.is_empty() {
            self.comments(&anchor::dim_list(ann), Slot::Before, body);
            let pairs: Vec<ListNode> = dimensions
                .dims
                .iter()
                .map(|dim| {
                    ListNode::List(vec![
                        optional_node(dim.attributes.get("index")),
                        optional_node(dim.attributes.get("value")),
                    ])
                })
                .collect();
            self.line(body, &format!("dim: {}", format_list(&pairs)));

            let parameters: BTreeSet<&str> = dimensions
                .dims
                .iter()
                .flat_map(|dim| dim.attributes.keys())
                .map(String::as_str)
                .filter(|key| *key != "index" && *key != "value")
                .collect();
            let has_docs = dimensions.dims.iter().any(|dim| dim.doc.is_some());
            if !parameters.is_empty() || has_docs {
                self.line(body, "dim_parameters:");
                let inner = body + STEP;
                for key in parameters {
                    let values: Vec<ListNode> = dimensions
                        .dims
                        .iter()
                        .map(|dim| optional_node(dim.attributes.get(key)))
                        .collect();
                    self.line(inner, &format!("{key}: {}", format_list(&values)));
                }
                if has_docs {
                    self.line(inner, "doc:");
                    for (i, dim) in dimensions.dims.iter().enumerate() {
                        if let Some(doc) = &dim.doc {
                            let a = anchor::dim_doc(ann, i);
                            self.doc_block(&i.to_string(), doc, &a, inner + STEP);
                        }
                    }
                }
            }
        }
        self.comments(ann, Slot::End, body);
    }
}

fn optional_node(value: Option<&String>) -> ListNode {
    value.map_or(ListNode::Null, |v| ListNode::Text(v.clone()))
}

fn element_key(element: &NxdlElement, ann: &str) -> Result<String> {
    let context = || format!("<{}> at {ann}", element.kind.tag());
    let name = element.name().unwrap_or_default();
    if name.contains(['(', ')', ':', '\n']) || name.starts_with(['"', '#']) {
        return Err(Error::unsupported(context(), format!("name '{name}'")));
    }
    let require_name = || {
        if name.is_empty() {
            Err(Error::unsupported(context(), "missing name attribute"))
        } else {
            Ok(())
        }
    };

    match element.kind {
        ElementKind::Definition => Err(Error::unsupported(context(), "nested definition")),
        ElementKind::Attribute => {
            require_name()?;
            Ok(match element.type_token() {
                Some(ty) => format!("\\@{name}({ty})"),
                None => format!("\\@{name}"),
            })
        }
        ElementKind::Group => {
            let ty = element
                .type_token()
                .ok_or_else(|| Error::unsupported(context(), "group without type"))?;
            if !is_group_type(ty) {
                return Err(Error::unsupported(context(), format!("group type '{ty}'")));
            }
            Ok(format!("{name}({ty})"))
        }
        ElementKind::Field => {
            require_name()?;
            match element.type_token() {
                Some(ty) if is_group_type(ty) || ty == "choice" || ty == "link" => Err(
                    Error::unsupported(context(), format!("field type '{ty}' reads as a group")),
                ),
                Some(ty) => Ok(format!("{name}({ty})")),
                None if KEYWORDS.contains(&name) => Ok(format!("\\{name}")),
                None => Ok(name.to_string()),
            }
        }
        ElementKind::Choice => {
            require_name()?;
            Ok(format!("{name}(choice)"))
        }
        ElementKind::Link => {
            require_name()?;
            Ok(format!("{name}(link)"))
        }
    }
}

/// Fold optionality attributes into an `exists` value; returns the attributes consumed
fn fold_exists(attributes: &Attributes) -> Option<(String, Vec<&'static str>)> {
    let min = attributes.get("minOccurs");
    let max = attributes.get("maxOccurs");
    if min.is_some() || max.is_some() {
        let mut parts = Vec::new();
        if let Some(min) = min {
            parts.push(ListNode::Text("min".into()));
            parts.push(ListNode::Text(min.clone()));
        }
        if let Some(max) = max {
            parts.push(ListNode::Text("max".into()));
            let max = if max == "unbounded" { "infty" } else { max.as_str() };
            parts.push(ListNode::Text(max.to_string()));
        }
        return Some((format_list(&parts), vec!["minOccurs", "maxOccurs"]));
    }
    for key in ["recommended", "optional", "required"] {
        if attributes.get(key).is_some_and(|v| v == "true") {
            return Some((key.to_string(), vec![key]));
        }
    }
    None
}

fn unfold_exists(value: &str, line: usize, attributes: &mut Attributes) -> Result<()> {
    match value {
        "optional" | "recommended" | "required" => {
            attributes.insert(value.to_string(), "true".to_string());
            Ok(())
        }
        list if list.starts_with('[') => {
            let nodes = parse_list(list, line)?;
            if nodes.len() % 2 != 0 {
                return Err(Error::text(line, "exists list needs key/value pairs"));
            }
            for pair in nodes.chunks(2) {
                match (&pair[0], &pair[1]) {
                    (ListNode::Text(key), ListNode::Text(bound)) if key == "min" => {
                        attributes.insert("minOccurs".into(), bound.clone());
                    }
                    (ListNode::Text(key), ListNode::Text(bound)) if key == "max" => {
                        let bound = if bound == "infty" { "unbounded" } else { bound };
                        attributes.insert("maxOccurs".into(), bound.to_string());
                    }
                    _ => return Err(Error::text(line, "exists list accepts min and max only")),
                }
            }
            Ok(())
        }
        other => Err(Error::text(line, format!("unknown exists value '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse the text form
pub fn parse(input: &str) -> Result<NxdlDocument> {
    let lines = input
        .lines()
        .enumerate()
        .map(|(i, raw)| Line::new(i + 1, raw))
        .collect();
    let parser = TextParser {
        lines,
        pos: 0,
        comments: CommentStream::new(),
    };
    let document = parser.document()?;
    debug!(
        definition = document.root.name().unwrap_or_default(),
        comments = document.comments.len(),
        "parsed NXDL text"
    );
    Ok(document)
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    indent: usize,
    raw: &'a str,
    text: &'a str,
}

impl<'a> Line<'a> {
    fn new(number: usize, raw: &'a str) -> Self {
        let raw = raw.trim_end();
        let text = raw.trim_start_matches(' ');
        Self {
            number,
            indent: raw.len() - text.len(),
            raw,
            text,
        }
    }

    fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    fn is_comment(&self) -> bool {
        self.text.starts_with('#')
    }

    fn comment_text(&self) -> String {
        let body = self.text.strip_prefix('#').unwrap_or(self.text);
        body.strip_prefix(' ').unwrap_or(body).to_string()
    }
}

struct PendingComment {
    lines: Vec<String>,
    line: usize,
}

struct Entry<'a> {
    key: String,
    quoted: bool,
    value: Option<&'a str>,
    line: usize,
}

impl Entry<'_> {
    /// The key when it may carry a keyword meaning
    fn keyword(&self) -> Option<&str> {
        if self.quoted || self.key.starts_with('\\') {
            None
        } else {
            Some(self.key.as_str())
        }
    }
}

fn split_entry(line: Line<'_>) -> Result<Entry<'_>> {
    let text = line.text;
    let (key, quoted, rest) = if text.starts_with('"') {
        let end = quoted_end(text, 0).ok_or_else(|| Error::text(line.number, "unterminated key"))?;
        let key = json_unquote(&text[..=end], line.number)?;
        let Some(rest) = text[end + 1..].strip_prefix(':') else {
            return Err(Error::text(line.number, "expected ':' after quoted key"));
        };
        (key, true, rest)
    } else if let Some(split) = text.find(": ") {
        (text[..split].trim_end().to_string(), false, &text[split + 1..])
    } else if let Some(key) = text.strip_suffix(':') {
        (key.trim_end().to_string(), false, "")
    } else {
        return Err(Error::text(line.number, format!("expected 'key:' in '{text}'")));
    };

    let value = rest.trim();
    Ok(Entry {
        key,
        quoted,
        value: (!value.is_empty()).then_some(value),
        line: line.number,
    })
}

struct TextParser<'a> {
    lines: Vec<Line<'a>>,
    pos: usize,
    comments: CommentStream,
}

impl<'a> TextParser<'a> {
    /// Consume comment runs whose indentation is at least `min_indent`.
    /// A run ends at a blank line or a change of indentation.
    fn take_comments(&mut self, min_indent: usize) -> Vec<PendingComment> {
        let mut out = Vec::new();
        let mut run: Option<(usize, PendingComment)> = None;
        while let Some(&line) = self.lines.get(self.pos) {
            if line.is_blank() {
                out.extend(run.take().map(|(_, c)| c));
                self.pos += 1;
                continue;
            }
            if !line.is_comment() || line.indent < min_indent {
                break;
            }
            match &mut run {
                Some((indent, comment)) if *indent == line.indent => {
                    comment.lines.push(line.comment_text());
                }
                _ => {
                    out.extend(run.take().map(|(_, c)| c));
                    run = Some((
                        line.indent,
                        PendingComment {
                            lines: vec![line.comment_text()],
                            line: line.number,
                        },
                    ));
                }
            }
            self.pos += 1;
        }
        out.extend(run.map(|(_, c)| c));
        out
    }

    fn attach(&mut self, pending: &mut Vec<PendingComment>, annotation: &str, slot: Slot) {
        for comment in pending.drain(..) {
            self.comments
                .push(normalize_lines(comment.lines), annotation, slot, comment.line);
        }
    }

    /// Next entry at exactly `indent`; `None` once the block ends
    fn next_entry(
        &mut self,
        indent: usize,
        carry: &mut Vec<PendingComment>,
    ) -> Result<Option<Entry<'a>>> {
        carry.extend(self.take_comments(indent));
        let Some(&line) = self.lines.get(self.pos) else {
            return Ok(None);
        };
        if line.is_comment() || line.indent < indent {
            return Ok(None);
        }
        if line.indent > indent {
            return Err(Error::text(
                line.number,
                format!("unexpected indentation (expected {indent} spaces)"),
            ));
        }
        self.pos += 1;
        split_entry(line).map(Some)
    }

    fn document(mut self) -> Result<NxdlDocument> {
        let mut root = NxdlElement::new(ElementKind::Definition);
        let mut header = self.take_comments(0);
        self.attach(&mut header, anchor::ROOT, Slot::Before);

        let mut carry = Vec::new();
        let mut defined = false;
        while let Some(entry) = self.next_entry(0, &mut carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), Some("|")) => {
                    let a = anchor::doc(anchor::ROOT);
                    self.attach(&mut carry, &a, Slot::Before);
                    root.doc = Some(self.doc_block(0, &a)?);
                }
                (Some("symbols"), None) => {
                    let a = anchor::symbols(anchor::ROOT);
                    self.attach(&mut carry, &a, Slot::Before);
                    root.symbols = Some(self.symbols_block(STEP, &a)?);
                }
                (_, Some(value)) => {
                    let value = unquote(value, entry.line)?;
                    root.attributes.insert(entry.key, value);
                }
                (_, None) => {
                    if defined {
                        return Err(Error::text(entry.line, "second definition line"));
                    }
                    defined = true;
                    let (name, extends) = split_type(&entry.key);
                    root.attributes.insert("name".into(), name.to_string());
                    if let Some(extends) = extends {
                        root.attributes.insert("extends".into(), extends.to_string());
                    }
                    self.attach(&mut carry, anchor::ROOT, Slot::Before);
                    self.element_body(&mut root, anchor::ROOT, STEP)?;
                }
            }
        }

        if let Some(&line) = self.lines.get(self.pos) {
            return Err(Error::text(line.number, "unexpected content"));
        }
        if !defined {
            return Err(Error::text(
                self.lines.len(),
                "missing the 'NAME(EXTENDS):' definition line",
            ));
        }
        self.attach(&mut carry, anchor::DOCUMENT, Slot::End);
        Ok(NxdlDocument {
            root,
            comments: self.comments,
        })
    }

    fn element_body(&mut self, element: &mut NxdlElement, ann: &str, indent: usize) -> Result<()> {
        let mut carry = Vec::new();
        while let Some(entry) = self.next_entry(indent, &mut carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), Some("|")) => {
                    let a = anchor::doc(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    element.doc = Some(self.doc_block(indent, &a)?);
                }
                (Some("exists"), Some(value)) => {
                    unfold_exists(value, entry.line, &mut element.attributes)?;
                }
                (Some("unit"), Some(value)) => {
                    let units = unquote(value, entry.line)?;
                    element.attributes.insert("units".into(), units);
                }
                (Some("enumeration"), Some(value)) => {
                    let a = anchor::enumeration(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    element.enumeration = Some(inline_enumeration(value, entry.line)?);
                }
                (Some("enumeration"), None) => {
                    let a = anchor::enumeration(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    element.enumeration = Some(self.enumeration_block(indent + STEP, &a)?);
                }
                (Some("dimensions"), None) => {
                    let a = anchor::dimensions(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    element.dimensions = Some(self.dimensions_block(indent + STEP, &a)?);
                }
                (Some("symbols"), None) => {
                    let a = anchor::symbols(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    element.symbols = Some(self.symbols_block(indent + STEP, &a)?);
                }
                (_, Some(value)) => {
                    let value = unquote(value, entry.line)?;
                    element.attributes.insert(entry.key, value);
                }
                (_, None) => {
                    let a = anchor::child(ann, element.children.len());
                    self.attach(&mut carry, &a, Slot::Before);
                    let mut child = element_from_key(&entry)?;
                    self.element_body(&mut child, &a, indent + STEP)?;
                    element.children.push(child);
                }
            }
        }
        self.attach(&mut carry, ann, Slot::End);
        Ok(())
    }

    /// Documentation block after a `key: |` line at `key_indent`
    fn doc_block(&mut self, key_indent: usize, ann: &str) -> Result<Doc> {
        let content = key_indent + STEP;
        let mut lines: Vec<String> = Vec::new();
        let mut blanks = 0usize;
        let mut markers: Vec<(usize, PendingComment)> = Vec::new();
        let mut run: Option<(usize, usize, PendingComment)> = None;

        while let Some(&line) = self.lines.get(self.pos) {
            if line.is_blank() {
                blanks += 1;
                markers.extend(run.take().map(|(_, k, c)| (k, c)));
                self.pos += 1;
                continue;
            }
            if line.indent < content {
                break;
            }
            lines.extend(std::iter::repeat_n(String::new(), blanks));
            blanks = 0;

            if line.is_comment() {
                match &mut run {
                    Some((indent, _, comment)) if *indent == line.indent => {
                        comment.lines.push(line.comment_text());
                    }
                    _ => {
                        markers.extend(run.take().map(|(_, k, c)| (k, c)));
                        run = Some((
                            line.indent,
                            lines.len(),
                            PendingComment {
                                lines: vec![line.comment_text()],
                                line: line.number,
                            },
                        ));
                    }
                }
            } else {
                markers.extend(run.take().map(|(_, k, c)| (k, c)));
                lines.push(unescape_doc_line(&line.raw[content..]));
            }
            self.pos += 1;
        }
        markers.extend(run.map(|(_, k, c)| (k, c)));

        let lead = lines.iter().take_while(|l| l.is_empty()).count();
        lines.drain(..lead);
        dedent(&mut lines);
        for (k, comment) in markers {
            let k = k.saturating_sub(lead).min(lines.len());
            self.comments.push(
                normalize_lines(comment.lines),
                ann,
                Slot::InDoc(k),
                comment.line,
            );
        }
        Ok(Doc { lines })
    }

    fn symbols_block(&mut self, indent: usize, ann: &str) -> Result<Symbols> {
        let mut symbols = Symbols::default();
        let mut carry = Vec::new();
        while let Some(entry) = self.next_entry(indent, &mut carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), Some("|")) => {
                    let a = anchor::doc(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    symbols.doc = Some(self.doc_block(indent, &a)?);
                }
                (_, Some("|")) | (_, None) => {
                    let a = anchor::child(ann, symbols.symbols.len());
                    self.attach(&mut carry, &a, Slot::Before);
                    let doc = match entry.value {
                        Some(_) => Some(self.doc_block(indent, &anchor::doc(&a))?),
                        None => None,
                    };
                    let mut attributes = Attributes::new();
                    attributes.insert("name".into(), entry.key);
                    symbols.symbols.push(Symbol { attributes, doc });
                }
                (_, Some(value)) => {
                    let value = unquote(value, entry.line)?;
                    symbols.attributes.insert(entry.key, value);
                }
            }
        }
        self.attach(&mut carry, ann, Slot::End);
        Ok(symbols)
    }

    fn enumeration_block(&mut self, indent: usize, ann: &str) -> Result<Enumeration> {
        let mut enumeration = Enumeration::default();
        let mut carry = Vec::new();
        while let Some(entry) = self.next_entry(indent, &mut carry)? {
            match entry.value {
                Some(value) => {
                    let value = unquote(value, entry.line)?;
                    enumeration.attributes.insert(entry.key, value);
                }
                None => {
                    let a = anchor::child(ann, enumeration.items.len());
                    self.attach(&mut carry, &a, Slot::Before);
                    let mut item = Item::default();
                    item.attributes.insert("value".into(), entry.key);
                    self.item_body(&mut item, indent + STEP, &a)?;
                    enumeration.items.push(item);
                }
            }
        }
        self.attach(&mut carry, ann, Slot::End);
        Ok(enumeration)
    }

    fn item_body(&mut self, item: &mut Item, indent: usize, ann: &str) -> Result<()> {
        let mut carry = Vec::new();
        while let Some(entry) = self.next_entry(indent, &mut carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), Some("|")) => {
                    let a = anchor::doc(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    item.doc = Some(self.doc_block(indent, &a)?);
                }
                (_, Some(value)) => {
                    let value = unquote(value, entry.line)?;
                    item.attributes.insert(entry.key, value);
                }
                (_, None) => {
                    return Err(Error::text(entry.line, "enumeration items have no children"));
                }
            }
        }
        self.attach(&mut carry, ann, Slot::End);
        Ok(())
    }

    fn dimensions_block(&mut self, indent: usize, ann: &str) -> Result<Dimensions> {
        let mut dimensions = Dimensions::default();
        let mut pairs: Option<(Vec<ListNode>, usize)> = None;
        let mut parameters: Vec<(String, Vec<ListNode>, usize)> = Vec::new();
        let mut docs: Vec<(usize, Doc, usize)> = Vec::new();
        let mut carry = Vec::new();

        while let Some(entry) = self.next_entry(indent, &mut carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), Some("|")) => {
                    let a = anchor::doc(ann);
                    self.attach(&mut carry, &a, Slot::Before);
                    dimensions.doc = Some(self.doc_block(indent, &a)?);
                }
                (Some("dim"), Some(value)) => {
                    self.attach(&mut carry, &anchor::dim_list(ann), Slot::Before);
                    pairs = Some((parse_list(value, entry.line)?, entry.line));
                }
                (Some("dim_parameters"), None) => {
                    let inner = indent + STEP;
                    self.dim_parameters(inner, ann, &mut parameters, &mut docs, &mut carry)?;
                }
                (_, Some(value)) => {
                    let value = unquote(value, entry.line)?;
                    dimensions.attributes.insert(entry.key, value);
                }
                (_, None) => {
                    return Err(Error::text(
                        entry.line,
                        format!("unexpected block '{}' in dimensions", entry.key),
                    ));
                }
            }
        }

        if let Some((pairs, line)) = pairs {
            for pair in pairs {
                let ListNode::List(parts) = pair else {
                    return Err(Error::text(line, "dim entries are [index, value] pairs"));
                };
                let [index, value] = parts.as_slice() else {
                    return Err(Error::text(line, "dim entries are [index, value] pairs"));
                };
                let mut dim = Dim::default();
                for (key, node) in [("index", index), ("value", value)] {
                    match node {
                        ListNode::Text(text) => {
                            dim.attributes.insert(key.into(), text.clone());
                        }
                        ListNode::Null => {}
                        ListNode::List(_) => {
                            return Err(Error::text(line, "nested list inside a dim pair"));
                        }
                    }
                }
                dimensions.dims.push(dim);
            }
        }

        for (key, values, line) in parameters {
            if values.len() != dimensions.dims.len() {
                return Err(Error::text(
                    line,
                    format!(
                        "'{key}' has {} entries for {} dims",
                        values.len(),
                        dimensions.dims.len()
                    ),
                ));
            }
            for (dim, node) in dimensions.dims.iter_mut().zip(values) {
                match node {
                    ListNode::Text(text) => {
                        dim.attributes.insert(key.clone(), text);
                    }
                    ListNode::Null => {}
                    ListNode::List(_) => {
                        return Err(Error::text(line, "nested list in dim_parameters"));
                    }
                }
            }
        }
        for (index, doc, line) in docs {
            let dim = dimensions
                .dims
                .get_mut(index)
                .ok_or_else(|| Error::text(line, format!("no dim at position {index}")))?;
            dim.doc = Some(doc);
        }

        self.attach(&mut carry, ann, Slot::End);
        Ok(dimensions)
    }

    fn dim_parameters(
        &mut self,
        indent: usize,
        ann: &str,
        parameters: &mut Vec<(String, Vec<ListNode>, usize)>,
        docs: &mut Vec<(usize, Doc, usize)>,
        carry: &mut Vec<PendingComment>,
    ) -> Result<()> {
        while let Some(entry) = self.next_entry(indent, carry)? {
            match (entry.keyword(), entry.value) {
                (Some("doc"), None) => {
                    while let Some(doc_entry) = self.next_entry(indent + STEP, carry)? {
                        let index: usize = doc_entry.key.parse().map_err(|_| {
                            Error::text(doc_entry.line, "dim docs are keyed by position")
                        })?;
                        if doc_entry.value != Some("|") {
                            return Err(Error::text(
                                doc_entry.line,
                                "expected '|' after dim position",
                            ));
                        }
                        let doc = self.doc_block(indent + STEP, &anchor::dim_doc(ann, index))?;
                        docs.push((index, doc, doc_entry.line));
                    }
                }
                (_, Some(value)) => {
                    parameters.push((entry.key, parse_list(value, entry.line)?, entry.line));
                }
                (_, None) => {
                    return Err(Error::text(entry.line, "unexpected block in dim_parameters"));
                }
            }
        }
        Ok(())
    }
}

fn inline_enumeration(value: &str, line: usize) -> Result<Enumeration> {
    let mut enumeration = Enumeration::default();
    for node in parse_list(value, line)? {
        let ListNode::Text(text) = node else {
            return Err(Error::text(line, "enumeration values must be plain strings"));
        };
        let mut item = Item::default();
        item.attributes.insert("value".into(), text);
        enumeration.items.push(item);
    }
    Ok(enumeration)
}

fn split_type(key: &str) -> (&str, Option<&str>) {
    if let Some(inner) = key.strip_suffix(')') {
        if let Some(open) = inner.find('(') {
            return (&inner[..open], Some(&inner[open + 1..]));
        }
    }
    (key, None)
}

fn element_from_key(entry: &Entry<'_>) -> Result<NxdlElement> {
    if entry.quoted {
        return Err(Error::text(entry.line, "element keys cannot be quoted"));
    }
    let key = entry.key.as_str();
    if let Some(rest) = key.strip_prefix("\\@").or_else(|| key.strip_prefix('@')) {
        let (name, ty) = split_type(rest);
        if name.is_empty() {
            return Err(Error::text(entry.line, "attribute without a name"));
        }
        let mut element = NxdlElement::new(ElementKind::Attribute).with_attribute("name", name);
        if let Some(ty) = ty {
            element.attributes.insert("type".into(), ty.to_string());
        }
        return Ok(element);
    }

    let key = key.strip_prefix('\\').unwrap_or(key);
    let (name, ty) = split_type(key);
    let named = |kind: ElementKind| {
        if name.is_empty() {
            Err(Error::text(
                entry.line,
                format!("<{}> needs a name before '('", kind.tag()),
            ))
        } else {
            Ok(NxdlElement::new(kind).with_attribute("name", name))
        }
    };

    match ty {
        Some("choice") => named(ElementKind::Choice),
        Some("link") => named(ElementKind::Link),
        Some(ty) if is_group_type(ty) => {
            let mut element = NxdlElement::new(ElementKind::Group);
            if !name.is_empty() {
                element.attributes.insert("name".into(), name.to_string());
            }
            element.attributes.insert("type".into(), ty.to_string());
            Ok(element)
        }
        Some(ty) => Ok(named(ElementKind::Field)?.with_attribute("type", ty)),
        None => named(ElementKind::Field),
    }
}
