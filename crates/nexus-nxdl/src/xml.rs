//! XML reading and canonical XML emission
//!
//! Reading happens in two passes: quick-xml events are folded into a small raw
//! element tree, which is then converted into the syntax tree while comments are
//! routed into the [`CommentStream`].
//!
//! Canonical output uses a four-space indent, places children in the order
//! doc, symbols, dimensions, elements, enumeration, and sorts attributes with
//! [`canonical_attribute_order`](crate::syntax::canonical_attribute_order).
//! Document-level processing instructions are dropped.

use crate::comments::{CommentStream, Slot, comment_lines};
use crate::syntax::{
    Attributes, Dim, Dimensions, Doc, ElementKind, Enumeration, Item, NxdlDocument, NxdlElement,
    Symbol, Symbols, anchor, dedent, sorted_attributes,
};
use crate::{Error, Result};
use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const INDENT: &str = "    ";

enum RawNode {
    Element(RawElement),
    Text(String),
    Comment { text: String, line: usize },
}

struct RawElement {
    tag: String,
    attributes: Attributes,
    children: Vec<RawNode>,
    line: usize,
}

struct RawDocument {
    prolog: Vec<(String, usize)>,
    root: RawElement,
    epilog: Vec<(String, usize)>,
}

/// Byte offset → 1-based line number
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(input: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(input.match_indices('\n').map(|(pos, _)| pos + 1));
        Self { starts }
    }

    fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }
}

fn read_raw(input: &str) -> Result<RawDocument> {
    let lines = LineIndex::new(input);
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<RawElement> = Vec::new();
    let mut root: Option<RawElement> = None;
    let mut prolog = Vec::new();
    let mut epilog = Vec::new();

    loop {
        let offset = usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX);
        let line = lines.line(offset);
        let event = reader
            .read_event()
            .map_err(|e| Error::xml(line, e.to_string()))?;

        match event {
            Event::Start(start) => stack.push(open_element(&start, line)?),
            Event::Empty(start) => {
                let element = open_element(&start, line)?;
                attach(&mut stack, &mut root, element, line)?;
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(Error::xml(line, "closing tag without an open element"));
                };
                attach(&mut stack, &mut root, element, line)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| Error::xml(line, e.to_string()))?
                    .into_owned();
                push_text(&mut stack, text, line)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, text, line)?;
            }
            Event::Comment(body) => {
                let text = String::from_utf8_lossy(&body).into_owned();
                match stack.last_mut() {
                    Some(top) => top.children.push(RawNode::Comment { text, line }),
                    None if root.is_none() => prolog.push((text, line)),
                    None => epilog.push((text, line)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::xml(open.line, format!("<{}> is never closed", open.tag)));
    }
    let root = root.ok_or_else(|| Error::xml(1, "document has no root element"))?;
    Ok(RawDocument {
        prolog,
        root,
        epilog,
    })
}

fn open_element(start: &BytesStart<'_>, line: usize) -> Result<RawElement> {
    let name = start.name();
    let tag = std::str::from_utf8(name.local_name().as_ref())
        .map_err(|e| Error::xml(line, e.to_string()))?
        .to_string();

    let mut attributes = Attributes::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| Error::xml(line, e.to_string()))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| Error::xml(line, e.to_string()))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| Error::xml(line, e.to_string()))?
            .into_owned();
        attributes.insert(key, value);
    }

    Ok(RawElement {
        tag,
        attributes,
        children: Vec::new(),
        line,
    })
}

fn attach(
    stack: &mut [RawElement],
    root: &mut Option<RawElement>,
    element: RawElement,
    line: usize,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(RawNode::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(Error::xml(line, "more than one root element"));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [RawElement], text: String, line: usize) -> Result<()> {
    match stack.last_mut() {
        Some(top) => {
            top.children.push(RawNode::Text(text));
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::xml(line, "text outside the root element")),
    }
}

/// Parse NXDL XML into a syntax tree and comment stream
pub fn parse(input: &str) -> Result<NxdlDocument> {
    let raw = read_raw(input)?;
    if raw.root.tag != "definition" {
        return Err(Error::xml(
            raw.root.line,
            format!("root element must be <definition>, found <{}>", raw.root.tag),
        ));
    }

    let mut builder = TreeBuilder::default();
    for (text, line) in raw.prolog {
        builder
            .comments
            .push(comment_lines(&text), anchor::ROOT, Slot::Before, line);
    }
    let root = builder.element(raw.root, ElementKind::Definition, anchor::ROOT)?;
    for (text, line) in raw.epilog {
        builder
            .comments
            .push(comment_lines(&text), anchor::DOCUMENT, Slot::End, line);
    }

    debug!(
        definition = root.name().unwrap_or_default(),
        comments = builder.comments.len(),
        "parsed NXDL XML"
    );
    Ok(NxdlDocument {
        root,
        comments: builder.comments,
    })
}

#[derive(Default)]
struct TreeBuilder {
    comments: CommentStream,
}

impl TreeBuilder {
    fn flush(&mut self, pending: &mut Vec<(String, usize)>, annotation: &str, slot: Slot) {
        for (text, line) in pending.drain(..) {
            self.comments.push(comment_lines(&text), annotation, slot, line);
        }
    }

    fn element(&mut self, raw: RawElement, kind: ElementKind, ann: &str) -> Result<NxdlElement> {
        let RawElement {
            tag,
            attributes,
            children,
            ..
        } = raw;
        let mut element = NxdlElement::new(kind);
        element.attributes = attributes;
        let mut pending = Vec::new();

        for node in children {
            let child = match node {
                RawNode::Comment { text, line } => {
                    pending.push((text, line));
                    continue;
                }
                RawNode::Text(text) => {
                    if !text.trim().is_empty() {
                        warn!(element = %tag, "ignoring stray text content");
                    }
                    continue;
                }
                RawNode::Element(child) => child,
            };

            match child.tag.as_str() {
                "doc" => {
                    let a = anchor::doc(ann);
                    if element.doc.is_some() {
                        return Err(Error::xml(child.line, format!("duplicate <doc> in <{tag}>")));
                    }
                    self.flush(&mut pending, &a, Slot::Before);
                    element.doc = Some(self.doc(child, &a)?);
                }
                "symbols" => {
                    let a = anchor::symbols(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    element.symbols = Some(self.symbols(child, &a)?);
                }
                "dimensions" => {
                    let a = anchor::dimensions(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    element.dimensions = Some(self.dimensions(child, &a)?);
                }
                "enumeration" => {
                    let a = anchor::enumeration(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    element.enumeration = Some(self.enumeration(child, &a)?);
                }
                other => {
                    let Some(child_kind) = ElementKind::from_child_tag(other) else {
                        return Err(Error::xml(
                            child.line,
                            format!("unexpected element <{other}> inside <{tag}>"),
                        ));
                    };
                    let a = anchor::child(ann, element.children.len());
                    self.flush(&mut pending, &a, Slot::Before);
                    let converted = self.element(child, child_kind, &a)?;
                    element.children.push(converted);
                }
            }
        }

        self.flush(&mut pending, ann, Slot::End);
        Ok(element)
    }

    fn doc(&mut self, raw: RawElement, ann: &str) -> Result<Doc> {
        let mut lines: Vec<String> = Vec::new();
        let mut markers: Vec<(usize, String, usize)> = Vec::new();
        let mut buffer = String::new();

        for node in raw.children {
            match node {
                RawNode::Text(text) => buffer.push_str(&text),
                RawNode::Comment { text, line } => {
                    split_text(&mut buffer, &mut lines);
                    markers.push((lines.len(), text, line));
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <doc>", child.tag),
                    ));
                }
            }
        }
        split_text(&mut buffer, &mut lines);

        let lead = lines.iter().take_while(|l| l.trim().is_empty()).count();
        lines.drain(..lead);
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        for line in &mut lines {
            *line = line.trim_end().to_string();
        }
        dedent(&mut lines);

        for (index, text, line) in markers {
            let k = index.saturating_sub(lead).min(lines.len());
            self.comments
                .push(comment_lines(&text), ann, Slot::InDoc(k), line);
        }
        Ok(Doc { lines })
    }

    fn symbols(&mut self, raw: RawElement, ann: &str) -> Result<Symbols> {
        let mut symbols = Symbols {
            attributes: raw.attributes,
            ..Symbols::default()
        };
        let mut pending = Vec::new();

        for node in raw.children {
            match node {
                RawNode::Comment { text, line } => pending.push((text, line)),
                RawNode::Text(_) => {}
                RawNode::Element(child) if child.tag == "doc" => {
                    let a = anchor::doc(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    symbols.doc = Some(self.doc(child, &a)?);
                }
                RawNode::Element(child) if child.tag == "symbol" => {
                    let a = anchor::child(ann, symbols.symbols.len());
                    self.flush(&mut pending, &a, Slot::Before);
                    symbols.symbols.push(self.symbol(child, &a)?);
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <symbols>", child.tag),
                    ));
                }
            }
        }
        self.flush(&mut pending, ann, Slot::End);
        Ok(symbols)
    }

    /// Comments inside a symbol but outside its doc move in front of the symbol.
    fn symbol(&mut self, raw: RawElement, ann: &str) -> Result<Symbol> {
        let mut symbol = Symbol {
            attributes: raw.attributes,
            doc: None,
        };
        for node in raw.children {
            match node {
                RawNode::Comment { text, line } => {
                    self.comments
                        .push(comment_lines(&text), ann, Slot::Before, line);
                }
                RawNode::Text(_) => {}
                RawNode::Element(child) if child.tag == "doc" => {
                    symbol.doc = Some(self.doc(child, &anchor::doc(ann))?);
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <symbol>", child.tag),
                    ));
                }
            }
        }
        Ok(symbol)
    }

    /// Comments that do not precede the dimensions' doc attach to the dim list.
    fn dimensions(&mut self, raw: RawElement, ann: &str) -> Result<Dimensions> {
        let mut dimensions = Dimensions {
            attributes: raw.attributes,
            ..Dimensions::default()
        };
        let mut pending = Vec::new();
        let mut loose = Vec::new();

        for node in raw.children {
            match node {
                RawNode::Comment { text, line } => pending.push((text, line)),
                RawNode::Text(_) => {}
                RawNode::Element(child) if child.tag == "doc" => {
                    let a = anchor::doc(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    dimensions.doc = Some(self.doc(child, &a)?);
                }
                RawNode::Element(child) if child.tag == "dim" => {
                    loose.append(&mut pending);
                    let index = dimensions.dims.len();
                    let mut dim = Dim {
                        attributes: child.attributes,
                        doc: None,
                    };
                    for inner in child.children {
                        match inner {
                            RawNode::Comment { text, line } => loose.push((text, line)),
                            RawNode::Text(_) => {}
                            RawNode::Element(doc) if doc.tag == "doc" => {
                                dim.doc = Some(self.doc(doc, &anchor::dim_doc(ann, index))?);
                            }
                            RawNode::Element(other) => {
                                return Err(Error::xml(
                                    other.line,
                                    format!("unexpected element <{}> inside <dim>", other.tag),
                                ));
                            }
                        }
                    }
                    dimensions.dims.push(dim);
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <dimensions>", child.tag),
                    ));
                }
            }
        }

        loose.append(&mut pending);
        if dimensions.dims.is_empty() {
            self.flush(&mut loose, ann, Slot::End);
        } else {
            self.flush(&mut loose, &anchor::dim_list(ann), Slot::Before);
        }
        Ok(dimensions)
    }

    fn enumeration(&mut self, raw: RawElement, ann: &str) -> Result<Enumeration> {
        let mut enumeration = Enumeration {
            attributes: raw.attributes,
            items: Vec::new(),
        };
        let mut pending = Vec::new();

        for node in raw.children {
            match node {
                RawNode::Comment { text, line } => pending.push((text, line)),
                RawNode::Text(_) => {}
                RawNode::Element(child) if child.tag == "item" => {
                    let a = anchor::child(ann, enumeration.items.len());
                    self.flush(&mut pending, &a, Slot::Before);
                    enumeration.items.push(self.item(child, &a)?);
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <enumeration>", child.tag),
                    ));
                }
            }
        }
        self.flush(&mut pending, ann, Slot::End);
        Ok(enumeration)
    }

    fn item(&mut self, raw: RawElement, ann: &str) -> Result<Item> {
        let mut item = Item {
            attributes: raw.attributes,
            doc: None,
        };
        let mut pending = Vec::new();
        for node in raw.children {
            match node {
                RawNode::Comment { text, line } => pending.push((text, line)),
                RawNode::Text(_) => {}
                RawNode::Element(child) if child.tag == "doc" => {
                    let a = anchor::doc(ann);
                    self.flush(&mut pending, &a, Slot::Before);
                    item.doc = Some(self.doc(child, &a)?);
                }
                RawNode::Element(child) => {
                    return Err(Error::xml(
                        child.line,
                        format!("unexpected element <{}> inside <item>", child.tag),
                    ));
                }
            }
        }
        self.flush(&mut pending, ann, Slot::End);
        Ok(item)
    }
}

/// Move buffered text into `lines`. A blank first piece is the tail of the line that
/// held the opening tag or a comment; a blank last piece is the indentation in front
/// of whatever comes next.
fn split_text(buffer: &mut String, lines: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let pieces: Vec<&str> = buffer.split('\n').collect();
    let last = pieces.len() - 1;
    for (i, piece) in pieces.iter().enumerate() {
        if (i == 0 || i == last) && piece.trim().is_empty() {
            continue;
        }
        lines.push((*piece).to_string());
    }
    buffer.clear();
}

/// Emit canonical XML
pub fn emit(document: &NxdlDocument) -> String {
    let mut writer = XmlWriter {
        out: String::from(DECLARATION),
        comments: &document.comments,
    };
    writer.comments(anchor::ROOT, Slot::Before, 0);
    writer.element(&document.root, anchor::ROOT, 0);
    writer.comments(anchor::DOCUMENT, Slot::End, 0);
    writer.out
}

struct XmlWriter<'a> {
    out: String,
    comments: &'a CommentStream,
}

impl XmlWriter<'_> {
    fn pad(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
    }

    fn comments(&mut self, annotation: &str, slot: Slot, depth: usize) {
        let stream = self.comments;
        for comment in stream.anchored(annotation, slot) {
            self.comment(&comment.lines, depth);
        }
    }

    fn comment(&mut self, lines: &[String], depth: usize) {
        self.pad(depth);
        match lines {
            [] => self.out.push_str("<!---->\n"),
            [single] => {
                self.out.push_str("<!-- ");
                self.out.push_str(single);
                self.out.push_str(" -->\n");
            }
            many => {
                self.out.push_str("<!--\n");
                for line in many {
                    if !line.is_empty() {
                        self.pad(depth);
                        self.out.push_str(line);
                    }
                    self.out.push('\n');
                }
                self.pad(depth);
                self.out.push_str("-->\n");
            }
        }
    }

    fn open(&mut self, tag: &str, attributes: &Attributes, depth: usize, empty: bool) {
        self.pad(depth);
        self.out.push('<');
        self.out.push_str(tag);
        for (key, value) in sorted_attributes(attributes) {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape(value));
            self.out.push('"');
        }
        self.out.push_str(if empty { "/>\n" } else { ">\n" });
    }

    fn close(&mut self, tag: &str, depth: usize) {
        self.pad(depth);
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push_str(">\n");
    }

    fn element(&mut self, element: &NxdlElement, ann: &str, depth: usize) {
        let tag = element.kind.tag();
        let has_content = element.doc.is_some()
            || element.symbols.is_some()
            || element.dimensions.is_some()
            || element.enumeration.is_some()
            || !element.children.is_empty()
            || self.comments.has(ann, Slot::End);
        if !has_content {
            self.open(tag, &element.attributes, depth, true);
            return;
        }

        self.open(tag, &element.attributes, depth, false);
        if let Some(doc) = &element.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.doc(doc, &a, depth + 1);
        }
        if let Some(symbols) = &element.symbols {
            let a = anchor::symbols(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.symbols(symbols, &a, depth + 1);
        }
        if let Some(dimensions) = &element.dimensions {
            let a = anchor::dimensions(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.dimensions(dimensions, &a, depth + 1);
        }
        for (i, child) in element.children.iter().enumerate() {
            let a = anchor::child(ann, i);
            self.comments(&a, Slot::Before, depth + 1);
            self.element(child, &a, depth + 1);
        }
        if let Some(enumeration) = &element.enumeration {
            let a = anchor::enumeration(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.enumeration(enumeration, &a, depth + 1);
        }
        self.comments(ann, Slot::End, depth + 1);
        self.close(tag, depth);
    }

    fn doc(&mut self, doc: &Doc, ann: &str, depth: usize) {
        let has_comments = self
            .comments
            .iter()
            .any(|c| c.locator.annotation == ann && matches!(c.locator.slot, Slot::InDoc(_)));
        if doc.lines.is_empty() && !has_comments {
            self.pad(depth);
            self.out.push_str("<doc/>\n");
            return;
        }

        self.pad(depth);
        self.out.push_str("<doc>\n");
        for k in 0..=doc.lines.len() {
            self.comments(ann, Slot::InDoc(k), depth + 1);
            if let Some(line) = doc.lines.get(k) {
                if !line.is_empty() {
                    self.pad(depth + 1);
                    self.out.push_str(&partial_escape(line.as_str()));
                }
                self.out.push('\n');
            }
        }
        self.pad(depth);
        self.out.push_str("</doc>\n");
    }

    fn symbols(&mut self, symbols: &Symbols, ann: &str, depth: usize) {
        let empty = symbols.doc.is_none()
            && symbols.symbols.is_empty()
            && !self.comments.has(ann, Slot::End);
        self.open("symbols", &symbols.attributes, depth, empty);
        if empty {
            return;
        }
        if let Some(doc) = &symbols.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.doc(doc, &a, depth + 1);
        }
        for (i, symbol) in symbols.symbols.iter().enumerate() {
            let a = anchor::child(ann, i);
            self.comments(&a, Slot::Before, depth + 1);
            match &symbol.doc {
                Some(doc) => {
                    self.open("symbol", &symbol.attributes, depth + 1, false);
                    self.doc(doc, &anchor::doc(&a), depth + 2);
                    self.close("symbol", depth + 1);
                }
                None => self.open("symbol", &symbol.attributes, depth + 1, true),
            }
        }
        self.comments(ann, Slot::End, depth + 1);
        self.close("symbols", depth);
    }

    fn dimensions(&mut self, dimensions: &Dimensions, ann: &str, depth: usize) {
        let empty = dimensions.doc.is_none()
            && dimensions.dims.is_empty()
            && !self.comments.has(ann, Slot::End);
        self.open("dimensions", &dimensions.attributes, depth, empty);
        if empty {
            return;
        }
        if let Some(doc) = &dimensions.doc {
            let a = anchor::doc(ann);
            self.comments(&a, Slot::Before, depth + 1);
            self.doc(doc, &a, depth + 1);
        }
        self.comments(&anchor::dim_list(ann), Slot::Before, depth + 1);
        for (i, dim) in dimensions.dims.iter().enumerate() {
            match &dim.doc {
                Some(doc) => {
                    self.open("dim", &dim.attributes, depth + 1, false);
                    self.doc(doc, &anchor::dim_doc(ann, i), depth + 2);
                    self.close("dim", depth + 1);
                }
                None => self.open("dim", &dim.attributes, depth + 1, true),
            }
        }
        self.comments(ann, Slot::End, depth + 1);
        self.close("dimensions", depth);
    }

    fn enumeration(&mut self, enumeration: &Enumeration, ann: &str, depth: usize) {
        let empty = enumeration.items.is_empty() && !self.comments.has(ann, Slot::End);
        self.open("enumeration", &enumeration.attributes, depth, empty);
        if empty {
            return;
        }
        for (i, item) in enumeration.items.iter().enumerate() {
            let a = anchor::child(ann, i);
            self.comments(&a, Slot::Before, depth + 1);
            let has_content = item.doc.is_some() || self.comments.has(&a, Slot::End);
            if !has_content {
                self.open("item", &item.attributes, depth + 1, true);
                continue;
            }
            self.open("item", &item.attributes, depth + 1, false);
            if let Some(doc) = &item.doc {
                let d = anchor::doc(&a);
                self.comments(&d, Slot::Before, depth + 2);
                self.doc(doc, &d, depth + 2);
            }
            self.comments(&a, Slot::End, depth + 2);
            self.close("item", depth + 1);
        }
        self.comments(ann, Slot::End, depth + 1);
        self.close("enumeration", depth);
    }
}
