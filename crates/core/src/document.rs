//! Structured document tree.
//!
//! Documents are block/inline trees in the JSON shape used by rich-text
//! editors (`{"type": "paragraph", "content": [...]}`). The canonical byte
//! encoding of a *normalized* tree is what gets stored, hashed and diffed, so
//! two texts that differ only in formatting hash identically once parsed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::TransformError;

/// Node kinds of the document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Doc,
    Paragraph,
    Heading,
    BulletList,
    OrderedList,
    ListItem,
    CodeBlock,
    Blockquote,
    HorizontalRule,
    Image,
    HardBreak,
    Text,
}

impl NodeKind {
    /// Inline nodes live inside paragraphs and headings.
    pub fn is_inline(self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::HardBreak)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::BulletList => "bulletList",
            Self::OrderedList => "orderedList",
            Self::ListItem => "listItem",
            Self::CodeBlock => "codeBlock",
            Self::Blockquote => "blockquote",
            Self::HorizontalRule => "horizontalRule",
            Self::Image => "image",
            Self::HardBreak => "hardBreak",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inline formatting applied to text runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    Link { href: String },
    Bold,
    Italic,
    Strike,
    Code,
}

/// A node of the structured document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

/// A whole document is just its root node.
pub type Document = Node;

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
            content: Vec::new(),
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn doc(content: Vec<Node>) -> Self {
        Self::new(NodeKind::Doc).with_content(content)
    }

    pub fn paragraph(content: Vec<Node>) -> Self {
        Self::new(NodeKind::Paragraph).with_content(content)
    }

    pub fn heading(level: u8, content: Vec<Node>) -> Self {
        Self::new(NodeKind::Heading)
            .with_attr("level", Value::from(level))
            .with_content(content)
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::Text);
        node.text = Some(text.into());
        node
    }

    pub fn marked_text(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        let mut node = Self::text(text);
        node.marks = marks;
        node
    }

    pub fn bullet_list(items: Vec<Node>) -> Self {
        Self::new(NodeKind::BulletList).with_content(items)
    }

    pub fn ordered_list(start: u64, items: Vec<Node>) -> Self {
        Self::new(NodeKind::OrderedList)
            .with_attr("start", Value::from(start))
            .with_content(items)
    }

    pub fn list_item(content: Vec<Node>) -> Self {
        Self::new(NodeKind::ListItem).with_content(content)
    }

    pub fn code_block(language: Option<&str>, code: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::CodeBlock);
        if let Some(lang) = language.filter(|l| !l.is_empty()) {
            node.attrs.insert("language".into(), Value::from(lang));
        }
        let code = code.into();
        if !code.is_empty() {
            node.content.push(Self::text(code));
        }
        node
    }

    pub fn blockquote(content: Vec<Node>) -> Self {
        Self::new(NodeKind::Blockquote).with_content(content)
    }

    pub fn image(src: impl Into<String>, alt: impl Into<String>) -> Self {
        Self::new(NodeKind::Image)
            .with_attr("src", Value::from(src.into()))
            .with_attr("alt", Value::from(alt.into()))
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn with_content(mut self, content: Vec<Node>) -> Self {
        self.content = content;
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attrs.get(key).and_then(Value::as_u64)
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.content {
            child.collect_text(out);
        }
    }

    /// Same kind and attributes (children and text may differ).
    pub fn same_shape(&self, other: &Node) -> bool {
        self.kind == other.kind && self.attrs == other.attrs && self.marks == other.marks
    }
}

/// Return a normalized copy of `node`.
///
/// Normalization sorts and de-duplicates marks, drops empty text runs and
/// empty paragraphs, and merges adjacent text runs carrying the same marks.
/// Line breaks inside text become `hardBreak` nodes (spaces in headings),
/// trailing hard breaks of a text block are dropped, and whitespace at the
/// edges of a marked run is moved out of its marks.
pub fn normalize(node: &Node) -> Node {
    let mut out = node.clone();
    normalize_in_place(&mut out);
    out
}

fn normalize_in_place(node: &mut Node) {
    node.marks.sort();
    node.marks.dedup();
    if node.kind != NodeKind::Text {
        node.text = None;
        node.marks.clear();
    }

    let single_line = node.kind == NodeKind::Heading;
    let children = std::mem::take(&mut node.content);
    let mut flat: Vec<Node> = Vec::with_capacity(children.len());
    for mut child in children {
        normalize_in_place(&mut child);
        match child.kind {
            NodeKind::Paragraph if child.content.is_empty() => {}
            NodeKind::Text if node.kind != NodeKind::CodeBlock => {
                split_run(&child, single_line, &mut flat);
            }
            NodeKind::HardBreak if single_line => flat.push(Node::text(" ")),
            _ => flat.push(child),
        }
    }
    if matches!(node.kind, NodeKind::Paragraph | NodeKind::Heading) {
        while flat.last().is_some_and(|n| n.kind == NodeKind::HardBreak) {
            flat.pop();
        }
    }

    let mut merged: Vec<Node> = Vec::with_capacity(flat.len());
    for mut child in flat {
        if child.kind == NodeKind::Text {
            if child.text.as_deref().unwrap_or_default().is_empty() {
                continue;
            }
            if let Some(prev) = merged.last_mut() {
                if prev.kind == NodeKind::Text && prev.marks == child.marks {
                    let tail = child.text.take().unwrap_or_default();
                    prev.text.get_or_insert_with(String::new).push_str(&tail);
                    continue;
                }
            }
        }
        merged.push(child);
    }
    node.content = merged;
}

/// Split an inline text run at line breaks, un-marking edge whitespace
/// (code keeps its own).
fn split_run(run: &Node, single_line: bool, out: &mut Vec<Node>) {
    let text = run
        .text
        .as_deref()
        .unwrap_or_default()
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    for (idx, line) in text.split('\n').enumerate() {
        if idx > 0 {
            out.push(if single_line {
                Node::text(" ")
            } else {
                Node::new(NodeKind::HardBreak)
            });
        }
        if run.marks.is_empty() || run.marks.contains(&Mark::Code) {
            out.push(Node::marked_text(line, run.marks.clone()));
            continue;
        }
        let start = line.len() - line.trim_start().len();
        let end = start + line[start..].trim_end().len();
        out.push(Node::text(&line[..start]));
        out.push(Node::marked_text(&line[start..end], run.marks.clone()));
        out.push(Node::text(&line[end..]));
    }
}

/// Encode a document as its canonical structured buffer.
pub fn encode(doc: &Document) -> Vec<u8> {
    // Attribute maps are BTreeMaps, so key order is already deterministic.
    serde_json::to_vec(&normalize(doc)).unwrap_or_default()
}

/// Decode a structured buffer produced by [`encode`].
pub fn decode(buffer: &[u8]) -> Result<Document, TransformError> {
    let doc: Document =
        serde_json::from_slice(buffer).map_err(|e| TransformError::InvalidBuffer(e.to_string()))?;
    if doc.kind != NodeKind::Doc {
        return Err(TransformError::InvalidBuffer(format!(
            "root node must be 'doc', found '{}'",
            doc.kind
        )));
    }
    Ok(doc)
}

/// SHA-256 hex digest of a structured buffer.
pub fn hash_buffer(buffer: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(buffer);
    hex::encode(hasher.finalize())
}

/// Content hash of a document: the digest of its canonical buffer.
pub fn content_hash(doc: &Document) -> String {
    hash_buffer(&encode(doc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Node::doc(vec![
            Node::heading(1, vec![Node::text("Title")]),
            Node::paragraph(vec![
                Node::text("Hello "),
                Node::marked_text("world", vec![Mark::Bold]),
            ]),
        ])
    }

    #[test]
    fn test_normalize_merges_adjacent_runs() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("Hel"),
            Node::text("lo"),
            Node::text(""),
            Node::marked_text("a", vec![Mark::Italic, Mark::Bold, Mark::Bold]),
            Node::marked_text("b", vec![Mark::Bold, Mark::Italic]),
        ])]);
        let normalized = normalize(&doc);
        let para = &normalized.content[0];
        assert_eq!(para.content.len(), 2);
        assert_eq!(para.content[0].text.as_deref(), Some("Hello"));
        assert_eq!(para.content[1].text.as_deref(), Some("ab"));
        assert_eq!(para.content[1].marks, vec![Mark::Bold, Mark::Italic]);
    }

    #[test]
    fn test_normalize_line_breaks_and_edge_whitespace() {
        let doc = Node::doc(vec![
            Node::paragraph(vec![
                Node::marked_text(" bold\nnext ", vec![Mark::Bold]),
                Node::new(NodeKind::HardBreak),
            ]),
            Node::paragraph(vec![]),
            Node::heading(2, vec![Node::text("one\ntwo")]),
        ]);
        let normalized = normalize(&doc);
        assert_eq!(normalized.content.len(), 2);

        let para = &normalized.content[0];
        let kinds: Vec<NodeKind> = para.content.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Text,
                NodeKind::Text,
                NodeKind::HardBreak,
                NodeKind::Text,
                NodeKind::Text,
            ]
        );
        assert_eq!(para.content[0].text.as_deref(), Some(" "));
        assert!(para.content[0].marks.is_empty());
        assert_eq!(para.content[1].text.as_deref(), Some("bold"));
        assert_eq!(para.content[3].text.as_deref(), Some("next"));
        assert_eq!(para.content[3].marks, vec![Mark::Bold]);
        assert_eq!(para.content[4].text.as_deref(), Some(" "));

        assert_eq!(normalized.content[1].text_content(), "one two");
        assert_eq!(normalize(&normalized), normalized);
    }

    #[test]
    fn test_code_block_keeps_newlines() {
        let doc = Node::doc(vec![Node::code_block(None, "a\n  b\n")]);
        assert_eq!(normalize(&doc).content[0].text_content(), "a\n  b\n");
    }

    #[test]
    fn test_hash_ignores_run_splitting() {
        let split = Node::doc(vec![
            Node::heading(1, vec![Node::text("Ti"), Node::text("tle")]),
            Node::paragraph(vec![
                Node::text("Hello "),
                Node::marked_text("wor", vec![Mark::Bold]),
                Node::marked_text("ld", vec![Mark::Bold]),
            ]),
        ]);
        assert_eq!(content_hash(&split), content_hash(&sample()));
    }

    #[test]
    fn test_hash_detects_content_change() {
        let mut changed = sample();
        changed.content[1].content[0].text = Some("Goodbye ".into());
        assert_ne!(content_hash(&changed), content_hash(&sample()));
    }

    #[test]
    fn test_encode_decode() {
        let doc = sample();
        let decoded = decode(&encode(&doc)).unwrap();
        assert_eq!(decoded, normalize(&doc));
    }

    #[test]
    fn test_decode_rejects_non_doc_root() {
        let buffer = serde_json::to_vec(&Node::paragraph(vec![])).unwrap();
        assert!(matches!(decode(&buffer), Err(TransformError::InvalidBuffer(_))));
        assert!(decode(b"not json").is_err());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(Node::marked_text(
            "x",
            vec![Mark::Link {
                href: "https://example.com".into(),
            }],
        ))
        .unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["marks"][0]["type"], "link");
        assert_eq!(json["marks"][0]["href"], "https://example.com");
    }
}
