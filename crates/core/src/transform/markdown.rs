//! Markdown ⇄ document tree conversion.
//!
//! Parsing walks the `comrak` AST; rendering is a small hand-written
//! serializer that emits text the parser reads back into the same tree.

use comrak::nodes::{AstNode, ListType, NodeValue, Sourcepos};
use comrak::{parse_document, Arena, Options};

use super::frontmatter;
use crate::document::{encode, normalize, Document, Mark, Node, NodeKind};
use crate::errors::{Location, TransformError};
use crate::models::ContentMetadata;

/// Per-format switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Read and write the `canonicalLink` frontmatter key.
    pub canonical_link: bool,
    /// Escape `{` and `}` (MDX treats them as expressions).
    pub escape_braces: bool,
}

impl Dialect {
    pub const GITHUB: Dialect = Dialect {
        canonical_link: true,
        escape_braces: false,
    };
    pub const DOCUSAURUS: Dialect = Dialect {
        canonical_link: false,
        escape_braces: true,
    };
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a markdown file (with optional frontmatter) into a normalized
/// document and its metadata.
pub fn parse(text: &str, dialect: Dialect) -> Result<(Document, ContentMetadata), TransformError> {
    let split = frontmatter::split(text)?;
    let metadata = match split.yaml {
        Some(yaml) => frontmatter::parse(yaml, dialect.canonical_link)?,
        None => ContentMetadata::default(),
    };

    let mut options = Options::default();
    options.extension.strikethrough = true;
    // Tables are parsed only so they can be rejected with a location.
    options.extension.table = true;

    let arena = Arena::new();
    let root = parse_document(&arena, split.body, &options);
    let reader = Reader {
        lines: split.body.lines().collect(),
        line_offset: split.body_line_offset,
    };
    let content = reader.blocks(root)?;
    Ok((normalize(&Node::doc(content)), metadata))
}

struct Reader<'s> {
    lines: Vec<&'s str>,
    line_offset: usize,
}

impl Reader<'_> {
    fn blocks<'a>(&self, parent: &'a AstNode<'a>) -> Result<Vec<Node>, TransformError> {
        parent.children().map(|child| self.block(child)).collect()
    }

    fn block<'a>(&self, node: &'a AstNode<'a>) -> Result<Node, TransformError> {
        let ast = node.data.borrow();
        match &ast.value {
            NodeValue::Paragraph => Ok(Node::paragraph(self.inlines(node)?)),
            NodeValue::Heading(heading) => Ok(Node::heading(heading.level, self.inlines(node)?)),
            NodeValue::BlockQuote => Ok(Node::blockquote(self.blocks(node)?)),
            NodeValue::List(list) => {
                let items = self.blocks(node)?;
                Ok(match list.list_type {
                    ListType::Bullet => Node::bullet_list(items),
                    ListType::Ordered => Node::ordered_list(list.start as u64, items),
                })
            }
            NodeValue::Item(_) => Ok(Node::list_item(self.blocks(node)?)),
            NodeValue::CodeBlock(block) => {
                let language = block.info.split_whitespace().next();
                let literal = block.literal.to_string();
                let code = literal.strip_suffix('\n').unwrap_or(&literal);
                Ok(Node::code_block(language, code))
            }
            NodeValue::ThematicBreak => Ok(Node::new(NodeKind::HorizontalRule)),
            NodeValue::HtmlBlock(_) => Err(self.unsupported("HTML block", &ast.sourcepos)),
            NodeValue::Table(_) => Err(self.unsupported("table", &ast.sourcepos)),
            _ => Err(self.unsupported("block construct", &ast.sourcepos)),
        }
    }

    fn inlines<'a>(&self, parent: &'a AstNode<'a>) -> Result<Vec<Node>, TransformError> {
        let mut out = Vec::new();
        self.collect_inlines(parent, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn collect_inlines<'a>(
        &self,
        parent: &'a AstNode<'a>,
        marks: &mut Vec<Mark>,
        out: &mut Vec<Node>,
    ) -> Result<(), TransformError> {
        for child in parent.children() {
            let ast = child.data.borrow();
            let mark = match &ast.value {
                NodeValue::Text(text) => {
                    out.push(Node::marked_text(text.to_string(), marks.clone()));
                    continue;
                }
                // Soft wraps are layout, not content.
                NodeValue::SoftBreak => {
                    out.push(Node::marked_text(" ", marks.clone()));
                    continue;
                }
                NodeValue::LineBreak => {
                    out.push(Node::new(NodeKind::HardBreak));
                    continue;
                }
                NodeValue::Code(code) => {
                    let mut code_marks = marks.clone();
                    code_marks.push(Mark::Code);
                    out.push(Node::marked_text(code.literal.to_string(), code_marks));
                    continue;
                }
                NodeValue::Image(link) => {
                    out.push(Node::image(link.url.to_string(), plain_text(child)));
                    continue;
                }
                NodeValue::Emph => Mark::Italic,
                NodeValue::Strong => Mark::Bold,
                NodeValue::Strikethrough => Mark::Strike,
                NodeValue::Link(link) => Mark::Link {
                    href: link.url.to_string(),
                },
                NodeValue::HtmlInline(_) => {
                    return Err(self.unsupported("inline HTML", &ast.sourcepos))
                }
                _ => return Err(self.unsupported("inline construct", &ast.sourcepos)),
            };
            marks.push(mark);
            self.collect_inlines(child, marks, out)?;
            marks.pop();
        }
        Ok(())
    }

    fn unsupported(&self, construct: &str, pos: &Sourcepos) -> TransformError {
        let fragment = pos
            .start
            .line
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(|line| line.trim().to_string())
            .unwrap_or_default();
        TransformError::Unsupported {
            construct: construct.to_string(),
            fragment,
            location: Some(Location {
                line: pos.start.line + self.line_offset,
                column: pos.start.column,
            }),
        }
    }
}

fn plain_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut out = String::new();
    for child in node.children() {
        match &child.data.borrow().value {
            NodeValue::Text(text) => out.push_str(text),
            NodeValue::Code(code) => out.push_str(&code.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => out.push(' '),
            _ => out.push_str(&plain_text(child)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a document and its metadata as a markdown file.
///
/// The output is read back before it is returned; a document whose text
/// would parse into a different tree is rejected instead of written.
pub fn render(
    doc: &Document,
    metadata: &ContentMetadata,
    dialect: Dialect,
) -> Result<String, TransformError> {
    let doc = normalize(doc);
    let mut out = frontmatter::render(metadata, dialect.canonical_link);
    let body = Writer { dialect }.blocks(&doc.content);
    if !body.is_empty() {
        out.push_str(&body);
        out.push('\n');
    }

    let (reread, _) = parse(&out, dialect)?;
    if encode(&reread) != encode(&doc) {
        let index = doc
            .content
            .iter()
            .zip(reread.content.iter().map(Some).chain(std::iter::repeat(None)))
            .position(|(a, b)| b != Some(a))
            .unwrap_or(doc.content.len());
        let kind = doc
            .content
            .get(index)
            .map_or("end of document", |n| n.kind.as_str());
        return Err(TransformError::Unrepresentable(format!(
            "block {} ({kind}) reads back differently",
            index + 1
        )));
    }
    Ok(out)
}

struct Writer {
    dialect: Dialect,
}

impl Writer {
    fn blocks(&self, blocks: &[Node]) -> String {
        let mut parts = Vec::with_capacity(blocks.len());
        let mut alternate = false;
        for (idx, block) in blocks.iter().enumerate() {
            // Two adjacent lists with the same marker would merge on re-parse.
            let follows_same_list = idx > 0
                && blocks[idx - 1].kind == block.kind
                && matches!(block.kind, NodeKind::BulletList | NodeKind::OrderedList);
            alternate = follows_same_list && !alternate;
            parts.push(self.block(block, alternate));
        }
        parts.join("\n\n")
    }

    fn block(&self, node: &Node, alternate: bool) -> String {
        match node.kind {
            NodeKind::Paragraph => escape_lines(&self.inlines(&node.content)),
            NodeKind::Heading => {
                let level = node.attr_u64("level").unwrap_or(1).clamp(1, 6) as usize;
                format!("{} {}", "#".repeat(level), escape_lines(&self.inlines(&node.content)))
            }
            NodeKind::Blockquote => prefix_lines(&self.blocks(&node.content), "> ", ">"),
            NodeKind::BulletList => {
                let marker = if alternate { "* " } else { "- " };
                node.content
                    .iter()
                    .map(|item| self.list_item(item, marker))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            NodeKind::OrderedList => {
                let start = node.attr_u64("start").unwrap_or(1);
                let delimiter = if alternate { ')' } else { '.' };
                node.content
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let marker = format!("{}{} ", start + i as u64, delimiter);
                        self.list_item(item, &marker)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            NodeKind::CodeBlock => {
                let code = node.text_content();
                let fence = "`".repeat((longest_run(&code, '`') + 1).max(3));
                let language = node.attr_str("language").unwrap_or_default();
                if code.is_empty() {
                    format!("{fence}{language}\n{fence}")
                } else {
                    format!("{fence}{language}\n{code}\n{fence}")
                }
            }
            NodeKind::HorizontalRule => "***".to_string(),
            NodeKind::Doc | NodeKind::ListItem => self.blocks(&node.content),
            NodeKind::Text | NodeKind::Image | NodeKind::HardBreak => {
                escape_lines(&self.inlines(std::slice::from_ref(node)))
            }
        }
    }

    fn list_item(&self, item: &Node, marker: &str) -> String {
        let body = match item.kind {
            NodeKind::ListItem => self.blocks(&item.content),
            _ => self.block(item, false),
        };
        if body.is_empty() {
            return marker.trim_end().to_string();
        }
        let indent = " ".repeat(marker.len());
        let mut out = String::new();
        for (idx, line) in body.split('\n').enumerate() {
            if idx == 0 {
                out.push_str(marker);
            } else {
                out.push('\n');
                if !line.is_empty() {
                    out.push_str(&indent);
                }
            }
            out.push_str(line);
        }
        out
    }

    fn inlines(&self, nodes: &[Node]) -> String {
        let mut segs: Vec<Seg> = Vec::new();
        let mut open: Vec<Mark> = Vec::new();
        for node in nodes {
            match node.kind {
                NodeKind::Text => {
                    let text = node.text.as_deref().unwrap_or_default();
                    let mut marks: Vec<Mark> = node
                        .marks
                        .iter()
                        .filter(|m| **m != Mark::Code)
                        .cloned()
                        .collect();
                    marks.sort();
                    let keep = open
                        .iter()
                        .zip(&marks)
                        .take_while(|(a, b)| a == b)
                        .count();
                    close_marks(&mut segs, &mut open, keep);
                    for mark in &marks[keep..] {
                        segs.push(open_delimiter(mark));
                        open.push(mark.clone());
                    }
                    if node.marks.contains(&Mark::Code) {
                        segs.push(Seg::Text(code_span(text)));
                    } else {
                        segs.push(Seg::Text(self.escape(text)));
                    }
                }
                NodeKind::Image => {
                    close_marks(&mut segs, &mut open, 0);
                    let alt = node.attr_str("alt").unwrap_or_default();
                    let src = node.attr_str("src").unwrap_or_default();
                    segs.push(Seg::Text(format!(
                        "![{}]({})",
                        self.escape(alt),
                        destination(src)
                    )));
                }
                NodeKind::HardBreak => {
                    close_marks(&mut segs, &mut open, 0);
                    segs.push(Seg::Text("\\\n".to_string()));
                }
                _ => {
                    close_marks(&mut segs, &mut open, 0);
                    segs.push(Seg::Text(self.blocks(std::slice::from_ref(node))));
                }
            }
        }
        close_marks(&mut segs, &mut open, 0);
        join_segments(segs)
    }

    fn escape(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            let special = matches!(
                c,
                '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '#' | '~' | '|' | '&' | '!'
            ) || (self.dialect.escape_braces && matches!(c, '{' | '}'));
            if special {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

/// A piece of rendered inline markdown.
enum Seg {
    Text(String),
    /// An emphasis delimiter (`*`, `**` or `~~`).
    Delim { run: &'static str, closing: bool },
}

impl Seg {
    fn first_char(&self) -> Option<char> {
        match self {
            Seg::Text(text) => text.chars().next(),
            Seg::Delim { run, .. } => run.chars().next(),
        }
    }

    fn last_char(&self) -> Option<char> {
        match self {
            Seg::Text(text) => text.chars().next_back(),
            Seg::Delim { run, .. } => run.chars().next_back(),
        }
    }
}

fn open_delimiter(mark: &Mark) -> Seg {
    match mark {
        Mark::Link { .. } => Seg::Text("[".to_string()),
        Mark::Bold => Seg::Delim { run: "**", closing: false },
        Mark::Italic => Seg::Delim { run: "*", closing: false },
        Mark::Strike => Seg::Delim { run: "~~", closing: false },
        Mark::Code => Seg::Text(String::new()),
    }
}

fn close_delimiter(mark: &Mark) -> Seg {
    match mark {
        Mark::Link { href } => Seg::Text(format!("]({})", destination(href))),
        Mark::Bold => Seg::Delim { run: "**", closing: true },
        Mark::Italic => Seg::Delim { run: "*", closing: true },
        Mark::Strike => Seg::Delim { run: "~~", closing: true },
        Mark::Code => Seg::Text(String::new()),
    }
}

/// Close every open mark above `keep`.
fn close_marks(segs: &mut Vec<Seg>, open: &mut Vec<Mark>, keep: usize) {
    while open.len() > keep {
        if let Some(mark) = open.pop() {
            segs.push(close_delimiter(&mark));
        }
    }
}

/// Unicode punctuation or symbol, as far as delimiter flanking is concerned.
fn is_punct(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace()
}

fn left_flanking(prev: Option<char>, next: Option<char>) -> bool {
    let Some(next) = next.filter(|c| !c.is_whitespace()) else {
        return false;
    };
    !is_punct(next) || prev.map_or(true, |c| c.is_whitespace() || is_punct(c))
}

fn right_flanking(prev: Option<char>, next: Option<char>) -> bool {
    let Some(prev) = prev.filter(|c| !c.is_whitespace()) else {
        return false;
    };
    !is_punct(prev) || next.map_or(true, |c| c.is_whitespace() || is_punct(c))
}

fn numeric_entity(c: char) -> String {
    format!("&#{};", c as u32)
}

/// Concatenate segments, writing the letter next to a delimiter run as a
/// numeric entity where the run would otherwise not open or close.
///
/// A closing run between punctuation and a letter (`**Note.**Read`) or an
/// opening run between a letter and punctuation (`a**(b)**`) does not flank;
/// an entity reads back as the same character but counts as punctuation.
fn join_segments(segs: Vec<Seg>) -> String {
    let mut encode_first = vec![false; segs.len()];
    let mut encode_last = vec![false; segs.len()];
    let mut start = 0;
    while start < segs.len() {
        let Some(kind) = delim_char(&segs[start]) else {
            start += 1;
            continue;
        };
        let mut end = start;
        let (mut opens, mut closes) = (false, false);
        while end < segs.len() && delim_char(&segs[end]) == Some(kind) {
            if let Seg::Delim { closing, .. } = &segs[end] {
                closes |= *closing;
                opens |= !*closing;
            }
            end += 1;
        }

        let prev_idx = start.checked_sub(1);
        let prev = prev_idx.and_then(|i| {
            if encode_last[i] {
                Some(';')
            } else {
                segs[i].last_char()
            }
        });
        let next = segs.get(end).and_then(|seg| {
            if encode_first[end] {
                Some('&')
            } else {
                seg.first_char()
            }
        });

        if closes && !right_flanking(prev, next) && next.is_some_and(|c| c.is_alphanumeric()) {
            encode_first[end] = true;
        }
        let next = if encode_first.get(end).copied().unwrap_or(false) {
            Some('&')
        } else {
            next
        };
        if opens && !left_flanking(prev, next) && prev.is_some_and(|c| c.is_alphanumeric()) {
            if let Some(i) = prev_idx {
                encode_last[i] = true;
            }
        }
        start = end;
    }

    let mut out = String::new();
    for (idx, seg) in segs.into_iter().enumerate() {
        match seg {
            Seg::Delim { run, .. } => out.push_str(run),
            Seg::Text(mut text) => {
                if encode_last[idx] {
                    if let Some(c) = text.pop() {
                        text.push_str(&numeric_entity(c));
                    }
                }
                if encode_first[idx] {
                    if let Some(c) = text.chars().next() {
                        text.replace_range(..c.len_utf8(), &numeric_entity(c));
                    }
                }
                out.push_str(&text);
            }
        }
    }
    out
}

fn delim_char(seg: &Seg) -> Option<char> {
    match seg {
        Seg::Delim { run, .. } => run.chars().next(),
        Seg::Text(_) => None,
    }
}

fn code_span(code: &str) -> String {
    let fence = "`".repeat(longest_run(code, '`') + 1);
    let pad = code.starts_with('`')
        || code.ends_with('`')
        || (code.starts_with(' ') && code.ends_with(' ') && !code.trim().is_empty());
    if pad {
        format!("{fence} {code} {fence}")
    } else {
        format!("{fence}{code}{fence}")
    }
}

fn destination(url: &str) -> String {
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return format!("<{}>", url.replace('<', "\\<").replace('>', "\\>"));
    }
    let mut out = String::with_capacity(url.len());
    for c in url.chars() {
        if matches!(c, '(' | ')' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn longest_run(text: &str, needle: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == needle {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Protect the start and end of every line of an inline block.
///
/// Lines are separated by hard breaks (`\` + newline). Whitespace at either
/// edge of a line is stripped by the parser, so the outermost whitespace
/// character is written as an entity; a line that would start a list item,
/// a setext underline or a heading is escaped.
fn escape_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let (body, brk) = match line.strip_suffix('\\') {
                Some(body) if idx < last => (body, "\\"),
                _ => (*line, ""),
            };
            format!("{}{brk}", protect_line(body))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn protect_line(line: &str) -> String {
    let mut out = line.to_string();
    if let Some(c) = out.chars().next_back().filter(|c| c.is_whitespace()) {
        out.truncate(out.len() - c.len_utf8());
        out.push_str(&numeric_entity(c));
    }
    match out.chars().next().filter(|c| c.is_whitespace()) {
        Some(c) => {
            out.replace_range(..c.len_utf8(), &numeric_entity(c));
            out
        }
        None => escape_block_start(&out),
    }
}

/// Escape text that would otherwise open a list item or underline a heading.
fn escape_block_start(line: &str) -> String {
    if line.starts_with(['-', '+', '=']) {
        return format!("\\{line}");
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && matches!(line[digits..].chars().next(), Some('.') | Some(')')) {
        return format!("{}\\{}", &line[..digits], &line[digits..]);
    }
    line.to_string()
}

fn prefix_lines(text: &str, prefix: &str, empty_prefix: &str) -> String {
    if text.is_empty() {
        return empty_prefix.to_string();
    }
    text.split('\n')
        .map(|line| {
            if line.is_empty() {
                empty_prefix.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::content_hash;

    const SAMPLE: &str = r#"---
title: Sync guide
tags:
  - git
canonicalLink: https://example.com/sync
---
# Sync *guide*

Intro with **bold**, `code`, ~~gone~~ and a [link](https://example.com/a_b).
Second line of the same paragraph.

- one
- two with ***both***
  - nested

3. three
4. four

> quoted
>
> twice

```rust
fn main() {}
```

***

![logo](img/logo.png)
"#;

    fn gh(text: &str) -> (Document, ContentMetadata) {
        parse(text, Dialect::GITHUB).unwrap()
    }

    #[test]
    fn test_parse_structure() {
        let (doc, meta) = gh(SAMPLE);
        assert_eq!(meta.title, "Sync guide");
        assert_eq!(meta.tags, vec!["git"]);
        let kinds: Vec<NodeKind> = doc.content.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Heading,
                NodeKind::Paragraph,
                NodeKind::BulletList,
                NodeKind::OrderedList,
                NodeKind::Blockquote,
                NodeKind::CodeBlock,
                NodeKind::HorizontalRule,
                NodeKind::Paragraph,
            ]
        );
        assert_eq!(doc.content[3].attr_u64("start"), Some(3));
        assert_eq!(doc.content[5].attr_str("language"), Some("rust"));
        assert_eq!(doc.content[5].text_content(), "fn main() {}");
        assert_eq!(doc.content[7].content[0].kind, NodeKind::Image);
    }

    #[test]
    fn test_parse_marks() {
        let (doc, _) = gh("a **b *c*** [d](https://x.io)\n");
        let para = &doc.content[0];
        let c = para
            .content
            .iter()
            .find(|n| n.text.as_deref() == Some("c"))
            .unwrap();
        assert_eq!(c.marks, vec![Mark::Bold, Mark::Italic]);
        let d = para.content.last().unwrap();
        assert_eq!(
            d.marks,
            vec![Mark::Link {
                href: "https://x.io".into()
            }]
        );
    }

    #[test]
    fn test_soft_wrap_does_not_change_hash() {
        let (wrapped, _) = gh("alpha\nbeta\n");
        let (single, _) = gh("alpha beta\n");
        assert_eq!(content_hash(&wrapped), content_hash(&single));
    }

    #[test]
    fn test_html_is_unsupported_with_location() {
        let text = "---\ntitle: x\n---\n# Head\n\n<div>raw</div>\n";
        match parse(text, Dialect::GITHUB) {
            Err(TransformError::Unsupported {
                fragment, location, ..
            }) => {
                assert_eq!(fragment, "<div>raw</div>");
                assert_eq!(location.map(|l| l.line), Some(6));
            }
            other => panic!("expected unsupported error, got {other:?}"),
        }
    }

    #[test]
    fn test_table_is_unsupported() {
        let text = "| a | b |\n|---|---|\n| 1 | 2 |\n";
        assert!(matches!(
            parse(text, Dialect::GITHUB),
            Err(TransformError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_render_round_trip() {
        let (doc, meta) = gh(SAMPLE);
        let text = render(&doc, &meta, Dialect::GITHUB).unwrap();
        let (again, meta_again) = gh(&text);
        assert_eq!(again, doc, "rendered:\n{text}");
        assert_eq!(meta_again, meta);
    }

    #[test]
    fn test_render_escapes_markdown_syntax() {
        let doc = Node::doc(vec![
            Node::paragraph(vec![Node::text("1. not a list *or* _emphasis_ <b> #tag")]),
            Node::paragraph(vec![Node::text("- not a bullet")]),
        ]);
        let text = render(&doc, &ContentMetadata::default(), Dialect::GITHUB).unwrap();
        let (again, _) = gh(&text);
        assert_eq!(again, normalize(&doc));
    }

    #[test]
    fn test_render_code_with_backticks() {
        let doc = Node::doc(vec![
            Node::code_block(None, "```\ninner\n```"),
            Node::paragraph(vec![Node::marked_text("a`b", vec![Mark::Code])]),
        ]);
        let text = render(&doc, &ContentMetadata::default(), Dialect::GITHUB).unwrap();
        assert!(text.starts_with("````\n"));
        let (again, _) = gh(&text);
        assert_eq!(again, normalize(&doc));
    }

    #[test]
    fn test_marked_whitespace_moves_outside_delimiters() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::marked_text("bold ", vec![Mark::Bold]),
            Node::text("plain"),
        ])]);
        let text = render(&doc, &ContentMetadata::default(), Dialect::GITHUB).unwrap();
        assert_eq!(text, "**bold** plain\n");
    }

    #[test]
    fn test_adjacent_lists_stay_separate() {
        let doc = Node::doc(vec![
            Node::bullet_list(vec![Node::list_item(vec![Node::paragraph(vec![
                Node::text("a"),
            ])])]),
            Node::bullet_list(vec![Node::list_item(vec![Node::paragraph(vec![
                Node::text("b"),
            ])])]),
        ]);
        let text = render(&doc, &ContentMetadata::default(), Dialect::GITHUB).unwrap();
        let (again, _) = gh(&text);
        assert_eq!(again.content.len(), 2);
    }

    #[test]
    fn test_docusaurus_escapes_braces_and_drops_canonical_link() {
        let doc = Node::doc(vec![Node::paragraph(vec![Node::text("{props}")])]);
        let meta = ContentMetadata {
            title: "T".into(),
            canonical_link: Some("https://example.com".into()),
            ..Default::default()
        };
        let text = render(&doc, &meta, Dialect::DOCUSAURUS).unwrap();
        assert!(text.contains("\\{props\\}"));
        assert!(!text.contains("canonicalLink"));
    }

    fn rendered(content: Vec<Node>) -> (String, Document) {
        let doc = Node::doc(vec![Node::paragraph(content)]);
        let text = render(&doc, &ContentMetadata::default(), Dialect::GITHUB).unwrap();
        let (again, _) = gh(&text);
        assert_eq!(again, normalize(&doc), "rendered:\n{text}");
        (text, again)
    }

    #[test]
    fn test_bold_ending_in_punctuation_before_a_word() {
        let (text, again) = rendered(vec![
            Node::marked_text("Note.", vec![Mark::Bold]),
            Node::text("Read this"),
        ]);
        assert_eq!(text, "**Note.**&#82;ead this\n");
        assert_eq!(again.content[0].content[0].marks, vec![Mark::Bold]);
    }

    #[test]
    fn test_bold_starting_with_punctuation_after_a_word() {
        let (text, _) = rendered(vec![
            Node::text("a"),
            Node::marked_text("(b)", vec![Mark::Bold]),
        ]);
        assert_eq!(text, "&#97;**(b)**\n");
    }

    #[test]
    fn test_adjacent_bold_and_italic_runs() {
        rendered(vec![
            Node::marked_text("x.", vec![Mark::Bold]),
            Node::marked_text("y", vec![Mark::Italic]),
            Node::text(" and "),
            Node::marked_text("gone", vec![Mark::Strike]),
            Node::text("d"),
        ]);
    }

    #[test]
    fn test_edge_whitespace_is_kept() {
        let (text, _) = rendered(vec![Node::text("    indented and trailing  ")]);
        assert!(text.starts_with("&#32;   indented"), "{text}");
        assert!(text.ends_with(" &#32;\n"), "{text}");
    }

    #[test]
    fn test_line_breaks_do_not_start_blocks() {
        let (text, again) = rendered(vec![Node::text("intro\n===\n- item\n2) next\n# tag")]);
        assert_eq!(again.content.len(), 1);
        assert_eq!(
            text,
            "intro\\\n\\===\\\n\\- item\\\n2\\) next\\\n\\# tag\n"
        );
    }

    #[test]
    fn test_stray_inline_block_is_rejected() {
        let doc = Node::doc(vec![Node::text("stray")]);
        assert!(matches!(
            render(&doc, &ContentMetadata::default(), Dialect::GITHUB),
            Err(TransformError::Unrepresentable(_))
        ));
    }
}
