//! Structural diff over document trees.
//!
//! Sibling sequences are aligned by content (node shape plus text
//! similarity) rather than by index, so one inserted block leaves its
//! neighbours untouched. Matched text runs that differ are split at word
//! granularity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::document::{normalize, Document, Mark, Node, NodeKind};

/// Minimum word-level similarity for two same-shaped siblings to be treated
/// as one edited node instead of a removal plus an addition.
pub const MATCH_THRESHOLD: f32 = 0.5;

/// Per-node diff annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    Added,
    Removed,
    Unchanged,
}

impl DiffTag {
    /// The tag as seen from the opposite direction.
    pub fn inverse(self) -> Self {
        match self {
            Self::Added => Self::Removed,
            Self::Removed => Self::Added,
            Self::Unchanged => Self::Unchanged,
        }
    }
}

/// A document node annotated with a diff tag.
///
/// `diff == None` means the node itself is not part of the change; its
/// descendants may still be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<DiffNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
    pub diff: Option<DiffTag>,
}

impl DiffNode {
    /// Copy `node` and its subtree, tagging every node with `tag`.
    pub fn from_node(node: &Node, tag: Option<DiffTag>) -> Self {
        Self {
            kind: node.kind,
            attrs: node.attrs.clone(),
            content: node
                .content
                .iter()
                .map(|child| Self::from_node(child, tag))
                .collect(),
            text: node.text.clone(),
            marks: node.marks.clone(),
            diff: tag,
        }
    }

    fn shell(node: &Node, content: Vec<DiffNode>) -> Self {
        Self {
            kind: node.kind,
            attrs: node.attrs.clone(),
            content,
            text: None,
            marks: node.marks.clone(),
            diff: None,
        }
    }

    fn text_run(template: &Node, text: String, tag: DiffTag) -> Self {
        Self {
            kind: NodeKind::Text,
            attrs: BTreeMap::new(),
            content: Vec::new(),
            text: Some(text),
            marks: template.marks.clone(),
            diff: Some(tag),
        }
    }

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

    /// Whether this node or any descendant is added or removed.
    pub fn has_changes(&self) -> bool {
        matches!(self.diff, Some(DiffTag::Added) | Some(DiffTag::Removed))
            || self.content.iter().any(DiffNode::has_changes)
    }
}

/// A changed node in a diff: its tag, kind and text.
pub type ChangedNode = (DiffTag, NodeKind, String);

/// The outermost added/removed nodes of a diff, in document order.
pub fn changed_nodes(root: &DiffNode) -> Vec<ChangedNode> {
    let mut out = Vec::new();
    collect_changed(root, &mut out);
    out
}

fn collect_changed(node: &DiffNode, out: &mut Vec<ChangedNode>) {
    match node.diff {
        Some(tag @ (DiffTag::Added | DiffTag::Removed)) => {
            out.push((tag, node.kind, node.text_content()));
        }
        _ => {
            for child in &node.content {
                collect_changed(child, out);
            }
        }
    }
}

/// Diff `old` against `new`; the result is rooted like `new`.
pub fn diff(old: &Document, new: &Document) -> DiffNode {
    let old = normalize(old);
    let new = normalize(new);
    if old == new {
        return DiffNode::from_node(&new, None);
    }
    if !old.same_shape(&new) {
        // Roots cannot be aligned: present them as a replacement.
        let removed = DiffNode::from_node(&old, Some(DiffTag::Removed));
        let added = DiffNode::from_node(&new, Some(DiffTag::Added));
        return DiffNode {
            diff: None,
            content: vec![removed, added],
            ..DiffNode::shell(&new, Vec::new())
        };
    }
    diff_matched(&old, &new)
}

fn diff_matched(old: &Node, new: &Node) -> DiffNode {
    if old == new {
        return DiffNode::from_node(new, None);
    }
    if new.kind == NodeKind::Text {
        // Callers wrap the split runs; a lone text root is returned as a shell.
        return DiffNode::shell(new, diff_text(old, new));
    }
    DiffNode::shell(new, diff_children(&old.content, &new.content))
}

fn diff_children(old: &[Node], new: &[Node]) -> Vec<DiffNode> {
    let mut out = Vec::with_capacity(new.len());
    for step in align(old, new) {
        match step {
            Step::Removed(i) => out.push(DiffNode::from_node(&old[i], Some(DiffTag::Removed))),
            Step::Added(j) => out.push(DiffNode::from_node(&new[j], Some(DiffTag::Added))),
            Step::Matched(i, j) => {
                if old[i] == new[j] {
                    out.push(DiffNode::from_node(&new[j], None));
                } else if new[j].kind == NodeKind::Text {
                    out.extend(diff_text(&old[i], &new[j]));
                } else {
                    out.push(diff_matched(&old[i], &new[j]));
                }
            }
        }
    }
    out
}

/// Word-level diff of two text runs with identical marks.
fn diff_text(old: &Node, new: &Node) -> Vec<DiffNode> {
    let before = old.text.as_deref().unwrap_or_default();
    let after = new.text.as_deref().unwrap_or_default();
    // Diff in a fixed orientation: swapping the inputs only swaps the tags.
    let flipped = before > after;
    let diff = if flipped {
        TextDiff::from_words(after, before)
    } else {
        TextDiff::from_words(before, after)
    };

    let mut runs: Vec<DiffNode> = Vec::new();
    for change in diff.iter_all_changes() {
        let tag = match change.tag() {
            ChangeTag::Equal => DiffTag::Unchanged,
            ChangeTag::Delete => DiffTag::Removed,
            ChangeTag::Insert => DiffTag::Added,
        };
        let tag = if flipped { tag.inverse() } else { tag };
        match runs.last_mut() {
            Some(last) if last.diff == Some(tag) => {
                last.text.get_or_insert_with(String::new).push_str(change.value());
            }
            _ => runs.push(DiffNode::text_run(new, change.value().to_string(), tag)),
        }
    }
    runs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Matched(usize, usize),
    Removed(usize),
    Added(usize),
}

fn similarity(a: &Node, b: &Node) -> f32 {
    let left = a.text_content();
    let right = b.text_content();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let (left, right) = if left <= right { (left, right) } else { (right, left) };
    TextDiff::from_words(left.as_str(), right.as_str()).ratio()
}

/// Alignment score of a sibling pair, `None` when they must not be paired.
fn match_score(a: &Node, b: &Node) -> Option<f32> {
    if !a.same_shape(b) {
        return None;
    }
    if a == b {
        return Some(2.0);
    }
    let ratio = similarity(a, b);
    (ratio >= MATCH_THRESHOLD).then_some(ratio)
}

/// Weighted longest-common-subsequence alignment of two sibling lists.
fn align(old: &[Node], new: &[Node]) -> Vec<Step> {
    let (n, m) = (old.len(), new.len());
    let scores: Vec<Vec<Option<f32>>> = old
        .iter()
        .map(|a| new.iter().map(|b| match_score(a, b)).collect())
        .collect();

    // best[i][j]: best total score aligning old[i..] with new[j..].
    let mut best = vec![vec![0.0f32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            let mut value = best[i + 1][j].max(best[i][j + 1]);
            if let Some(score) = scores[i][j] {
                value = value.max(score + best[i + 1][j + 1]);
            }
            best[i][j] = value;
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if let Some(score) = scores[i][j] {
            if (best[i][j] - (score + best[i + 1][j + 1])).abs() <= f32::EPSILON {
                steps.push(Step::Matched(i, j));
                i += 1;
                j += 1;
                continue;
            }
        }
        if best[i + 1][j] >= best[i][j + 1] {
            steps.push(Step::Removed(i));
            i += 1;
        } else {
            steps.push(Step::Added(j));
            j += 1;
        }
    }
    steps.extend((i..n).map(Step::Removed));
    steps.extend((j..m).map(Step::Added));
    steps
}
