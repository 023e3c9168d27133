//! Transformer pipeline between stored structured documents and the text
//! files kept in the repository.
//!
//! The input direction turns repository text into a structured buffer plus
//! metadata; the output direction renders a buffer (with its piece's
//! metadata) back to text. Both directions accept batches, and a batch either
//! fully succeeds or fails as a whole.

pub mod frontmatter;
pub mod markdown;

use async_trait::async_trait;

use crate::document::{decode, encode, hash_buffer};
use crate::errors::TransformError;
use crate::models::{ContentMetadata, TransformerKind};

use self::markdown::Dialect;

/// Result of processing one incoming text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputContent {
    /// Canonical structured buffer.
    pub buffer: Vec<u8>,
    /// Hash of `buffer`; equal documents always hash equal.
    pub content_hash: String,
    pub metadata: ContentMetadata,
}

/// What the output direction needs to know about the owning piece.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPieceContext {
    pub metadata: ContentMetadata,
    /// `None` for the base unit.
    pub variant_key: Option<String>,
}

/// A stored buffer scheduled for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputContent {
    pub buffer: Vec<u8>,
    pub context: ContentPieceContext,
}

/// Text -> structured buffer.
#[async_trait]
pub trait InputContentProcessor: Send + Sync {
    async fn process(&self, text: &str) -> Result<InputContent, TransformError>;

    /// Process every text or none: the first failure rejects the batch and
    /// reports its index.
    async fn process_batch(&self, texts: &[String]) -> Result<Vec<InputContent>, TransformError> {
        let mut out = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let content = self
                .process(text)
                .await
                .map_err(|e| TransformError::Batch {
                    index,
                    source: Box::new(e),
                })?;
            out.push(content);
        }
        Ok(out)
    }
}

/// Structured buffer -> text.
#[async_trait]
pub trait OutputContentProcessor: Send + Sync {
    async fn process(&self, content: &OutputContent) -> Result<String, TransformError>;

    async fn process_batch(
        &self,
        contents: &[OutputContent],
    ) -> Result<Vec<String>, TransformError> {
        let mut out = Vec::with_capacity(contents.len());
        for (index, content) in contents.iter().enumerate() {
            let text = self
                .process(content)
                .await
                .map_err(|e| TransformError::Batch {
                    index,
                    source: Box::new(e),
                })?;
            out.push(text);
        }
        Ok(out)
    }
}

/// The configured text format of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformer {
    kind: TransformerKind,
}

impl From<TransformerKind> for Transformer {
    fn from(kind: TransformerKind) -> Self {
        Self { kind }
    }
}

impl Transformer {
    pub fn new(kind: TransformerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TransformerKind {
        self.kind
    }

    /// File extension written for new files (without the dot).
    pub fn extension(&self) -> &'static str {
        match self.kind {
            TransformerKind::Markdown => "md",
            TransformerKind::Docusaurus => "mdx",
        }
    }

    /// Whether a repository file is read by this transformer.
    pub fn accepts(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        match self.kind {
            TransformerKind::Markdown => lower.ends_with(".md"),
            TransformerKind::Docusaurus => lower.ends_with(".md") || lower.ends_with(".mdx"),
        }
    }

    fn dialect(&self) -> Dialect {
        match self.kind {
            TransformerKind::Markdown => Dialect::GITHUB,
            TransformerKind::Docusaurus => Dialect::DOCUSAURUS,
        }
    }

    /// Parse text synchronously.
    pub fn parse(&self, text: &str) -> Result<InputContent, TransformError> {
        let (doc, metadata) = markdown::parse(text, self.dialect())?;
        let buffer = encode(&doc);
        Ok(InputContent {
            content_hash: hash_buffer(&buffer),
            buffer,
            metadata,
        })
    }

    /// Render a stored buffer synchronously.
    pub fn render(&self, content: &OutputContent) -> Result<String, TransformError> {
        let doc = decode(&content.buffer)?;
        markdown::render(&doc, &content.context.metadata, self.dialect())
    }
}

#[async_trait]
impl InputContentProcessor for Transformer {
    async fn process(&self, text: &str) -> Result<InputContent, TransformError> {
        self.parse(text)
    }
}

#[async_trait]
impl OutputContentProcessor for Transformer {
    async fn process(&self, content: &OutputContent) -> Result<String, TransformError> {
        self.render(content)
    }
}

/// Hash of a stored buffer as it would be after a render/parse cycle.
///
/// Stored buffers may come from an editor and carry non-canonical run
/// splits, so they are decoded and re-encoded before hashing.
pub fn canonical_hash(buffer: &[u8]) -> Result<String, TransformError> {
    let doc = decode(buffer)?;
    Ok(hash_buffer(&encode(&doc)))
}
