//! YAML frontmatter: the `---` delimited metadata block at the top of a
//! markdown file.

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Location, TransformError};
use crate::models::ContentMetadata;

/// Raw frontmatter split from a document.
#[derive(Debug, PartialEq, Eq)]
pub struct Split<'a> {
    /// YAML text between the delimiters, if the document has a block.
    pub yaml: Option<&'a str>,
    pub body: &'a str,
    /// Number of lines preceding `body` in the original text.
    pub body_line_offset: usize,
}

/// Split a document into its frontmatter block and body.
///
/// The block must open on the first line with `---` and close with a line
/// that is exactly `---`. An unterminated block is a [`TransformError`].
pub fn split(text: &str) -> Result<Split<'_>, TransformError> {
    let rest = match text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => {
            return Ok(Split {
                yaml: None,
                body: text,
                body_line_offset: 0,
            })
        }
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(&['\r', '\n'][..]) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok(Split {
                yaml: Some(yaml),
                body,
                body_line_offset: yaml.lines().count() + 2,
            });
        }
        offset += line.len();
    }

    Err(TransformError::Frontmatter {
        location: Some(Location { line: 1, column: 1 }),
        detail: "unterminated frontmatter block".into(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) if s.trim().is_empty() => Vec::new(),
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fields {
    title: Option<String>,
    description: Option<String>,
    slug: Option<String>,
    date: Option<String>,
    tags: Option<OneOrMany>,
    authors: Option<OneOrMany>,
    canonical_link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldsOut<'a> {
    #[serde(skip_serializing_if = "is_blank")]
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "is_empty_list")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "is_empty_list")]
    authors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical_link: Option<&'a str>,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

fn is_empty_list(list: &&[String]) -> bool {
    list.is_empty()
}

/// Parse a frontmatter block into metadata.
///
/// Unknown keys are ignored. `canonicalLink` is only read when
/// `canonical_link` is set.
pub fn parse(yaml: &str, canonical_link: bool) -> Result<ContentMetadata, TransformError> {
    if yaml.trim().is_empty() {
        return Ok(ContentMetadata::default());
    }
    let fields: Fields = serde_yaml::from_str(yaml).map_err(|e| TransformError::Frontmatter {
        // Frontmatter starts on line 2, after the opening delimiter.
        location: e.location().map(|loc| Location {
            line: loc.line() + 1,
            column: loc.column(),
        }),
        detail: e.to_string(),
    })?;

    let date = match fields.date.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(raw) => Some(parse_date(raw)?),
    };

    Ok(ContentMetadata {
        title: fields.title.unwrap_or_default(),
        description: fields.description.filter(|s| !s.is_empty()),
        slug: fields.slug.filter(|s| !s.is_empty()),
        date,
        tags: fields.tags.map(OneOrMany::into_vec).unwrap_or_default(),
        authors: fields.authors.map(OneOrMany::into_vec).unwrap_or_default(),
        canonical_link: if canonical_link {
            fields.canonical_link.filter(|s| !s.is_empty())
        } else {
            None
        },
    })
}

/// Render metadata as a frontmatter block including both delimiters.
///
/// Returns an empty string when there is nothing to write.
pub fn render(metadata: &ContentMetadata, canonical_link: bool) -> String {
    let out = FieldsOut {
        title: &metadata.title,
        description: metadata.description.as_deref(),
        slug: metadata.slug.as_deref(),
        date: metadata.date.map(format_date),
        tags: &metadata.tags,
        authors: &metadata.authors,
        canonical_link: if canonical_link {
            metadata.canonical_link.as_deref()
        } else {
            None
        },
    };
    match serde_yaml::to_string(&out) {
        Ok(yaml) if yaml.trim() != "{}" => format!("---\n{yaml}---\n"),
        _ => String::new(),
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, TransformError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| TransformError::Frontmatter {
            location: None,
            detail: format!("invalid date '{raw}'"),
        })
}

/// Dates at midnight UTC are written as plain `YYYY-MM-DD`.
fn format_date(date: DateTime<Utc>) -> String {
    if date.num_seconds_from_midnight() == 0 && date.nanosecond() == 0 {
        date.format("%Y-%m-%d").to_string()
    } else {
        date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}
