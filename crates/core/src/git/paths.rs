//! Repository path helpers: normalization, slugs, directory mapping and
//! include/exclude rules.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::models::Directory;

/// Canonical form of a repository path.
///
/// Backslashes become `/`, `.` segments and empty segments are dropped, and
/// leading/trailing separators are removed. Case is preserved; use
/// [`match_key`] for case-insensitive comparisons.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Key used when matching incoming files against tracked records by path.
pub fn match_key(path: &str) -> String {
    normalize_path(path).to_lowercase()
}

/// Join path parts, skipping empty ones.
pub fn join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(normalize_path)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip `base` from the front of `path`, on segment boundaries.
///
/// Returns `None` when `path` is not inside `base`. An empty base contains
/// every path.
pub fn strip_base<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn slug_separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"))
}

/// Filename-safe slug of a title (`"Hello, World!"` -> `"hello-world"`).
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let slug = slug_separators().replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// File name without its extension.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// The directory whose path is the longest segment-wise prefix of `path`.
pub fn directory_for<'a>(path: &str, directories: &'a [Directory]) -> Option<&'a Directory> {
    let path = normalize_path(path);
    directories
        .iter()
        .filter(|dir| {
            let dir_path = normalize_path(&dir.path);
            !dir_path.is_empty() && strip_base(&path, &dir_path).is_some_and(|r| !r.is_empty())
        })
        .max_by_key(|dir| normalize_path(&dir.path).len())
}

/// Include/exclude glob rules applied to base-relative repository paths.
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PathRules {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Whether `path` should be synced.
    pub fn matches(&self, path: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| glob_match::glob_match(p, path));
        included && !self.exclude.iter().any(|p| glob_match::glob_match(p, path))
    }
}
