//! Shared styling utilities for the CLI.

use console::Style;

use contentsync_core::history::{DiffNode, DiffTag};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// First seven characters of a commit id.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Print a structural diff as an indented block outline.
///
/// Added blocks are prefixed with `+`, removed with `-`; blocks with changed
/// words show the words inline.
pub fn print_diff(root: &DiffNode) {
    if !root.has_changes() {
        println!("{}", dim("(no changes)"));
        return;
    }
    for child in &root.content {
        print_block(child, 0);
    }
}

fn print_block(node: &DiffNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = node.kind.as_str();
    match node.diff {
        Some(DiffTag::Added) => {
            let style = Style::new().green();
            println!("{indent}{}", style.apply_to(format!("+ {label}: {}", node.text_content())));
        }
        Some(DiffTag::Removed) => {
            let style = Style::new().red();
            println!("{indent}{}", style.apply_to(format!("- {label}: {}", node.text_content())));
        }
        _ if !node.has_changes() => {
            println!("{indent}{}", dim(&format!("  {label}: {}", node.text_content())));
        }
        _ => {
            let inline = node.content.iter().all(|c| c.kind.is_inline());
            if inline {
                println!("{indent}~ {label}: {}", inline_words(node));
            } else {
                println!("{indent}~ {label}");
                for child in &node.content {
                    print_block(child, depth + 1);
                }
            }
        }
    }
}

fn inline_words(node: &DiffNode) -> String {
    node.content
        .iter()
        .map(|run| {
            let text = run.text_content();
            match run.diff {
                Some(DiffTag::Added) => Style::new().green().apply_to(format!("{{+{text}+}}")).to_string(),
                Some(DiffTag::Removed) => Style::new().red().apply_to(format!("[-{text}-]")).to_string(),
                _ => text,
            }
        })
        .collect()
}
