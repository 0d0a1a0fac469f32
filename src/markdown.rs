//! Markdown article loading
//!
//! Turns a markdown file into a [`ContentPayload`]: the markdown itself, its
//! HTML rendering and a title taken from the first `# ` heading unless one is
//! given explicitly.

use std::path::Path;

use pulldown_cmark::{html, Options, Parser};

use crosspost_core::prelude::*;
use crosspost_core::ContentPayload;

/// Render markdown to HTML (tables, footnotes, strikethrough, task lists)
pub fn render_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Text of the first level-one ATX heading, if any
pub fn extract_title(markdown: &str) -> Option<String> {
    let mut in_fence = false;
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("# ") {
            let title = rest.trim().trim_end_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

/// Build a payload from markdown text
///
/// Title precedence: `title`, the first `# ` heading, then `fallback_title`.
pub fn payload_from_markdown(
    markdown: &str,
    title: Option<String>,
    fallback_title: &str,
) -> ContentPayload {
    let title = title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| extract_title(markdown))
        .unwrap_or_else(|| fallback_title.to_string());

    ContentPayload::new(title)
        .with_markdown(markdown)
        .with_html(render_html(markdown))
}

/// Read `path` and build its payload; the file stem is the last-resort title
pub fn load_payload(path: &Path, title: Option<String>) -> Result<ContentPayload> {
    let markdown = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string());

    let payload = payload_from_markdown(&markdown, title, &stem);
    if payload.is_empty() {
        warn!("{} has no content", path.display());
    }
    debug!(
        "Loaded '{}' from {} ({} bytes)",
        payload.title,
        path.display(),
        markdown.len()
    );
    Ok(payload)
}
