//! Plain-text message rendering for single items and grouped digests.

use newswire_common::text::truncate_chars;
use newswire_common::types::Article;

const SUMMARY_CHARS: usize = 600;
const SUBJECT_TITLE_CHARS: usize = 80;
const MAX_LISTED_SOURCES: usize = 3;
const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

fn clean(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

fn push_summary_and_url(lines: &mut Vec<String>, article: &Article) {
    let summary = clean(&article.summary);
    if !summary.is_empty() {
        lines.push(String::new());
        lines.push(truncate_chars(summary, SUMMARY_CHARS).to_string());
    }
    let url = clean(&article.url);
    if !url.is_empty() {
        lines.push(String::new());
        lines.push(url.to_string());
    }
}

/// Render one article: title, `source | category`, summary, URL.
pub fn render_item(article: &Article) -> String {
    let mut lines = vec![clean(&article.title).to_string()];

    let meta: Vec<&str> = [clean(&article.source_name), clean(&article.category)]
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect();
    if !meta.is_empty() {
        lines.push(meta.join(" | "));
    }

    push_summary_and_url(&mut lines, article);
    lines.join("\n").trim().to_string()
}

/// `Sources: a, b, c (+k more)` over distinct (case-insensitive) source names.
fn sources_line(items: &[&Article]) -> Option<String> {
    let mut seen = Vec::new();
    let mut sources = Vec::new();
    for item in items {
        let source = clean(&item.source_name);
        if source.is_empty() {
            continue;
        }
        let key = source.to_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            sources.push(source);
        }
    }
    if sources.is_empty() {
        return None;
    }

    let shown = sources.len().min(MAX_LISTED_SOURCES);
    let mut line = format!("Sources: {}", sources[..shown].join(", "));
    let extra = sources.len() - shown;
    if extra > 0 {
        line.push_str(&format!(" (+{} more)", extra));
    }
    Some(line)
}

fn render_group(items: &[&Article]) -> String {
    let Some(first) = items.first() else {
        return String::new();
    };

    let mut lines = Vec::new();
    let title = clean(&first.title);
    if !title.is_empty() {
        lines.push(title.to_string());
    }
    if let Some(sources) = sources_line(items) {
        lines.push(sources);
    }
    push_summary_and_url(&mut lines, first);
    lines.join("\n").trim().to_string()
}

/// Render a digest of dedupe groups. Each group collapses into one block
/// headed by its first article; the header counts every item.
pub fn render_digest(groups: &[Vec<&Article>], brand: &str) -> String {
    let total: usize = groups.iter().map(Vec::len).sum();
    let blocks: Vec<String> = groups.iter().map(|g| render_group(g)).collect();
    format!(
        "{} new items from {}\n\n{}",
        total,
        brand,
        blocks.join(BLOCK_SEPARATOR)
    )
    .trim()
    .to_string()
}

/// Subject for a digest email.
pub fn digest_subject(brand: &str, search_name: &str, groups: usize) -> String {
    format!("{} alert: {} ({} items)", brand, search_name, groups)
}

/// Subject for a single-item message.
pub fn item_subject(brand: &str, article: &Article) -> String {
    format!(
        "{} alert: {}",
        brand,
        truncate_chars(clean(&article.title), SUBJECT_TITLE_CHARS)
    )
}
