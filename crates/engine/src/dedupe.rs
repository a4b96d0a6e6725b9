//! Dedupe key derivation.
//!
//! A dedupe key identifies the same real-world story across repeated matches:
//! the canonical URL when the article has one, otherwise a
//! `source|title|date` fingerprint. Keys are pure functions of the article so
//! re-running a sweep always derives the same key.

use url::Url;
use url::form_urlencoded;

use newswire_common::types::Article;

/// Query parameters that only carry campaign tracking.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

/// Canonical identity of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeKey {
    pub key: String,
    /// Canonical URL, when the key was derived from one.
    pub normalized_url: Option<String>,
}

/// Derive the dedupe key for a matched article.
pub fn dedupe_key(article: &Article) -> DedupeKey {
    let url = normalize_url(article.url.as_deref().unwrap_or_default());
    if !url.is_empty() {
        return DedupeKey {
            key: url.clone(),
            normalized_url: Some(url),
        };
    }

    let source = article
        .source_name
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let title = normalize_title(article.title.as_deref().unwrap_or_default());
    let day = article.published_at.date_naive().format("%Y-%m-%d").to_string();

    let parts: Vec<&str> = [source.as_str(), title.as_str(), day.as_str()]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();

    let key = if parts.is_empty() {
        format!("unknown:{}", article.id)
    } else {
        parts.join("|")
    };

    DedupeKey {
        key,
        normalized_url: None,
    }
}

/// Canonicalize a URL: lowercase scheme and host, drop default ports, the
/// fragment, trailing path slashes and tracking parameters, and sort what
/// remains of the query. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let parsed = match Url::parse(raw) {
        Ok(u) if !u.cannot_be_a_base() => u,
        _ => return raw.to_string(),
    };

    let mut out = format!("{}://", parsed.scheme().to_ascii_lowercase());

    if !parsed.username().is_empty() {
        out.push_str(parsed.username());
        if let Some(password) = parsed.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    if let Some(host) = parsed.host_str() {
        out.push_str(&host.to_lowercase());
    }
    // `port()` is None for the scheme's default port.
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    out.push_str(parsed.path().trim_end_matches('/'));

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if !params.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    out
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Lowercase and collapse every run of non-alphanumeric characters into a
/// single space.
pub fn normalize_title(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;

    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }

    out
}
