use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// ── Constants ────────────────────────────────────────────────────────────────

/// Query parameters that identify a post; everything else is tracking noise.
pub const ALLOWED_QUERY_PARAMS: &[&str] =
    &["v", "fbid", "set", "story_fbid", "id", "multi_permalinks"];

static FB_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://(?:[A-Za-z0-9-]+\.)*facebook\.com/[^\s?<>]+(?:\?[^\s<>]*)?").unwrap()
});

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch {
    /// The link exactly as it appeared in the message.
    pub raw_url: String,
    pub sanitized_url: Url,
    /// Byte range of `raw_url` inside the message text.
    pub span: Range<usize>,
}

// ── Detection ────────────────────────────────────────────────────────────────

/// Find the first Facebook link in `text` and strip its tracking parameters.
///
/// A link that matches the pattern but does not parse is treated as no link.
pub fn detect(text: &str) -> Option<LinkMatch> {
    let found = FB_LINK_RE.find(text)?;
    link_from_match(found.as_str(), found.range())
}

fn link_from_match(raw: &str, span: Range<usize>) -> Option<LinkMatch> {
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!(url = raw, error = %e, "ignoring malformed link");
            return None;
        }
    };

    Some(LinkMatch {
        raw_url: raw.to_string(),
        sanitized_url: sanitize(&parsed),
        span,
    })
}

/// Drop every query parameter outside [`ALLOWED_QUERY_PARAMS`].
///
/// Surviving parameters keep the order they had in the original link, so
/// sanitizing twice gives the same URL.
pub fn sanitize(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| ALLOWED_QUERY_PARAMS.contains(&&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    clean
}
