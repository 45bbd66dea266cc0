use bytes::Bytes;

use crate::extract::Excerpt;
use crate::link::LinkMatch;

pub const MAX_EXCERPT_CHARS: usize = 200;
pub const ATTACHMENT_NAME: &str = "gg.jpeg";
pub const ATTACHMENT_CONTENT_TYPE: &str = "image/jpeg";

const QUOTE_PREFIX: &str = "> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn jpeg(data: Bytes) -> Self {
        Self {
            filename: ATTACHMENT_NAME.to_string(),
            content_type: ATTACHMENT_CONTENT_TYPE.to_string(),
            data,
        }
    }
}

/// The replacement post, built once per trigger and handed to the chat client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Build the replacement for `original_text`.
///
/// The link is swapped for its sanitized form in angle brackets (which keeps
/// the platform from rendering its own preview) and the excerpt, capped at
/// [`MAX_EXCERPT_CHARS`] code points, is quoted underneath.
pub fn compose(
    author: &str,
    original_text: &str,
    link: &LinkMatch,
    excerpt: &Excerpt,
    image: Option<Bytes>,
) -> ComposedMessage {
    let mut body = String::with_capacity(original_text.len() + link.sanitized_url.as_str().len());
    body.push_str(&original_text[..link.span.start]);
    body.push('<');
    body.push_str(link.sanitized_url.as_str());
    body.push('>');
    body.push_str(&original_text[link.span.end..]);

    let excerpt = truncate_chars(excerpt.as_str(), MAX_EXCERPT_CHARS);
    let quote = if excerpt.is_empty() { "" } else { QUOTE_PREFIX };

    ComposedMessage {
        text: format!("**{author}** Says: \n{body} \n{quote}{excerpt}\n"),
        attachment: image.map(Attachment::jpeg),
    }
}

/// Longest prefix of `text` holding at most `max` chars.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
