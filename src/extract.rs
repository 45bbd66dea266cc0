use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::fetch::FetchedPage;

// ── Constants ────────────────────────────────────────────────────────────────

/// Content containers in priority order: story permalink, then photo view.
const CONTENT_PATTERNS: &[&str] = &[
    r#"div[id="m_story_permalink_view"]"#,
    r#"div[id="MPhotoContent"]"#,
];

/// Children concatenated when the content node has no text of its own.
const FALLBACK_CHILD_TAG: &str = "div";

const PROFILE_PICTURE_MARKER: &str = "profpic";
const TRUSTED_IMAGE_PREFIX: &str = "https://scontent";

// ── Lazy static selectors ────────────────────────────────────────────────────

static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    CONTENT_PATTERNS
        .iter()
        .map(|pattern| Selector::parse(pattern).unwrap())
        .collect()
});

static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("document is not HTML ({0})")]
    NotHtml(String),
}

// ── Public result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Excerpt {
    /// A content node was found and yielded text.
    Text(String),
    /// A content node was found but neither it nor its children had text.
    Empty,
    /// No content pattern matched the document.
    NotFound,
}

impl Excerpt {
    pub fn as_str(&self) -> &str {
        match self {
            Excerpt::Text(text) => text,
            Excerpt::Empty | Excerpt::NotFound => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub excerpt: Excerpt,
    /// The first image worth attaching; not fetched yet.
    pub image_url: Option<String>,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Parse a fetched page and pull out the post text and image candidate.
///
/// Everything borrowed from the parsed tree is copied out, so the result can
/// cross an `.await` even though `Html` cannot.
pub fn extract_post(page: &FetchedPage) -> Result<Extraction, ParseError> {
    let document = parse_document(page)?;

    let extraction = match find_content_node(&document) {
        Some(node) => Extraction {
            excerpt: excerpt_of(node),
            image_url: image_candidate(node),
        },
        None => Extraction {
            excerpt: Excerpt::NotFound,
            image_url: None,
        },
    };
    Ok(extraction)
}

// ── Document parsing ─────────────────────────────────────────────────────────

/// html5ever recovers from any markup, so the only payload we refuse is one
/// the server explicitly labelled as something other than HTML/XML.
pub fn parse_document(page: &FetchedPage) -> Result<Html, ParseError> {
    if let Some(content_type) = page.content_type.as_deref() {
        if !content_type.contains("html") && !content_type.contains("xml") {
            return Err(ParseError::NotHtml(content_type.to_string()));
        }
    }
    Ok(Html::parse_document(&page.body))
}

// ── Content node selection ───────────────────────────────────────────────────

/// First node of the first pattern that matches anything.
pub fn find_content_node(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_SELECTORS
        .iter()
        .find_map(|selector| document.select(selector).next())
}

/// The node's own text, or its direct `div` children joined by spaces.
///
/// Text is kept as rendered apart from surrounding whitespace; line breaks
/// inside the post survive.
pub fn excerpt_of(node: ElementRef<'_>) -> Excerpt {
    let own = own_text(node);
    let own = own.trim();
    if !own.is_empty() {
        return Excerpt::Text(own.to_string());
    }

    let joined = child_elements(node, FALLBACK_CHILD_TAG)
        .map(|child| collect_text(child).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.is_empty() {
        Excerpt::Empty
    } else {
        Excerpt::Text(joined)
    }
}

// ── Image selection ──────────────────────────────────────────────────────────

/// Walk descendant `<img>` nodes in document order and return the first
/// source hosted on the content CDN that is not a profile picture.
pub fn image_candidate(node: ElementRef<'_>) -> Option<String> {
    for img in node.select(&IMG_SELECTOR) {
        let v = img.value();

        if v
            .attr("class")
            .is_some_and(|class| class.contains(PROFILE_PICTURE_MARKER))
        {
            continue;
        }

        match v.attr("src") {
            Some(src) if src.starts_with(TRUSTED_IMAGE_PREFIX) => return Some(src.to_string()),
            _ => continue,
        }
    }
    None
}

// ── DOM utility helpers ──────────────────────────────────────────────────────

/// All text under the element except what sits inside its direct
/// [`FALLBACK_CHILD_TAG`] children. Inline markup (`<b>`, `<a>`, ...) counts.
fn own_text(el: ElementRef<'_>) -> String {
    use scraper::node::Node;
    let mut result = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => result.push_str(&*text.text),
            Node::Element(element) if element.name() == FALLBACK_CHILD_TAG => {}
            Node::Element(_) => {
                if let Some(inline) = ElementRef::wrap(child) {
                    result.push_str(&collect_text(inline));
                }
            }
            _ => {}
        }
    }
    result
}

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join("")
}

/// Direct element children with the given tag name, in document order.
fn child_elements<'a>(
    el: ElementRef<'a>,
    tag: &'a str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(move |child| child.value().name() == tag)
}
