//! Representative image selection for an article page.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static OG_IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#)
        .expect("valid og:image selector")
});

static MARKDOWN_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[([^\]]*)\]\((https?://[^)\s]+)\)").expect("valid markdown image regex")
});

/// URL fragments that mark decoration rather than a story image.
const DENYLIST: &[&str] = &[
    "logo", "icon", "avatar", "favicon", "sprite", "svg", "badge", "thumbnail",
];

/// File-name and path markers of small renditions.
const SMALL_SIZE_MARKERS: &[&str] = &["_s.", "_xs.", "_thumb.", "_small.", "/i/", "/icons/"];

/// Pick the best image for an article.
///
/// The page's `og:image` wins. Otherwise the first inline image in `text`
/// that does not look like a logo, icon or small rendition; and if every
/// inline image looks like one, the first inline image anyway.
pub fn resolve_image(html: &str, text: &str) -> Option<String> {
    og_image(html).or_else(|| first_inline_image(text))
}

/// `content` of the first `og:image` meta tag, whatever the attribute order.
pub fn og_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&OG_IMAGE_SELECTOR)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| content.starts_with("http://") || content.starts_with("https://"))
        .map(str::to_string)
}

/// First non-decorative Markdown image in `text`.
pub fn first_inline_image(text: &str) -> Option<String> {
    let images = MARKDOWN_IMAGE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(2).map(|m| m.as_str()))
        .collect::<Vec<_>>();

    images
        .iter()
        .find(|url| !is_decorative(url))
        .or_else(|| images.first())
        .map(|url| url.to_string())
}

fn is_decorative(url: &str) -> bool {
    let lower = url.to_lowercase();
    DENYLIST.iter().any(|marker| lower.contains(marker))
        || SMALL_SIZE_MARKERS.iter().any(|marker| lower.contains(marker))
}
