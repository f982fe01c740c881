//! Article link discovery on listing pages.
//!
//! Two strategies run in order, and the second only when the first accepts
//! nothing:
//!
//! 1. `href` attributes of the raw markup
//! 2. Markdown-style `[text](url)` links, for content that arrives as a text
//!    rendering of the page instead of markup
//!
//! Every candidate is normalized (fragment dropped, query dropped on request),
//! resolved against the listing URL when site-relative, and kept only when
//! it stays on the listing's host and matches the source's article shape.

use crate::models::ArticleShape;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href=["']([^"']+)["']"#).expect("valid href regex"));

static MARKDOWN_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("valid markdown link regex")
});

/// Whether query strings survive normalization.
///
/// Listing pages fetched by URL drop them, so tracking parameters cannot
/// duplicate an article. Pages captured from an interactive session keep
/// them, because that is where their pagination state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHandling {
    Strip,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkSyntax {
    Href,
    Markdown,
}

const STRATEGIES: [LinkSyntax; 2] = [LinkSyntax::Href, LinkSyntax::Markdown];

/// Extract article URLs from `content`, in order of first appearance.
pub fn extract_article_links(
    content: &str,
    base_url: &Url,
    shape: &ArticleShape,
    query: QueryHandling,
) -> Vec<String> {
    for syntax in STRATEGIES {
        let links = candidates(content, syntax)
            .filter_map(|raw| normalize_link(raw, base_url, syntax, query))
            .filter(|url| same_authority(url, base_url))
            .map(|url| url.to_string())
            .filter(|url| shape.matches(url))
            .unique()
            .collect::<Vec<_>>();
        if !links.is_empty() {
            return links;
        }
    }
    Vec::new()
}

fn candidates(content: &str, syntax: LinkSyntax) -> Box<dyn Iterator<Item = &str> + '_> {
    let re = match syntax {
        LinkSyntax::Href => &HREF_RE,
        LinkSyntax::Markdown => &MARKDOWN_LINK_RE,
    };
    let group = match syntax {
        LinkSyntax::Href => 1,
        LinkSyntax::Markdown => 2,
    };
    Box::new(
        re.captures_iter(content)
            .filter_map(move |caps| caps.get(group).map(|m| m.as_str())),
    )
}

/// Turn one raw link target into an absolute URL, or drop it.
fn normalize_link(raw: &str, base_url: &Url, syntax: LinkSyntax, query: QueryHandling) -> Option<Url> {
    let raw = raw.trim();
    let mut url = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw).ok()?
    } else if syntax == LinkSyntax::Href && raw.starts_with('/') {
        base_url.join(raw).ok()?
    } else {
        return None;
    };
    url.set_fragment(None);
    if query == QueryHandling::Strip {
        url.set_query(None);
    }
    Some(url)
}

fn same_authority(url: &Url, base_url: &Url) -> bool {
    url.host_str() == base_url.host_str() && url.port() == base_url.port()
}
