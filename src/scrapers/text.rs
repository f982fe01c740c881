//! Text view of an article page.
//!
//! Produces readable text from HTML, keeping links as `[text](url)` and
//! images as `![alt](url)` so the link and image helpers can work on it.
//! The main content container is preferred when it holds enough text;
//! otherwise the whole body is used, minus scripts, navigation and the like.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

/// Containers tried, in order, before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".news-content",
    "#content",
];

/// Below this many characters a container is not the article.
const MIN_CONTAINER_CHARS: usize = 200;

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "footer", "aside", "form",
    "button", "select",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "ul", "ol", "li", "h1", "h2", "h3", "h4",
    "h5", "h6", "blockquote", "figure", "figcaption", "table", "tr", "br", "hr", "time",
];

static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("valid body selector"));

/// Render `html` (served from `page_url`) as text.
pub fn page_text(html: &str, page_url: &Url) -> String {
    let document = Html::parse_document(html);

    for selector in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(container) = document.select(&selector).next() {
            let text = render_element(container, page_url);
            if text.chars().count() > MIN_CONTAINER_CHARS {
                return text;
            }
        }
    }

    match document.select(&BODY_SELECTOR).next() {
        Some(body) => render_element(body, page_url),
        None => render_element(document.root_element(), page_url),
    }
}

fn render_element(element: ElementRef<'_>, page_url: &Url) -> String {
    let mut out = String::new();
    walk(element, page_url, &mut out);
    tidy(&out)
}

fn walk(element: ElementRef<'_>, page_url: &Url, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
            }
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let tag = el.name();
                if SKIPPED_TAGS.contains(&tag) {
                    continue;
                }
                match tag {
                    "a" => {
                        let label = collapse(&child_el.text().collect::<String>());
                        match el.attr("href").and_then(|href| absolute(href, page_url)) {
                            Some(href) if !label.is_empty() => {
                                out.push_str(&format!(" [{label}]({href}) "));
                            }
                            _ => walk(child_el, page_url, out),
                        }
                    }
                    "img" => {
                        let src = el
                            .attr("src")
                            .or_else(|| el.attr("data-src"))
                            .and_then(|src| absolute(src, page_url));
                        if let Some(src) = src {
                            let alt = collapse(el.attr("alt").unwrap_or_default());
                            out.push_str(&format!("\n![{alt}]({src})\n"));
                        }
                    }
                    _ => {
                        let block = BLOCK_TAGS.contains(&tag);
                        if block {
                            out.push('\n');
                        }
                        walk(child_el, page_url, out);
                        if block {
                            out.push('\n');
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn absolute(link: &str, page_url: &Url) -> Option<String> {
    let link = link.trim();
    if link.is_empty() || link.starts_with("data:") || link.starts_with("javascript:") {
        return None;
    }
    let url = page_url.join(link).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace inside lines and drop empty lines.
fn tidy(text: &str) -> String {
    text.lines()
        .map(collapse)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
