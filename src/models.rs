//! Data models shared across the collection and normalization stages.
//!
//! - [`SourceSpec`]: immutable per-site description (URL shape, pagination)
//! - [`RawArticle`]: fetched article text before normalization
//! - [`NormalizedArticle`]: structured, length-capped output record
//! - [`LinkSet`]: ordered, deduplicated article URLs for one collection run
//! - [`FetchRequest`] / [`FetchResponse`]: the aggregation contract

use crate::errors::NewsResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a source exposes listing content beyond its first page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationStrategy {
    /// The first listing page is all we take.
    #[default]
    #[serde(rename = "none")]
    NoPagination,
    /// Listing pages are addressed by a query parameter (`?page=N`).
    UrlParam { param: String },
    /// More items appear after clicking a "load more" style control.
    Interactive {
        #[serde(default)]
        triggers: Vec<String>,
    },
}

/// What a genuine article URL looks like for one source.
///
/// `include` is matched from the start of the URL. `exclude` rejects URLs
/// that would otherwise match, e.g. section indexes sharing the article
/// prefix.
#[derive(Debug, Clone)]
pub struct ArticleShape {
    include: Regex,
    exclude: Option<Regex>,
}

impl ArticleShape {
    pub fn new(include: &str, exclude: Option<&str>) -> NewsResult<Self> {
        let include = Regex::new(&format!("^(?:{include})"))?;
        let exclude = match exclude {
            Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})"))?),
            None => None,
        };
        Ok(Self { include, exclude })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.include.is_match(url) && !self.exclude.as_ref().is_some_and(|ex| ex.is_match(url))
    }
}

/// One external website, loaded once from configuration.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub shape: ArticleShape,
    pub pagination: PaginationStrategy,
}

/// An article as fetched from its page, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    pub url: String,
    pub text: String,
    pub image_url: Option<String>,
    pub source_name: String,
}

/// The structured record returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub title: String,
    pub content: String,
    pub date_of_publication: Option<String>,
    pub category: String,
    pub language: String,
    /// Original link to the article.
    pub source_url: String,
    /// Site the article came from, e.g. `kun.uz`.
    pub source_name: String,
    /// Best-effort illustration; never validated or fetched.
    pub image_url: Option<String>,
}

/// Article URLs gathered during one collection run.
///
/// Insertion-ordered and deduplicated by exact string identity. It only
/// ever grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSet {
    links: Vec<String>,
    seen: HashSet<String>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one URL; returns `false` if it was already present.
    pub fn insert(&mut self, url: String) -> bool {
        if self.seen.contains(&url) {
            return false;
        }
        self.seen.insert(url.clone());
        self.links.push(url);
        true
    }

    /// Merge URLs in order, returning how many were new.
    pub fn merge<I>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        urls.into_iter().map(|url| self.insert(url)).filter(|&new| new).count()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.links
    }

    pub fn into_vec(self) -> Vec<String> {
        self.links
    }
}

impl FromIterator<String> for LinkSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut set = LinkSet::new();
        set.merge(iter);
        set
    }
}

/// Input of one aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    pub category: String,
    /// Falls back to the configured default when absent or zero.
    pub limit: Option<usize>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub date_to: Option<String>,
}

/// Output of one aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub category: String,
    pub total_fetched: usize,
    pub articles: Vec<NormalizedArticle>,
}
