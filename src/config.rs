//! Settings and the source/category catalog.
//!
//! Everything is read from one YAML document. The bundled
//! `config/default.yaml` carries the six supported sites and eight
//! categories; `--config <path>` replaces it wholesale. Sections left out of
//! a custom file take their built-in defaults.

use crate::aggregate::FanoutConfig;
use crate::api::ModelConfig;
use crate::errors::{NewsError, NewsResult};
use crate::models::{ArticleShape, PaginationStrategy, SourceSpec};
use crate::pipeline::NormalizeConfig;
use crate::render::RenderConfig;
use crate::scrapers::pagination::PaginationConfig;
use crate::scrapers::source::CollectConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument};
use url::Url;

const DEFAULT_SETTINGS: &str = include_str!("../config/default.yaml");

/// How one site is recognized and paginated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Regex a genuine article URL matches from its first character.
    pub article_pattern: String,
    /// URLs matching this are never articles, even when the pattern matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,
    #[serde(default)]
    pub pagination: PaginationStrategy,
}

/// One source's listing page within a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingConfig {
    pub source: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<ListingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Result count when a request names none.
    pub default_limit: usize,
    /// Default date range: this many days back from today.
    pub date_window_days: u32,
    pub fanout: FanoutConfig,
    pub render: RenderConfig,
    pub pagination: PaginationConfig,
    pub collect: CollectConfig,
    pub normalize: NormalizeConfig,
    pub model: ModelConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    pub categories: Vec<CategoryConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_limit: 50,
            date_window_days: 7,
            fanout: FanoutConfig::default(),
            render: RenderConfig::default(),
            pagination: PaginationConfig::default(),
            collect: CollectConfig::default(),
            normalize: NormalizeConfig::default(),
            model: ModelConfig::default(),
            sources: BTreeMap::new(),
            categories: Vec::new(),
        }
    }
}

impl Settings {
    /// Load `path`, or the bundled settings when no path is given.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> NewsResult<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let settings = Self::from_yaml(&raw)?;
                info!(path = %path.display(), "Loaded settings");
                Ok(settings)
            }
            None => {
                debug!("Using bundled settings");
                Self::from_yaml(DEFAULT_SETTINGS)
            }
        }
    }

    pub fn from_yaml(raw: &str) -> NewsResult<Self> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        if settings.default_limit == 0 {
            return Err(NewsError::Config("default_limit must be positive".to_string()));
        }
        if settings.fanout.max_concurrent_sources == 0 {
            return Err(NewsError::Config(
                "fanout.max_concurrent_sources must be positive".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// A source together with the listing page to start from.
#[derive(Debug, Clone)]
pub struct Listing {
    pub source: SourceSpec,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub listings: Vec<Listing>,
}

/// Validated category → listings table, built once at start.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    pub fn from_settings(settings: &Settings) -> NewsResult<Self> {
        let mut specs = BTreeMap::new();
        for (name, source) in &settings.sources {
            let shape = ArticleShape::new(&source.article_pattern, source.exclude_pattern.as_deref())?;
            if let PaginationStrategy::UrlParam { param } = &source.pagination {
                if param.is_empty() {
                    return Err(NewsError::Config(format!(
                        "Source '{name}' uses URL pagination without a parameter name"
                    )));
                }
            }
            specs.insert(
                name.as_str(),
                SourceSpec {
                    name: name.clone(),
                    shape,
                    pagination: source.pagination.clone(),
                },
            );
        }

        let mut seen = HashSet::new();
        let mut categories = Vec::with_capacity(settings.categories.len());
        for category in &settings.categories {
            if !seen.insert(category.name.as_str()) {
                return Err(NewsError::Config(format!(
                    "Category '{}' is defined twice",
                    category.name
                )));
            }
            let mut listings = Vec::with_capacity(category.sources.len());
            for listing in &category.sources {
                let source = specs.get(listing.source.as_str()).ok_or_else(|| {
                    NewsError::Config(format!(
                        "Category '{}' references unknown source '{}'",
                        category.name, listing.source
                    ))
                })?;
                Url::parse(&listing.url).map_err(|e| NewsError::invalid_url(&listing.url, e))?;
                listings.push(Listing {
                    source: source.clone(),
                    url: listing.url.clone(),
                });
            }
            categories.push(Category {
                name: category.name.clone(),
                listings,
            });
        }

        info!(
            sources = specs.len(),
            categories = categories.len(),
            "Catalog ready"
        );
        Ok(Self { categories })
    }

    /// Category names in configured order.
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    pub fn listings(&self, category: &str) -> Option<&[Listing]> {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .map(|c| c.listings.as_slice())
    }

    /// Each category with the comma-separated names of its sources.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.categories
            .iter()
            .map(|c| {
                let sources = c
                    .listings
                    .iter()
                    .map(|l| l.source.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                (c.name.clone(), sources)
            })
            .collect()
    }
}
