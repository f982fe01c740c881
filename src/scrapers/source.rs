//! Per-source collection: listing page → links → pagination → articles.

use crate::errors::{NewsError, NewsResult};
use crate::models::{LinkSet, RawArticle, SourceSpec};
use crate::render::{RenderConfig, Renderer, render_with_fallback};
use crate::scrapers::images::resolve_image;
use crate::scrapers::links::{QueryHandling, extract_article_links};
use crate::scrapers::pagination::{PaginationConfig, Paginator};
use crate::scrapers::text::page_text;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Articles whose trimmed text is shorter than this are dropped.
    pub min_text_chars: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self { min_text_chars: 100 }
    }
}

/// Collects raw articles for one source at a time.
pub struct SourceCollector<'a> {
    renderer: &'a dyn Renderer,
    render: &'a RenderConfig,
    pagination: &'a PaginationConfig,
    config: &'a CollectConfig,
}

impl<'a> SourceCollector<'a> {
    pub fn new(
        renderer: &'a dyn Renderer,
        render: &'a RenderConfig,
        pagination: &'a PaginationConfig,
        config: &'a CollectConfig,
    ) -> Self {
        Self {
            renderer,
            render,
            pagination,
            config,
        }
    }

    /// Collect up to `limit` articles from one category listing of `source`.
    ///
    /// Only a failure to load the listing page itself is an error; article
    /// pages that fail or carry too little text are skipped.
    #[instrument(level = "info", skip_all, fields(source = %source.name, %category_url, limit))]
    pub async fn collect(
        &self,
        source: &SourceSpec,
        category_url: &str,
        limit: usize,
    ) -> NewsResult<Vec<RawArticle>> {
        let listing_url =
            Url::parse(category_url).map_err(|e| NewsError::invalid_url(category_url, e))?;

        let html = render_with_fallback(
            self.renderer,
            category_url,
            &self.render.primary,
            &self.render.fallback,
        )
        .await?;
        let initial = extract_article_links(&html, &listing_url, &source.shape, QueryHandling::Strip)
            .into_iter()
            .collect::<LinkSet>();
        if initial.is_empty() {
            warn!(%category_url, "No article links on listing page");
        } else {
            info!(count = initial.len(), "Indexed listing page");
        }

        let outcome = Paginator::new(self.renderer, self.render, self.pagination)
            .paginate(source, &listing_url, initial, limit)
            .await;

        let urls = outcome.links.into_vec().into_iter().take(limit).collect::<Vec<_>>();
        debug!(urls = ?urls, "Article URLs to fetch");

        let articles = stream::iter(urls)
            .then(|url| async move {
                match self.fetch_article(source, &url).await {
                    Ok(Some(article)) => Some(article),
                    Ok(None) => {
                        debug!(%url, "Article text too short; skipping");
                        None
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "Article fetch failed; skipping");
                        None
                    }
                }
            })
            .filter_map(std::future::ready)
            .collect::<Vec<_>>()
            .await;

        info!(count = articles.len(), "Fetched article contents");
        Ok(articles)
    }

    async fn fetch_article(&self, source: &SourceSpec, url: &str) -> NewsResult<Option<RawArticle>> {
        let page_url = Url::parse(url).map_err(|e| NewsError::invalid_url(url, e))?;
        let html = render_with_fallback(self.renderer, url, &self.render.primary, &self.render.fallback)
            .await?;

        let text = page_text(&html, &page_url);
        if text.trim().chars().count() < self.config.min_text_chars {
            return Ok(None);
        }
        let image_url = resolve_image(&html, &text);

        Ok(Some(RawArticle {
            url: url.to_string(),
            text,
            image_url,
            source_name: source.name.clone(),
        }))
    }
}
