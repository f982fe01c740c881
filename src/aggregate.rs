//! Category aggregation: fan-out over sources, normalization, date filter.

use crate::api::ExtractionModel;
use crate::config::{Catalog, Listing, Settings};
use crate::errors::{NewsError, NewsResult};
use crate::models::{FetchRequest, FetchResponse, NormalizedArticle, RawArticle};
use crate::pipeline::Normalizer;
use crate::render::Renderer;
use crate::scrapers::source::SourceCollector;
use chrono::{Days, Local, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{info, instrument, warn};

/// Concurrency and time limits of one aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Sources collected at the same time.
    pub max_concurrent_sources: usize,
    /// A source still collecting after this long contributes nothing.
    pub source_timeout_secs: u64,
    /// Normalization stops after this long and keeps what it has; `null` disables it.
    pub pipeline_timeout_secs: Option<u64>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 8,
            source_timeout_secs: 600,
            pipeline_timeout_secs: Some(3_600),
        }
    }
}

/// Articles to ask of each source: twice the fair share, at least 5.
///
/// The surplus makes up for articles lost during normalization.
pub fn per_source_limit(requested: usize, sources: usize) -> usize {
    (requested * 2 / sources.max(1)).max(5)
}

/// Keep undated articles and those dated within `from..=to` (ISO dates).
pub fn filter_by_date(
    articles: Vec<NormalizedArticle>,
    from: &str,
    to: &str,
) -> Vec<NormalizedArticle> {
    articles
        .into_iter()
        .filter(|a| match a.date_of_publication.as_deref() {
            None => true,
            Some(date) => from <= date && date <= to,
        })
        .collect()
}

fn parse_date(value: &str) -> NewsResult<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.len() != 10 {
        return Err(NewsError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| NewsError::InvalidDate(value.to_string()))
}

/// Runs [`FetchRequest`]s against a catalog.
pub struct Aggregator<'a> {
    settings: &'a Settings,
    catalog: &'a Catalog,
    renderer: &'a dyn Renderer,
    model: &'a dyn ExtractionModel,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        settings: &'a Settings,
        catalog: &'a Catalog,
        renderer: &'a dyn Renderer,
        model: &'a dyn ExtractionModel,
    ) -> Self {
        Self {
            settings,
            catalog,
            renderer,
            model,
        }
    }

    /// Collect, normalize and filter articles for one category.
    ///
    /// Fails only on invalid input; source and article failures shrink the
    /// result instead.
    #[instrument(level = "info", skip_all, fields(category = %request.category))]
    pub async fn fetch(&self, request: FetchRequest) -> NewsResult<FetchResponse> {
        let listings = self
            .catalog
            .listings(&request.category)
            .filter(|listings| !listings.is_empty())
            .ok_or_else(|| NewsError::UnknownCategory {
                category: request.category.clone(),
                available: self.catalog.category_names(),
            })?;

        let limit = request
            .limit
            .filter(|&limit| limit > 0)
            .unwrap_or(self.settings.default_limit);
        let today = Local::now().date_naive();
        let date_from = match request.date_from.as_deref() {
            Some(value) => parse_date(value)?,
            None => today
                .checked_sub_days(Days::new(self.settings.date_window_days.into()))
                .unwrap_or(today),
        }
        .to_string();
        let date_to = match request.date_to.as_deref() {
            Some(value) => parse_date(value)?,
            None => today,
        }
        .to_string();

        let per_source = per_source_limit(limit, listings.len());
        info!(
            sources = listings.len(),
            limit,
            per_source,
            %date_from,
            %date_to,
            "Starting aggregation"
        );

        let raws = self.collect_all(listings, per_source).await;
        if raws.is_empty() {
            warn!("No articles collected from any source");
            return Ok(FetchResponse {
                category: request.category,
                total_fetched: 0,
                articles: Vec::new(),
            });
        }
        info!(count = raws.len(), "Collected raw articles; normalizing");

        let deadline = self
            .settings
            .fanout
            .pipeline_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let normalized = Normalizer::new(self.model, &self.settings.normalize)
            .normalize_batch(&raws, &request.category, deadline)
            .await;
        info!(normalized = normalized.len(), raw = raws.len(), "Normalization done");

        let mut articles = filter_by_date(normalized, &date_from, &date_to);
        articles.truncate(limit);
        info!(count = articles.len(), "Aggregation complete");

        Ok(FetchResponse {
            category: request.category,
            total_fetched: articles.len(),
            articles,
        })
    }

    /// Collect every listing concurrently; failed or slow sources yield nothing.
    async fn collect_all(&self, listings: &[Listing], per_source: usize) -> Vec<RawArticle> {
        let collector = SourceCollector::new(
            self.renderer,
            &self.settings.render,
            &self.settings.pagination,
            &self.settings.collect,
        );
        let collector = &collector;
        let budget = Duration::from_secs(self.settings.fanout.source_timeout_secs);

        let per_listing = stream::iter(listings)
            .map(|listing| async move {
                let source = listing.source.name.as_str();
                match timeout(budget, collector.collect(&listing.source, &listing.url, per_source)).await {
                    Ok(Ok(articles)) => {
                        info!(source, count = articles.len(), "Source collected");
                        articles
                    }
                    Ok(Err(e)) => {
                        warn!(source, error = %e, "Source failed; it contributes no articles");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(source, secs = budget.as_secs(), "Source timed out; it contributes no articles");
                        Vec::new()
                    }
                }
            })
            .buffered(self.settings.fanout.max_concurrent_sources.max(1))
            .collect::<Vec<_>>()
            .await;

        per_listing.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::ScriptedModel;
    use crate::render::fake::FakeRenderer;
    use crate::render::{InteractiveSession, RenderPolicy, SessionPolicy};
    use async_trait::async_trait;
    use serde_json::json;

    /// Delays every render whose URL starts with one of `delays`' prefixes.
    struct SlowHosts {
        inner: FakeRenderer,
        delays: Vec<(&'static str, Duration)>,
    }

    #[async_trait]
    impl Renderer for SlowHosts {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn render(&self, url: &str, policy: &RenderPolicy) -> NewsResult<String> {
            if let Some((_, delay)) = self.delays.iter().find(|(prefix, _)| url.starts_with(prefix)) {
                tokio::time::sleep(*delay).await;
            }
            self.inner.render(url, policy).await
        }

        async fn open_session(
            &self,
            url: &str,
            policy: &SessionPolicy,
        ) -> NewsResult<Box<dyn InteractiveSession>> {
            self.inner.open_session(url, policy).await
        }
    }

    const SETTINGS: &str = r#"
sources:
  alpha.uz:
    article_pattern: 'https://alpha\.uz/news/\d{4}/\d{2}/\d{2}/.+'
    pagination: { type: url_param, param: page }
  beta.uz:
    article_pattern: 'https://beta\.uz/\d{4}/\d{2}/\d{2}/.+'
categories:
  - name: sport
    sources:
      - { source: alpha.uz, url: "https://alpha.uz/sport" }
      - { source: beta.uz, url: "https://beta.uz/sport" }
  - name: empty
"#;

    fn setup() -> (Settings, Catalog) {
        let settings = Settings::from_yaml(SETTINGS).unwrap();
        let catalog = Catalog::from_settings(&settings).unwrap();
        (settings, catalog)
    }

    fn article_html(n: usize) -> String {
        format!(
            "<html><body><article><h1>Story {n}</h1><p>{}</p></article></body></html>",
            "Bugungi o'yin natijalari va murabbiy izohlari haqida batafsil. ".repeat(5)
        )
    }

    /// Listing at `listing` linking `urls`, each served as a full article.
    fn with_site(mut renderer: FakeRenderer, listing: &str, urls: &[String]) -> FakeRenderer {
        let links = urls
            .iter()
            .map(|u| format!(r#"<a href="{u}">x</a>"#))
            .collect::<String>();
        renderer = renderer.page(listing, &links);
        for (n, url) in urls.iter().enumerate() {
            renderer = renderer.page(url, &article_html(n));
        }
        renderer
    }

    fn alpha_urls(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("https://alpha.uz/news/2025/01/{:02}/story-{i}", 20 + i % 8))
            .collect()
    }

    fn beta_urls(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("https://beta.uz/2025/01/2{i}/item"))
            .collect()
    }

    fn model() -> ScriptedModel {
        ScriptedModel::always(Ok(json!({
            "title": "O'yin natijalari",
            "content": "Jamoa mavsumning eng muhim o'yinida ishonchli g'alaba qozondi.",
            "date_of_publication": null,
            "language": "uz",
        })
        .to_string()))
    }

    fn request(limit: usize) -> FetchRequest {
        FetchRequest {
            category: "sport".to_string(),
            limit: Some(limit),
            date_from: Some("2025-01-01".to_string()),
            date_to: Some("2025-01-31".to_string()),
        }
    }

    #[test]
    fn test_per_source_limit() {
        assert_eq!(per_source_limit(10, 2), 10);
        assert_eq!(per_source_limit(50, 6), 16);
        assert_eq!(per_source_limit(3, 4), 5);
        assert_eq!(per_source_limit(10, 0), 20);
    }

    #[test]
    fn test_date_filter() {
        let dated = |date: Option<&str>| NormalizedArticle {
            title: "t".to_string(),
            content: "c".to_string(),
            date_of_publication: date.map(str::to_string),
            category: "sport".to_string(),
            language: "uz".to_string(),
            source_url: format!("https://kun.uz/{date:?}"),
            source_name: "kun.uz".to_string(),
            image_url: None,
        };
        let kept = filter_by_date(
            vec![
                dated(Some("2025-01-15")),
                dated(None),
                dated(Some("2025-01-25")),
                dated(Some("2025-01-20")),
                dated(Some("2025-01-27")),
                dated(Some("2025-01-28")),
            ],
            "2025-01-20",
            "2025-01-27",
        );
        let dates = kept
            .iter()
            .map(|a| a.date_of_publication.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(
            dates,
            vec![None, Some("2025-01-25"), Some("2025-01-20"), Some("2025-01-27")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_sources_end_to_end() {
        let (settings, catalog) = setup();
        let renderer = with_site(FakeRenderer::new(), "https://alpha.uz/sport", &alpha_urls(8));
        let renderer = with_site(renderer, "https://beta.uz/sport", &beta_urls(3));
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        let response = aggregator.fetch(request(10)).await.unwrap();

        // 8 + 3 raw articles, each sent to the model once
        assert_eq!(model.calls(), 11);
        assert_eq!(response.category, "sport");
        assert_eq!(response.total_fetched, 10);
        assert_eq!(response.articles.len(), 10);
        assert_eq!(response.articles[0].source_name, "alpha.uz");
        assert_eq!(response.articles[8].source_name, "beta.uz");
        assert_eq!(
            response.articles[8].date_of_publication.as_deref(),
            Some("2025-01-20")
        );
        // alpha asked for a second listing page after falling short of 10
        assert!(
            renderer
                .rendered_urls()
                .contains(&"https://alpha.uz/sport?page=2".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_is_isolated() {
        let (settings, catalog) = setup();
        let renderer = FakeRenderer::new().failing("https://alpha.uz/sport");
        let renderer = with_site(renderer, "https://beta.uz/sport", &beta_urls(3));
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        let response = aggregator.fetch(request(10)).await.unwrap();

        assert_eq!(response.total_fetched, 3);
        assert!(response.articles.iter().all(|a| a.source_name == "beta.uz"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_while_others_finish() {
        let (mut settings, catalog) = setup();
        settings.fanout.source_timeout_secs = 15;
        let inner = with_site(FakeRenderer::new(), "https://alpha.uz/sport", &alpha_urls(8));
        let inner = with_site(inner, "https://beta.uz/sport", &beta_urls(3));
        // alpha needs 10s per page, beta 3s: listing plus 3 articles is 12s
        let renderer = SlowHosts {
            inner,
            delays: vec![
                ("https://alpha.uz/", Duration::from_secs(10)),
                ("https://beta.uz/", Duration::from_secs(3)),
            ],
        };
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        let started = Instant::now();
        let response = aggregator.fetch(request(10)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.total_fetched, 3);
        assert!(response.articles.iter().all(|a| a.source_name == "beta.uz"));
        assert_eq!(model.calls(), 3);
        // Collection ends with alpha's timeout, not after alpha and beta back to back
        assert!(elapsed >= Duration::from_secs(15), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(15 + 12), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_articles_are_dropped() {
        let (settings, catalog) = setup();
        let renderer = with_site(FakeRenderer::new(), "https://beta.uz/sport", &beta_urls(3));
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        let mut req = request(10);
        req.date_from = Some("2025-01-21".to_string());
        let response = aggregator.fetch(req).await.unwrap();

        let dates = response
            .articles
            .iter()
            .map(|a| a.date_of_publication.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(dates, vec!["2025-01-21", "2025-01-22"]);
    }

    #[tokio::test]
    async fn test_nothing_collected_is_an_empty_response() {
        let (settings, catalog) = setup();
        let renderer = FakeRenderer::new();
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        let response = aggregator.fetch(request(10)).await.unwrap();

        assert_eq!(response.total_fetched, 0);
        assert!(response.articles.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_categories_are_rejected() {
        let (settings, catalog) = setup();
        let renderer = FakeRenderer::new();
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        for category in ["weather", "empty"] {
            let mut req = request(10);
            req.category = category.to_string();
            match aggregator.fetch(req).await {
                Err(NewsError::UnknownCategory { category: c, available }) => {
                    assert_eq!(c, category);
                    assert_eq!(available, vec!["sport", "empty"]);
                }
                other => panic!("expected UnknownCategory, got {other:?}"),
            }
        }
        assert!(renderer.renders().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_dates_are_rejected_before_any_work() {
        let (settings, catalog) = setup();
        let renderer = FakeRenderer::new();
        let model = model();
        let aggregator = Aggregator::new(&settings, &catalog, &renderer, &model);

        for bad in ["2025-1-5", "yesterday", "2025-02-30"] {
            let mut req = request(10);
            req.date_to = Some(bad.to_string());
            assert!(matches!(
                aggregator.fetch(req).await,
                Err(NewsError::InvalidDate(_))
            ));
        }
        assert!(renderer.renders().is_empty());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-01-20").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()
        );
        assert!(parse_date("20-01-2025").is_err());
    }
}
