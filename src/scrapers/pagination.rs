//! Pagination driver.
//!
//! Starting from the links of a category's first listing page, keeps pulling
//! more listing content until enough article links are known or the source
//! stops yielding new ones. Which mechanism is used is decided by the
//! source's [`PaginationStrategy`]; the driver never guesses.
//!
//! ```text
//! Initial ──► Paging ──► Done(StopReason)
//!    │                      ▲
//!    └── none / satisfied ──┘
//! ```

use crate::errors::{NewsError, NewsResult};
use crate::models::{LinkSet, PaginationStrategy, SourceSpec};
use crate::render::{InteractiveSession, RenderConfig, Renderer, TriggerQuery, render_with_fallback};
use crate::scrapers::links::{QueryHandling, extract_article_links};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// "Load more" wording seen on the configured sites, plus the usual English.
const TRIGGER_SYNONYMS: &[&str] = &[
    "показать ещё",
    "показать еще",
    "показать больше",
    "загрузить ещё",
    "загрузить еще",
    "ko'proq",
    "keyingi",
    "load more",
    "show more",
    "next",
    "далее",
    "следующая",
    "следующий",
];

const TRIGGER_SELECTORS: &[&str] = &[
    ".pagination .next",
    ".paginate .next",
    ".nav-pagination .next",
    "[class*='pagination'] [class*='next']",
    "[class*='paginate'] [class*='next']",
    ".btn-load-more",
    "[class*='load-more']",
    "[class*='loadmore']",
];

/// Limits of one pagination run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Listing pages tried after the first one (`?page=2` onwards).
    pub max_url_pages: usize,
    /// Trigger activations per interactive session.
    pub max_interactions: usize,
    /// Wait after each activation for new items to render.
    pub settle_delay_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_url_pages: 10,
            max_interactions: 10,
            settle_delay_ms: 2_500,
        }
    }
}

impl PaginationConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source has no pagination strategy.
    NotPaginated,
    /// Enough links were gathered.
    Satisfied,
    /// A listing page added no new links.
    Exhausted,
    /// No "load more" control could be located.
    NoTrigger,
    /// The round limit was reached.
    MaxRounds,
    /// A page or session failed; links gathered so far are kept.
    Failed,
}

#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    pub links: LinkSet,
    pub stop: StopReason,
    /// Listing pages fetched or triggers activated.
    pub rounds: usize,
}

/// Set `param` to `page` in `url`, replacing an existing value or appending it.
///
/// Other query parameters keep their order.
pub fn build_paginated_url(url: &str, param: &str, page: usize) -> NewsResult<String> {
    let mut parsed = Url::parse(url).map_err(|e| NewsError::invalid_url(url, e))?;
    let page = page.to_string();

    let mut replaced = false;
    let mut pairs = Vec::new();
    for (key, value) in parsed.query_pairs().into_owned() {
        if key == param {
            replaced = true;
            pairs.push((key, page.clone()));
        } else {
            pairs.push((key, value));
        }
    }
    if !replaced {
        pairs.push((param.to_string(), page));
    }

    parsed.query_pairs_mut().clear().extend_pairs(&pairs);
    Ok(parsed.to_string())
}

/// Trigger queries in search order.
///
/// 1. configured labels, on buttons then links
/// 2. known synonyms, on buttons then links
/// 3. `aria-label`s containing a synonym
/// 4. the last numbered pagination link
/// 5. structural pagination / "load more" selectors
pub fn trigger_queries(labels: &[String]) -> Vec<TriggerQuery> {
    let text_queries = |text: &str| {
        ["button", "a"].map(|tag| TriggerQuery::Text {
            tag: tag.to_string(),
            text: text.to_string(),
        })
    };

    let mut queries = Vec::new();
    for label in labels {
        queries.extend(text_queries(label));
    }
    for synonym in TRIGGER_SYNONYMS {
        queries.extend(text_queries(synonym));
    }
    queries.extend(TRIGGER_SYNONYMS.iter().map(|synonym| TriggerQuery::AriaLabel {
        text: synonym.to_string(),
    }));
    queries.push(TriggerQuery::LastNumberedLink);
    queries.extend(TRIGGER_SELECTORS.iter().map(|css| TriggerQuery::Selector {
        css: css.to_string(),
    }));
    queries
}

/// Drives one source's pagination.
///
/// Borrowed per collection run; the renderer is shared, sessions are not.
pub struct Paginator<'a> {
    renderer: &'a dyn Renderer,
    render: &'a RenderConfig,
    config: &'a PaginationConfig,
}

impl<'a> Paginator<'a> {
    pub fn new(renderer: &'a dyn Renderer, render: &'a RenderConfig, config: &'a PaginationConfig) -> Self {
        Self {
            renderer,
            render,
            config,
        }
    }

    /// Grow `initial` towards `needed` links.
    #[instrument(level = "info", skip_all, fields(source = %source.name, %listing_url, needed))]
    pub async fn paginate(
        &self,
        source: &SourceSpec,
        listing_url: &Url,
        initial: LinkSet,
        needed: usize,
    ) -> PaginationOutcome {
        if initial.len() >= needed {
            return PaginationOutcome {
                links: initial,
                stop: StopReason::Satisfied,
                rounds: 0,
            };
        }

        let outcome = match &source.pagination {
            PaginationStrategy::NoPagination => PaginationOutcome {
                links: initial,
                stop: StopReason::NotPaginated,
                rounds: 0,
            },
            PaginationStrategy::UrlParam { param } => {
                self.by_url_param(source, listing_url, param, initial, needed)
                    .await
            }
            PaginationStrategy::Interactive { triggers } => {
                self.by_interaction(source, listing_url, triggers, initial, needed)
                    .await
            }
        };

        info!(
            links = outcome.links.len(),
            rounds = outcome.rounds,
            stop = ?outcome.stop,
            "Pagination finished"
        );
        outcome
    }

    async fn by_url_param(
        &self,
        source: &SourceSpec,
        listing_url: &Url,
        param: &str,
        mut links: LinkSet,
        needed: usize,
    ) -> PaginationOutcome {
        let mut rounds = 0;

        for page in 2..2 + self.config.max_url_pages {
            if links.len() >= needed {
                return PaginationOutcome {
                    links,
                    stop: StopReason::Satisfied,
                    rounds,
                };
            }

            let page_url = match build_paginated_url(listing_url.as_str(), param, page) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "Cannot build listing page URL");
                    return PaginationOutcome {
                        links,
                        stop: StopReason::Failed,
                        rounds,
                    };
                }
            };
            rounds += 1;

            let html = match render_with_fallback(
                self.renderer,
                &page_url,
                &self.render.primary,
                &self.render.fallback,
            )
            .await
            {
                Ok(html) => html,
                Err(e) => {
                    warn!(%page_url, error = %e, "Listing page failed; keeping links gathered so far");
                    return PaginationOutcome {
                        links,
                        stop: StopReason::Failed,
                        rounds,
                    };
                }
            };

            // Stripped like the first listing pass; only session captures keep queries
            let found = extract_article_links(&html, listing_url, &source.shape, QueryHandling::Strip);
            let added = links.merge(found);
            debug!(page, added, total = links.len(), "Merged listing page");
            if added == 0 {
                return PaginationOutcome {
                    links,
                    stop: StopReason::Exhausted,
                    rounds,
                };
            }
        }

        let stop = if links.len() >= needed {
            StopReason::Satisfied
        } else {
            StopReason::MaxRounds
        };
        PaginationOutcome { links, stop, rounds }
    }

    async fn by_interaction(
        &self,
        source: &SourceSpec,
        listing_url: &Url,
        labels: &[String],
        mut links: LinkSet,
        needed: usize,
    ) -> PaginationOutcome {
        let mut session = match self
            .renderer
            .open_session(listing_url.as_str(), &self.render.session)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Cannot open interactive session");
                return PaginationOutcome {
                    links,
                    stop: StopReason::Failed,
                    rounds: 0,
                };
            }
        };

        let queries = trigger_queries(labels);
        let mut rounds = 0;
        let stop = loop {
            if links.len() >= needed {
                break StopReason::Satisfied;
            }
            if rounds >= self.config.max_interactions {
                break StopReason::MaxRounds;
            }
            match self
                .interact_once(session.as_mut(), &queries, source, listing_url, &mut links)
                .await
            {
                Ok(true) => rounds += 1,
                Ok(false) => break StopReason::NoTrigger,
                Err(e) => {
                    warn!(error = %e, rounds, "Interactive pagination failed; keeping links gathered so far");
                    break StopReason::Failed;
                }
            }
        };

        session.close().await;
        PaginationOutcome { links, stop, rounds }
    }

    /// One click-and-harvest round; `Ok(false)` when no trigger is present.
    async fn interact_once(
        &self,
        session: &mut dyn InteractiveSession,
        queries: &[TriggerQuery],
        source: &SourceSpec,
        listing_url: &Url,
        links: &mut LinkSet,
    ) -> NewsResult<bool> {
        let mut located = None;
        for query in queries {
            if session.find_trigger(query).await? {
                located = Some(query);
                break;
            }
        }
        let Some(query) = located else {
            return Ok(false);
        };

        debug!(?query, "Activating trigger");
        session.activate_trigger().await?;
        sleep(self.config.settle_delay()).await;

        let html = session.content().await?;
        let found = extract_article_links(&html, listing_url, &source.shape, QueryHandling::Keep);
        let added = links.merge(found);
        debug!(added, total = links.len(), "Merged session page");
        Ok(true)
    }
}
