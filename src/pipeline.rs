//! Normalization of raw articles through the extraction model.
//!
//! Articles go through the model strictly one at a time, with a fixed pause
//! after every item. That serial loop is the rate-limiting contract with the
//! model service: [`crate::api::RetryModel`] handles the occasional 429, the
//! pacing keeps them occasional. Running items concurrently would need a
//! limiter in front of the model to keep that contract.

use crate::api::ExtractionModel;
use crate::models::{NormalizedArticle, RawArticle};
use crate::utils::{looks_truncated, truncate_for_log};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, instrument, warn};

static URL_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})/(\d{2})/(\d{2})/").expect("valid URL date regex"));

const PROMPT_TEMPLATE: &str = r#"You extract news articles from scraped web pages.

Rules:
1. Find the publication date and give it as YYYY-MM-DD. Look at page metadata,
   the URL (for example /2026/01/31/) and timestamps in the text. Use null only
   when there is no date reference at all.
2. "content" holds the cleaned article body in at most {max_content} characters.
   Summarize the key points when the article is longer.
3. Answer with a single JSON object and nothing else: no Markdown, no code
   fences, no commentary.

Answer format:
{
  "title": "Article title",
  "content": "Cleaned article text",
  "date_of_publication": "YYYY-MM-DD or null",
  "language": "uz/ru/en"
}

Drop navigation, advertising, footers, cookie notices and social media
widgets. Keep only the headline and the article body, and repair broken
encoding or formatting.

Source URL (may contain the date): {source_url}

Page text:
---
{raw_text}
---

JSON:"#;

/// Normalization policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Raw text shorter than this (trimmed) is not sent to the model.
    pub min_text_chars: usize,
    /// How much of the raw text the prompt carries.
    pub prompt_text_chars: usize,
    /// Extracted content shorter than this (trimmed) is rejected.
    pub min_content_chars: usize,
    /// Longer content is cut to this many characters, ellipsis included.
    pub max_content_chars: usize,
    /// Pause after every article.
    pub pacing_ms: u64,
    /// Ask once more when the reply is cut off mid-JSON. This costs a second
    /// model call for the article, so it is off by default.
    pub reask_on_truncation: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            prompt_text_chars: 8_000,
            min_content_chars: 50,
            max_content_chars: 1_500,
            pacing_ms: 1_000,
            reask_on_truncation: false,
        }
    }
}

impl NormalizeConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// The model's answer, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub title: String,
    pub content: String,
    pub date_of_publication: Option<String>,
    pub language: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    date_of_publication: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Why a model reply was not accepted.
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("reply is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reply has no {0}")]
    Missing(&'static str),

    #[error("content too short ({0} chars)")]
    ContentTooShort(usize),
}

pub fn build_prompt(text: &str, source_url: &str, config: &NormalizeConfig) -> String {
    let excerpt = text.chars().take(config.prompt_text_chars).collect::<String>();
    // Percent-encoded Cyrillic slugs are unreadable to the model
    let readable_url = urlencoding::decode(source_url)
        .map(|u| u.into_owned())
        .unwrap_or_else(|_| source_url.to_string());
    PROMPT_TEMPLATE
        .replace("{max_content}", &config.max_content_chars.to_string())
        .replace("{source_url}", &readable_url)
        .replace("{raw_text}", &excerpt)
}

/// Remove a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse and validate a model reply.
pub fn parse_extraction(reply: &str, min_content_chars: usize) -> Result<Extraction, Rejection> {
    let parsed: ExtractionReply = serde_json::from_str(strip_code_fence(reply))?;

    let title = parsed
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or(Rejection::Missing("title"))?;
    let content = parsed
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(Rejection::Missing("content"))?;
    let content_chars = content.trim().chars().count();
    if content_chars < min_content_chars {
        return Err(Rejection::ContentTooShort(content_chars));
    }

    Ok(Extraction {
        title,
        content,
        date_of_publication: parsed.date_of_publication.filter(|d| is_iso_date(d)),
        language: parsed
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// `YYYY-MM-DD` naming a real day. Anything else (including `"null"`) is no date.
fn is_iso_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Recover a date from a `/YYYY/MM/DD/` URL segment.
pub fn date_from_url(url: &str) -> Option<String> {
    URL_DATE_RE
        .captures(url)
        .map(|caps| format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]))
}

/// Cut `content` to `max` characters, the last three being `...`.
pub fn truncate_content(content: &str, max: usize) -> String {
    if content.chars().count() <= max {
        return content.to_string();
    }
    let kept = content.chars().take(max.saturating_sub(3)).collect::<String>();
    format!("{kept}...")
}

/// Turns [`RawArticle`]s into [`NormalizedArticle`]s.
pub struct Normalizer<'a> {
    model: &'a dyn ExtractionModel,
    config: &'a NormalizeConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(model: &'a dyn ExtractionModel, config: &'a NormalizeConfig) -> Self {
        Self { model, config }
    }

    /// Normalize one article; `None` when it is unusable for any reason.
    #[instrument(level = "info", skip_all, fields(url = %raw.url))]
    pub async fn normalize(&self, raw: &RawArticle, category: &str) -> Option<NormalizedArticle> {
        let text_chars = raw.text.trim().chars().count();
        if text_chars < self.config.min_text_chars {
            debug!(text_chars, "Raw text too short; skipping article");
            return None;
        }

        let prompt = build_prompt(&raw.text, &raw.url, self.config);
        let mut reply = self.ask(&prompt).await?;
        let mut parsed = parse_extraction(&reply, self.config.min_content_chars);

        if let Err(Rejection::Malformed(e)) = &parsed {
            if self.config.reask_on_truncation && looks_truncated(e) {
                warn!(error = %e, "EOF while parsing; re-asking once");
                reply = self.ask(&prompt).await?;
                parsed = parse_extraction(&reply, self.config.min_content_chars);
            }
        }

        let extraction = match parsed {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&reply, 300),
                    "Model returned non-conforming JSON; skipping article"
                );
                return None;
            }
        };

        let date_of_publication = extraction
            .date_of_publication
            .or_else(|| date_from_url(&raw.url));

        Some(NormalizedArticle {
            title: extraction.title,
            content: truncate_content(&extraction.content, self.config.max_content_chars),
            date_of_publication,
            category: category.to_string(),
            language: extraction.language,
            source_url: raw.url.clone(),
            source_name: raw.source_name.clone(),
            image_url: raw.image_url.clone(),
        })
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        match self.model.complete(prompt).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(error = %e, "Model call failed; skipping article");
                None
            }
        }
    }

    /// Normalize `raws` one at a time, pausing after each.
    ///
    /// When `deadline` passes, whatever has been normalized so far is returned.
    #[instrument(level = "info", skip_all, fields(category, total = raws.len()))]
    pub async fn normalize_batch(
        &self,
        raws: &[RawArticle],
        category: &str,
        deadline: Option<Instant>,
    ) -> Vec<NormalizedArticle> {
        let mut processed = Vec::new();

        for (i, raw) in raws.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(done = i, "Normalization deadline passed; returning partial results");
                break;
            }
            debug!(index = i, url = %raw.url, "Normalizing article");

            let result = match deadline {
                Some(d) => match timeout_at(d, self.normalize(raw, category)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(done = i, "Normalization deadline passed; returning partial results");
                        break;
                    }
                },
                None => self.normalize(raw, category).await,
            };

            match result {
                Some(article) => {
                    debug!(index = i, title = %truncate_for_log(&article.title, 60), "Article normalized");
                    processed.push(article);
                }
                None => debug!(index = i, "Article skipped"),
            }

            sleep(self.config.pacing()).await;
        }

        info!(
            normalized = processed.len(),
            skipped = raws.len() - processed.len(),
            "Normalization finished"
        );
        processed
    }
}
