//! Page rendering engines.
//!
//! Everything that turns a URL into HTML goes through the [`Renderer`]
//! trait, so the collection logic never depends on a particular engine:
//!
//! | Engine | Module | JavaScript | Interactive sessions |
//! |--------|--------|------------|----------------------|
//! | Headless Chrome | [`chrome`] | yes | yes |
//! | Plain HTTP | [`http`] | no | no |
//!
//! Listing pages are rendered with two wait policies in sequence: a "full
//! load" policy and, when that fails, a faster "DOM content loaded" policy
//! for sites that never go quiet. See [`render_with_fallback`].

use crate::errors::{NewsError, NewsResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{instrument, warn};

#[cfg(feature = "browser")]
pub mod chrome;
#[cfg(test)]
pub mod fake;
pub mod http;

/// Page lifecycle event a render waits for before the settle delay starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    /// The `load` event: every subresource finished.
    #[default]
    Load,
    /// `DOMContentLoaded`: markup parsed, subresources may still be pending.
    DomContentLoaded,
}

/// How long and how patiently to render a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPolicy {
    pub wait_until: WaitUntil,
    pub timeout_ms: u64,
    /// Extra wait after the lifecycle event so client-side scripts can render.
    pub settle_ms: u64,
}

impl RenderPolicy {
    /// Primary tier: full load, 30s budget, 2s settle.
    pub fn full_load() -> Self {
        Self {
            wait_until: WaitUntil::Load,
            timeout_ms: 30_000,
            settle_ms: 2_000,
        }
    }

    /// Fallback tier: DOM content loaded, 20s budget, 3s settle.
    pub fn content_loaded() -> Self {
        Self {
            wait_until: WaitUntil::DomContentLoaded,
            timeout_ms: 20_000,
            settle_ms: 3_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Settings for a long-lived interactive session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Budget for the initial navigation.
    pub timeout_ms: u64,
    /// URL patterns the session refuses to load (images, fonts, styles).
    pub blocked_resources: Vec<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            blocked_resources: [
                "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.css", "*.woff",
                "*.woff2",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl SessionPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One way of locating a "load more" control on a rendered page.
///
/// Serialized to JSON and handed to the page script by the Chrome engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerQuery {
    /// First visible `tag` element whose text contains `text` (case-insensitive).
    Text { tag: String, text: String },
    /// First visible element whose `aria-label` contains `text`.
    AriaLabel { text: String },
    /// The last link into a numbered pagination (`page=` / `?p=`).
    LastNumberedLink,
    /// First visible element matching a CSS selector.
    Selector { css: String },
}

/// Renders URLs into HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Short engine name for logs and errors.
    fn name(&self) -> &'static str;

    /// Load `url` under `policy` and return the resulting HTML.
    async fn render(&self, url: &str, policy: &RenderPolicy) -> NewsResult<String>;

    /// Open a session on `url` that can be clicked through.
    ///
    /// Every session owns its own page; sessions are never shared between
    /// concurrent collectors.
    async fn open_session(
        &self,
        url: &str,
        policy: &SessionPolicy,
    ) -> NewsResult<Box<dyn InteractiveSession>>;
}

/// A rendered page that stays open between interactions.
#[async_trait]
pub trait InteractiveSession: Send {
    /// Look for an element matching `query`; remembers it for [`Self::activate_trigger`].
    async fn find_trigger(&mut self, query: &TriggerQuery) -> NewsResult<bool>;

    /// Click the element remembered by the last successful [`Self::find_trigger`].
    async fn activate_trigger(&mut self) -> NewsResult<()>;

    /// Current HTML of the page.
    async fn content(&mut self) -> NewsResult<String>;

    /// Release the page. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Render with one policy, enforcing its time budget regardless of engine.
pub async fn render_with_policy(
    renderer: &dyn Renderer,
    url: &str,
    policy: &RenderPolicy,
) -> NewsResult<String> {
    let budget = policy.timeout() + policy.settle();
    match timeout(budget, renderer.render(url, policy)).await {
        Ok(result) => result,
        Err(_) => Err(NewsError::Timeout {
            what: format!("Rendering {url}"),
            secs: budget.as_secs(),
        }),
    }
}

/// Render with the primary policy, retrying once with the fallback policy.
#[instrument(level = "info", skip_all, fields(%url, engine = renderer.name()))]
pub async fn render_with_fallback(
    renderer: &dyn Renderer,
    url: &str,
    primary: &RenderPolicy,
    fallback: &RenderPolicy,
) -> NewsResult<String> {
    match render_with_policy(renderer, url, primary).await {
        Ok(html) => Ok(html),
        Err(e) => {
            warn!(error = %e, wait_until = ?fallback.wait_until, "Primary render failed; retrying with fallback policy");
            render_with_policy(renderer, url, fallback).await
        }
    }
}

/// Which engine to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Chrome,
    Http,
}

impl Default for RendererKind {
    fn default() -> Self {
        if cfg!(feature = "browser") {
            RendererKind::Chrome
        } else {
            RendererKind::Http
        }
    }
}

/// Engine settings shared by every renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub engine: RendererKind,
    pub primary: RenderPolicy,
    pub fallback: RenderPolicy,
    pub session: SessionPolicy,
    pub user_agent: String,
    /// Chrome binary; looked up in common locations when absent.
    pub chrome_executable: Option<String>,
    pub chrome_args: Vec<String>,
    pub headless: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: RendererKind::default(),
            primary: RenderPolicy::full_load(),
            fallback: RenderPolicy::content_loaded(),
            session: SessionPolicy::default(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            chrome_executable: None,
            chrome_args: Vec::new(),
            headless: true,
        }
    }
}

/// Build the configured engine.
pub fn build_renderer(config: &RenderConfig) -> NewsResult<Box<dyn Renderer>> {
    match config.engine {
        RendererKind::Http => Ok(Box::new(http::HttpRenderer::new(&config.user_agent)?)),
        #[cfg(feature = "browser")]
        RendererKind::Chrome => Ok(Box::new(chrome::ChromeRenderer::new(config.clone()))),
        #[cfg(not(feature = "browser"))]
        RendererKind::Chrome => {
            warn!("Chrome support not compiled in (enable the `browser` feature); using the HTTP renderer");
            Ok(Box::new(http::HttpRenderer::new(&config.user_agent)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRenderer;
    use super::*;

    #[tokio::test]
    async fn test_primary_policy_used_when_it_succeeds() {
        let renderer = FakeRenderer::new().page("https://kun.uz/sport", "<html>ok</html>");
        let html = render_with_fallback(
            &renderer,
            "https://kun.uz/sport",
            &RenderPolicy::full_load(),
            &RenderPolicy::content_loaded(),
        )
        .await
        .unwrap();
        assert_eq!(html, "<html>ok</html>");
        assert_eq!(renderer.renders(), vec![("https://kun.uz/sport".to_string(), WaitUntil::Load)]);
    }

    #[tokio::test]
    async fn test_fallback_policy_after_primary_failure() {
        let renderer = FakeRenderer::new()
            .page("https://kun.uz/sport", "<html>late</html>")
            .failing_under(WaitUntil::Load);
        let html = render_with_fallback(
            &renderer,
            "https://kun.uz/sport",
            &RenderPolicy::full_load(),
            &RenderPolicy::content_loaded(),
        )
        .await
        .unwrap();
        assert_eq!(html, "<html>late</html>");
        assert_eq!(
            renderer.renders(),
            vec![
                ("https://kun.uz/sport".to_string(), WaitUntil::Load),
                ("https://kun.uz/sport".to_string(), WaitUntil::DomContentLoaded),
            ]
        );
    }

    #[tokio::test]
    async fn test_both_policies_failing_is_an_error() {
        let renderer = FakeRenderer::new();
        let result = render_with_fallback(
            &renderer,
            "https://kun.uz/missing",
            &RenderPolicy::full_load(),
            &RenderPolicy::content_loaded(),
        )
        .await;
        assert!(matches!(result, Err(NewsError::Render { .. })));
    }

    #[test]
    fn test_default_policies() {
        let config = RenderConfig::default();
        assert_eq!(config.primary.timeout(), Duration::from_secs(30));
        assert_eq!(config.primary.settle(), Duration::from_secs(2));
        assert_eq!(config.fallback.wait_until, WaitUntil::DomContentLoaded);
        assert_eq!(config.fallback.timeout(), Duration::from_secs(20));
        assert_eq!(config.fallback.settle(), Duration::from_secs(3));
        assert!(config.session.blocked_resources.contains(&"*.woff2".to_string()));
    }

    #[test]
    fn test_trigger_query_json_shape() {
        let query = TriggerQuery::Text {
            tag: "button".to_string(),
            text: "load more".to_string(),
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["tag"], "button");
        let json = serde_json::to_value(TriggerQuery::LastNumberedLink).unwrap();
        assert_eq!(json["kind"], "last_numbered_link");
    }
}
