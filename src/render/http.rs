//! Plain HTTP engine.
//!
//! Fetches the server-rendered markup with `reqwest`. No JavaScript runs, so
//! the wait policy only contributes its timeout, and interactive sessions are
//! not available.

use super::{InteractiveSession, RenderPolicy, Renderer, SessionPolicy};
use crate::errors::{NewsError, NewsResult};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(user_agent: &str) -> NewsResult<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn render(&self, url: &str, policy: &RenderPolicy) -> NewsResult<String> {
        let response = self
            .client
            .get(url)
            .timeout(policy.timeout())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NewsError::render(url, e))?;
        let body = response.text().await.map_err(|e| NewsError::render(url, e))?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }

    async fn open_session(
        &self,
        _url: &str,
        _policy: &SessionPolicy,
    ) -> NewsResult<Box<dyn InteractiveSession>> {
        Err(NewsError::SessionUnsupported("http"))
    }
}
