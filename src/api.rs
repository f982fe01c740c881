//! Extraction model client with exponential backoff on rate limits.
//!
//! # Architecture
//!
//! - [`ExtractionModel`]: "complete a prompt and return text"
//! - [`ChatClient`]: OpenAI-compatible chat-completions client (Mistral by
//!   default), constructed explicitly with its key and model
//! - [`RetryModel`]: decorator that retries rate-limited calls
//!
//! # Retry Strategy
//!
//! Only [`ModelError::RateLimited`] is retried. With the default settings a
//! call is retried up to 5 times, waiting 2s, 4s, 8s, 16s and 32s in between:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter_ms)
//! ```
//! Every other failure is returned immediately.

use crate::errors::{ModelError, NewsResult};
use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Settings of the extraction model and its retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat-completions URL of an OpenAI-compatible service.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each backoff; 0 disables it.
    pub jitter_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            model: "mistral-small-latest".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 120,
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_ms: 0,
        }
    }
}

/// Something that can complete a prompt.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Chat-completions client.
pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> NewsResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

/// Map a non-success reply to the retry contract.
fn classify_failure(status: StatusCode, body: &str) -> ModelError {
    let message = format!("{status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate_limit") {
        ModelError::RateLimited(message)
    } else {
        ModelError::Fatal(message)
    }
}

#[async_trait]
impl ExtractionModel for ChatClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &body);
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %err, "API call failed");
            return Err(err);
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Fatal(format!("Failed to parse response: {e}")))?;
        if let Some(err) = reply.error {
            return Err(classify_failure(status, &err.message));
        }

        let content = reply
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Fatal("Response carried no choices".to_string()))?;
        debug!(elapsed_ms = t0.elapsed().as_millis(), chars = content.chars().count(), "API call succeeded");
        Ok(content)
    }
}

/// Adds exponential backoff on rate limits to any [`ExtractionModel`].
pub struct RetryModel<T> {
    inner: T,
    /// Retries after the first call; the total is `max_retries + 1` calls.
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ms: u64,
}

impl<T> RetryModel<T>
where
    T: ExtractionModel,
{
    #[cfg(test)]
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
            jitter_ms: 0,
        }
    }

    pub fn from_config(inner: T, config: &ModelConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ms: config.jitter_ms,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(31);
        let delay = self.base_delay.saturating_mul(1 << exponent).min(self.max_delay);
        if self.jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rng().random_range(0..=self.jitter_ms))
    }
}

impl<T> fmt::Debug for RetryModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryModel")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_ms", &self.jitter_ms)
            .finish()
    }
}

#[async_trait]
impl<T> ExtractionModel for RetryModel<T>
where
    T: ExtractionModel,
{
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.complete(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_rate_limited() => {
                    error!(attempt = attempt + 1, error = %e, "complete() failed; not retrying");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "complete() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "Rate limited; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted model for tests.

    use super::ExtractionModel;
    use crate::errors::ModelError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replies from a script, then repeats a final reply forever.
    pub struct ScriptedModel {
        script: Mutex<VecDeque<Result<String, ModelError>>>,
        then: Result<String, ModelError>,
        prompts: Mutex<Vec<String>>,
        call_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedModel {
        pub fn new(script: Vec<Result<String, ModelError>>, then: Result<String, ModelError>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                then,
                prompts: Mutex::new(Vec::new()),
                call_times: Mutex::new(Vec::new()),
            }
        }

        pub fn always(reply: Result<String, ModelError>) -> Self {
            Self::new(Vec::new(), reply)
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn call_times(&self) -> Vec<Instant> {
            self.call_times.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExtractionModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.call_times.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.then.clone())
        }
    }

    /// Lets tests keep a handle on a model they hand to a decorator.
    #[async_trait]
    impl<T: ExtractionModel> ExtractionModel for std::sync::Arc<T> {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            (**self).complete(prompt).await
        }
    }
}
