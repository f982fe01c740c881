//! In-memory renderer for tests.

use super::{InteractiveSession, RenderPolicy, Renderer, SessionPolicy, TriggerQuery, WaitUntil};
use crate::errors::{NewsError, NewsResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct ScriptedSession {
    /// Text of the only trigger this page has.
    label: String,
    /// Page HTML after each successive click.
    snapshots: Vec<String>,
}

/// Serves canned HTML and scripted "load more" sessions.
#[derive(Debug, Default)]
pub struct FakeRenderer {
    pages: HashMap<String, String>,
    failing_urls: HashSet<String>,
    failing_wait: Option<WaitUntil>,
    sessions: HashMap<String, ScriptedSession>,
    renders: Mutex<Vec<(String, WaitUntil)>>,
    probes: Arc<Mutex<Vec<TriggerQuery>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    /// Every render using this wait policy fails.
    pub fn failing_under(mut self, wait: WaitUntil) -> Self {
        self.failing_wait = Some(wait);
        self
    }

    /// A session on `url` starts from `page(url)` and has one trigger labelled
    /// `label`; each click swaps in the next snapshot until they run out.
    pub fn session(mut self, url: &str, label: &str, snapshots: Vec<String>) -> Self {
        self.sessions.insert(
            url.to_string(),
            ScriptedSession {
                label: label.to_string(),
                snapshots,
            },
        );
        self
    }

    pub fn renders(&self) -> Vec<(String, WaitUntil)> {
        self.renders.lock().unwrap().clone()
    }

    pub fn rendered_urls(&self) -> Vec<String> {
        self.renders().into_iter().map(|(url, _)| url).collect()
    }

    pub fn probes(&self) -> Vec<TriggerQuery> {
        self.probes.lock().unwrap().clone()
    }

    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn render(&self, url: &str, policy: &RenderPolicy) -> NewsResult<String> {
        self.renders
            .lock()
            .unwrap()
            .push((url.to_string(), policy.wait_until));
        if self.failing_urls.contains(url) || self.failing_wait == Some(policy.wait_until) {
            return Err(NewsError::render(url, "simulated failure"));
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| NewsError::render(url, "no such page"))
    }

    async fn open_session(
        &self,
        url: &str,
        _policy: &SessionPolicy,
    ) -> NewsResult<Box<dyn InteractiveSession>> {
        let script = self
            .sessions
            .get(url)
            .cloned()
            .ok_or(NewsError::SessionUnsupported("fake"))?;
        let current = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| NewsError::render(url, "no such page"))?;
        Ok(Box::new(FakeSession {
            label: script.label.to_lowercase(),
            current,
            remaining: script.snapshots.into(),
            armed: false,
            probes: Arc::clone(&self.probes),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    label: String,
    current: String,
    remaining: VecDeque<String>,
    armed: bool,
    probes: Arc<Mutex<Vec<TriggerQuery>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl InteractiveSession for FakeSession {
    async fn find_trigger(&mut self, query: &TriggerQuery) -> NewsResult<bool> {
        self.probes.lock().unwrap().push(query.clone());
        let matches = match query {
            TriggerQuery::Text { text, .. } => self.label.contains(&text.to_lowercase()),
            _ => false,
        };
        self.armed = matches && !self.remaining.is_empty();
        Ok(self.armed)
    }

    async fn activate_trigger(&mut self) -> NewsResult<()> {
        if !self.armed {
            return Err(NewsError::render("session", "no trigger located"));
        }
        if let Some(next) = self.remaining.pop_front() {
            self.current = next;
        }
        self.armed = false;
        Ok(())
    }

    async fn content(&mut self) -> NewsResult<String> {
        Ok(self.current.clone())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
