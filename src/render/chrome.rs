//! Headless Chrome engine (chromiumoxide / CDP).
//!
//! The browser is launched lazily on first use and shared by every render;
//! each render and each interactive session gets a page of its own, so
//! navigation state never crosses collectors.

use super::{InteractiveSession, RenderConfig, RenderPolicy, Renderer, SessionPolicy, TriggerQuery, WaitUntil};
use crate::errors::{NewsError, NewsResult};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Common Chrome executable locations.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Attribute used to remember the located trigger between probe and click.
const TRIGGER_MARKER: &str = "data-news-fetcher-trigger";

/// Resolves once `document.readyState` reaches the wanted state.
const READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        const accept = __STATES__;
        if (accept.includes(document.readyState)) {
            resolve(document.readyState);
            return;
        }
        document.addEventListener('readystatechange', () => {
            if (accept.includes(document.readyState)) resolve(document.readyState);
        });
    })
"#;

/// Marks the first element matching a [`TriggerQuery`]; returns whether one was found.
const FIND_TRIGGER_SCRIPT: &str = r#"
    (() => {
        const query = __QUERY__;
        const marker = '__MARKER__';
        document.querySelectorAll('[' + marker + ']').forEach((el) => el.removeAttribute(marker));
        const visible = (el) => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
        const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
        let found = null;
        if (query.kind === 'text') {
            const needle = norm(query.text);
            found = Array.from(document.querySelectorAll(query.tag))
                .find((el) => visible(el) && norm(el.textContent).includes(needle)) || null;
        } else if (query.kind === 'aria_label') {
            const needle = norm(query.text);
            found = Array.from(document.querySelectorAll('[aria-label]'))
                .find((el) => visible(el) && norm(el.getAttribute('aria-label')).includes(needle)) || null;
        } else if (query.kind === 'last_numbered_link') {
            const links = Array.from(document.querySelectorAll('a[href*="page="], a[href*="?p="]'));
            found = links.length ? links[links.length - 1] : null;
        } else if (query.kind === 'selector') {
            try {
                found = Array.from(document.querySelectorAll(query.css)).find(visible) || null;
            } catch (e) {
                found = null;
            }
        }
        if (!found) return false;
        found.setAttribute(marker, '1');
        return true;
    })()
"#;

pub struct ChromeRenderer {
    config: RenderConfig,
    browser: OnceCell<Mutex<Browser>>,
}

impl ChromeRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            browser: OnceCell::new(),
        }
    }

    fn find_chrome(&self) -> NewsResult<PathBuf> {
        if let Some(path) = &self.config.chrome_executable {
            return Ok(PathBuf::from(path));
        }
        for path in CHROME_PATHS {
            if Path::new(path).exists() {
                return Ok(PathBuf::from(path));
            }
        }
        for cmd in ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }
        Err(NewsError::Config(
            "Chrome/Chromium not found; install it, set render.chrome_executable, or use the http renderer"
                .to_string(),
        ))
    }

    async fn launch(&self) -> NewsResult<Mutex<Browser>> {
        let chrome = self.find_chrome()?;
        info!(path = %chrome.display(), headless = self.config.headless, "Launching browser");

        let mut builder = BrowserConfig::builder().chrome_executable(chrome);
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }
        let config = builder.build().map_err(NewsError::Config)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| NewsError::Config(format!("Failed to launch browser: {e}")))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Mutex::new(browser))
    }

    async fn new_page(&self) -> NewsResult<Page> {
        let browser = self.browser.get_or_try_init(|| self.launch()).await?;
        let browser = browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| NewsError::render("about:blank", e))
    }

    async fn render_on(&self, page: &Page, url: &str, policy: &RenderPolicy) -> NewsResult<String> {
        page.execute(
            chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams::new(
                self.config.user_agent.clone(),
            ),
        )
        .await
        .map_err(|e| NewsError::render(url, e))?;
        navigate(page, url, policy.wait_until, policy.timeout()).await?;
        sleep(policy.settle()).await;
        page.content().await.map_err(|e| NewsError::render(url, e))
    }
}

/// Start navigation and wait for the lifecycle state `wait` maps to.
async fn navigate(page: &Page, url: &str, wait: WaitUntil, budget: Duration) -> NewsResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(|e| NewsError::invalid_url(url, e))?;
    let states = match wait {
        WaitUntil::Load => r#"["complete"]"#,
        WaitUntil::DomContentLoaded => r#"["interactive", "complete"]"#,
    };
    let script = READY_SCRIPT.replace("__STATES__", states);

    let load = async {
        page.execute(params)
            .await
            .map_err(|e| NewsError::render(url, e))?;
        let state = page
            .evaluate(script)
            .await
            .map_err(|e| NewsError::render(url, e))?;
        let state: String = state.into_value().unwrap_or_else(|_| "unknown".to_string());
        debug!(%url, %state, "Page ready");
        Ok::<(), NewsError>(())
    };
    match timeout(budget, load).await {
        Ok(result) => result,
        Err(_) => Err(NewsError::Timeout {
            what: format!("Navigation to {url}"),
            secs: budget.as_secs(),
        }),
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    fn name(&self) -> &'static str {
        "chrome"
    }

    #[instrument(level = "debug", skip_all, fields(%url, wait_until = ?policy.wait_until))]
    async fn render(&self, url: &str, policy: &RenderPolicy) -> NewsResult<String> {
        let page = self.new_page().await?;
        let result = self.render_on(&page, url, policy).await;
        if let Err(e) = page.close().await {
            debug!(%url, error = %e, "Failed to close page");
        }
        result
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn open_session(
        &self,
        url: &str,
        policy: &SessionPolicy,
    ) -> NewsResult<Box<dyn InteractiveSession>> {
        let page = self.new_page().await?;
        let opened = async {
            page.execute(EnableParams::default())
                .await
                .map_err(|e| NewsError::render(url, e))?;
            page.execute(SetBlockedUrLsParams::new(policy.blocked_resources.clone()))
                .await
                .map_err(|e| NewsError::render(url, e))?;
            navigate(&page, url, WaitUntil::Load, policy.timeout()).await
        }
        .await;

        match opened {
            Ok(()) => Ok(Box::new(ChromeSession {
                page: Some(page),
                url: url.to_string(),
            })),
            Err(e) => {
                let _ = page.close().await;
                Err(e)
            }
        }
    }
}

pub struct ChromeSession {
    page: Option<Page>,
    url: String,
}

impl ChromeSession {
    fn page(&self) -> NewsResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| NewsError::render(&self.url, "session already closed"))
    }
}

#[async_trait]
impl InteractiveSession for ChromeSession {
    async fn find_trigger(&mut self, query: &TriggerQuery) -> NewsResult<bool> {
        let script = FIND_TRIGGER_SCRIPT
            .replace("__QUERY__", &serde_json::to_string(query)?)
            .replace("__MARKER__", TRIGGER_MARKER);
        let found = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| NewsError::render(&self.url, e))?;
        Ok(found.into_value::<bool>().unwrap_or(false))
    }

    async fn activate_trigger(&mut self) -> NewsResult<()> {
        let selector = format!("[{TRIGGER_MARKER}]");
        let page = self.page()?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| NewsError::render(&self.url, e))?;
        element
            .click()
            .await
            .map_err(|e| NewsError::render(&self.url, e))?;
        Ok(())
    }

    async fn content(&mut self) -> NewsResult<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| NewsError::render(&self.url, e))
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!(url = %self.url, error = %e, "Failed to close session page");
            }
        }
    }
}
