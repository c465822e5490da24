//! Headless Chromium session driven over CDP by chromiumoxide.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrowserSession, ElementSnapshot};

/// Locate a Chromium/Chrome binary: explicit path, `CHROME` env var, then `PATH`.
pub fn find_chromium(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit.map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
        warn!("configured chrome_path {} does not exist", path.display());
    }
    if let Ok(p) = std::env::var("CHROME") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }
    None
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumSession {
    pub async fn launch(headless: bool, chrome_path: Option<&str>) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !headless {
            builder = builder.with_head();
        }
        if let Some(path) = find_chromium(chrome_path) {
            debug!("using browser binary {}", path.display());
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(anyhow!("failed to open browser tab: {err}"));
            }
        };

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    async fn snapshots(&self, script: String) -> Result<Vec<ElementSnapshot>> {
        let raw: String = self
            .page
            .evaluate(script)
            .await
            .context("element query failed")?
            .into_value()
            .map_err(|e| anyhow!("failed to convert element query result: {e:?}"))?;
        serde_json::from_str(&raw).context("element query returned malformed JSON")
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn css_query_script(selector: &str) -> String {
    format!(
        "JSON.stringify(Array.from(document.querySelectorAll({sel})).map(e => ({{ text: e.innerText || '', href: e.href || e.getAttribute('href') }})))",
        sel = js_string(selector)
    )
}

fn xpath_query_script(expression: &str) -> String {
    format!(
        "(() => {{ const r = document.evaluate({expr}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; for (let i = 0; i < r.snapshotLength; i++) {{ const e = r.snapshotItem(i); out.push({{ text: e.innerText || e.textContent || '', href: e.href || (e.getAttribute ? e.getAttribute('href') : null) }}); }} return JSON.stringify(out); }})()",
        expr = js_string(expression)
    )
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigation failed: {url}"))?;
        Ok(())
    }

    async fn find_css(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        self.snapshots(css_query_script(selector)).await
    }

    async fn find_xpath(&self, expression: &str) -> Result<Vec<ElementSnapshot>> {
        self.snapshots(xpath_query_script(expression)).await
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .context("scroll failed")?;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<i64> {
        self.page
            .evaluate("document.body.scrollHeight")
            .await
            .context("failed reading scroll height")?
            .into_value()
            .map_err(|e| anyhow!("failed to convert scroll height: {e:?}"))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self {
            mut browser,
            page,
            handler,
        } = *self;
        let _ = page.close().await;
        let closed = browser.close().await;
        let _ = browser.wait().await;
        handler.abort();
        closed.context("failed closing browser")?;
        Ok(())
    }
}
