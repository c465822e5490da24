//! Rendering-session abstraction for the proposal crawler.
//!
//! The crawler only needs a handful of interactions with a rendered page:
//! navigate, query elements by CSS or XPath, scroll, and read the document
//! height. `BrowserSession` captures exactly that so the crawl logic can run
//! against Chromium in production and an in-memory page in tests.

pub mod chromium;

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text and link target of one rendered element at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
}

impl ElementSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            href: None,
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in the session's single tab.
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Elements matching a CSS selector, in document order.
    async fn find_css(&self, selector: &str) -> Result<Vec<ElementSnapshot>>;
    /// Elements matching an XPath expression, in document order.
    async fn find_xpath(&self, expression: &str) -> Result<Vec<ElementSnapshot>>;
    async fn scroll_to_bottom(&self) -> Result<()>;
    async fn scroll_height(&self) -> Result<i64>;
    /// Tear the session down. Called exactly once by the owner.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for `{selector}` to render")]
pub struct RenderTimeout {
    pub selector: String,
    pub waited: Duration,
}

/// Poll until `selector` matches at least one element or `timeout` elapses.
///
/// Query errors while polling count as "not yet rendered"; only the timeout
/// is reported, as a [`RenderTimeout`].
pub async fn wait_for_css<S>(
    session: &S,
    selector: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<Vec<ElementSnapshot>>
where
    S: BrowserSession + ?Sized,
{
    let started = Instant::now();
    loop {
        if let Ok(found) = session.find_css(selector).await {
            if !found.is_empty() {
                return Ok(found);
            }
        }
        if started.elapsed() >= timeout {
            return Err(RenderTimeout {
                selector: selector.to_string(),
                waited: started.elapsed(),
            }
            .into());
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct SlowPage {
        polls: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl BrowserSession for SlowPage {
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn find_css(&self, _selector: &str) -> Result<Vec<ElementSnapshot>> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if seen >= self.ready_after {
                Ok(vec![ElementSnapshot::new("KIP-3")])
            } else {
                Ok(Vec::new())
            }
        }

        async fn find_xpath(&self, _expression: &str) -> Result<Vec<ElementSnapshot>> {
            Ok(Vec::new())
        }

        async fn scroll_to_bottom(&self) -> Result<()> {
            Ok(())
        }

        async fn scroll_height(&self) -> Result<i64> {
            Ok(0)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn wait_returns_once_elements_render() {
        let page = SlowPage {
            polls: AtomicUsize::new(0),
            ready_after: 3,
        };
        let found = wait_for_css(&page, "a", Duration::from_secs(5), Duration::ZERO)
            .await
            .expect("elements render on third poll");
        assert_eq!(found.len(), 1);
        assert_eq!(page.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_reports_render_timeout() {
        let page = SlowPage {
            polls: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };
        let err = wait_for_css(
            &page,
            "a[href*='proposal/']",
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .await
        .expect_err("listing never renders");
        let timeout = err
            .downcast_ref::<RenderTimeout>()
            .expect("error is a RenderTimeout");
        assert_eq!(timeout.selector, "a[href*='proposal/']");
        assert!(timeout.waited >= Duration::from_millis(20));
    }
}
