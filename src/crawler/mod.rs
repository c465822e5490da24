//! Snapshot governance crawler.
//!
//! Scrolls the lazily rendered proposals listing until the oldest proposal
//! of interest shows up, then visits every matching proposal page and
//! scrapes its body, vote count and voting options.

pub mod extract;
pub mod scroll;

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::browser::chromium::ChromiumSession;
use crate::browser::{wait_for_css, BrowserSession};
use crate::config::CrawlerConfig;
use crate::crawler::extract::{extract_options, extract_votes, sort_by_identifier};
use crate::crawler::scroll::scroll_until_target;
use crate::output::csv::{write_proposals, ExportSummary};

pub const LINK_SELECTOR: &str = "a[href*='proposal/']";
pub const BODY_SELECTOR: &str = ".markdown-body";
pub const CONTENT_SELECTOR: &str = ".markdown-body.break-words.mb-4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalLink {
    pub text: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub text: String,
    pub href: String,
    pub content: String,
    pub votes: u64,
    pub options: Vec<String>,
}

impl Proposal {
    /// Stand-in row for a proposal whose page could not be scraped.
    pub fn placeholder(link: &ProposalLink) -> Self {
        Self {
            text: link.text.clone(),
            href: link.href.clone(),
            content: String::new(),
            votes: 0,
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub listing_url: String,
    pub prefix: String,
    pub stop_at: String,
    pub render_timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_pause: Duration,
    pub page_settle: Duration,
    pub request_pause: Duration,
}

impl From<&CrawlerConfig> for CrawlOptions {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            listing_url: config.listing_url.clone(),
            prefix: config.prefix.clone(),
            stop_at: config.stop_at.clone(),
            render_timeout: Duration::from_secs(config.render_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            scroll_pause: Duration::from_millis(config.scroll_pause_ms),
            page_settle: Duration::from_millis(config.page_settle_ms),
            request_pause: Duration::from_millis(config.request_pause_ms),
        }
    }
}

/// Rendered proposal links whose text starts with `prefix`, in render order.
pub async fn collect_links<S>(session: &S, prefix: &str) -> Result<Vec<ProposalLink>>
where
    S: BrowserSession + ?Sized,
{
    let elements = session.find_css(LINK_SELECTOR).await?;
    let mut links = Vec::new();
    for element in elements {
        let text = element.text.trim();
        if !text.starts_with(prefix) {
            continue;
        }
        let href = element.href.unwrap_or_default();
        info!("found: {text} - {href}");
        links.push(ProposalLink {
            text: text.to_string(),
            href,
        });
    }
    Ok(links)
}

async fn visit_proposal<S>(
    session: &mut S,
    link: &ProposalLink,
    opts: &CrawlOptions,
) -> Result<Proposal>
where
    S: BrowserSession + ?Sized,
{
    if link.href.is_empty() {
        return Err(anyhow!("proposal link has no href"));
    }
    session.navigate(&link.href).await?;
    tokio::time::sleep(opts.page_settle).await;

    wait_for_css(&*session, BODY_SELECTOR, opts.render_timeout, opts.poll_interval).await?;
    let content = session
        .find_css(CONTENT_SELECTOR)
        .await?
        .into_iter()
        .next()
        .map(|element| element.text)
        .ok_or_else(|| anyhow!("proposal body `{CONTENT_SELECTOR}` not found"))?;

    let votes = extract_votes(&*session).await;
    let options = extract_options(&*session).await;

    Ok(Proposal {
        text: link.text.clone(),
        href: link.href.clone(),
        content,
        votes,
        options,
    })
}

/// Run the full crawl against an already open session.
///
/// A listing that never renders is fatal; failures on an individual
/// proposal page degrade to [`Proposal::placeholder`].
pub async fn crawl_proposals<S>(session: &mut S, opts: &CrawlOptions) -> Result<Vec<Proposal>>
where
    S: BrowserSession + ?Sized,
{
    info!("navigating to {}", opts.listing_url);
    session
        .navigate(&opts.listing_url)
        .await
        .context("failed loading proposals listing")?;
    wait_for_css(&*session, LINK_SELECTOR, opts.render_timeout, opts.poll_interval).await?;

    info!("scrolling to load all proposals");
    scroll_until_target(&*session, LINK_SELECTOR, &opts.stop_at, opts.scroll_pause).await?;

    let links = collect_links(&*session, &opts.prefix).await?;
    info!("visiting {} proposal pages", links.len());

    let mut proposals = Vec::with_capacity(links.len());
    for (idx, link) in links.iter().enumerate() {
        info!("[{}/{}] processing: {}", idx + 1, links.len(), link.text);
        match visit_proposal(session, link, opts).await {
            Ok(proposal) => {
                info!(
                    "extracted: content length {}, votes {}, options {:?}",
                    proposal.content.len(),
                    proposal.votes,
                    proposal.options
                );
                proposals.push(proposal);
            }
            Err(err) => {
                warn!("error processing {}: {err:#}", link.text);
                proposals.push(Proposal::placeholder(link));
            }
        }
        tokio::time::sleep(opts.request_pause).await;
    }

    sort_by_identifier(&mut proposals, &opts.prefix, |p| p.text.as_str());
    Ok(proposals)
}

/// Crawl with `session` and close it afterwards, whether or not the crawl succeeded.
pub async fn crawl_and_close(
    mut session: Box<dyn BrowserSession>,
    opts: &CrawlOptions,
) -> Result<Vec<Proposal>> {
    let result = crawl_proposals(session.as_mut(), opts).await;
    match session.close().await {
        Ok(()) => info!("browser closed"),
        Err(err) => warn!("failed closing browser: {err:#}"),
    }
    result
}

pub async fn run(config: &CrawlerConfig, output: &Path) -> Result<(Vec<Proposal>, ExportSummary)> {
    let opts = CrawlOptions::from(config);
    let session =
        ChromiumSession::launch(config.headless, config.chrome_path.as_deref()).await?;
    let proposals = crawl_and_close(Box::new(session), &opts).await?;
    let summary = write_proposals(output, &proposals)?;
    Ok((proposals, summary))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::browser::ElementSnapshot;
    use crate::crawler::extract::VOTE_XPATH;

    pub(crate) const LISTING_URL: &str = "https://snapshot.test/#/klimadao.eth/proposals";

    #[derive(Default, Clone)]
    pub(crate) struct MockPage {
        pub body: Option<String>,
        pub vote_texts: Vec<String>,
        pub css: HashMap<String, Vec<String>>,
        pub xpath: HashMap<String, Vec<String>>,
    }

    /// Listing that reveals one more link per scroll, plus proposal pages by href.
    pub(crate) struct MockListing {
        links: Vec<ElementSnapshot>,
        visible: AtomicUsize,
        scrolls: AtomicUsize,
        pages: HashMap<String, MockPage>,
        current: Option<String>,
        pub closed: Arc<AtomicBool>,
    }

    impl MockListing {
        pub fn new(links: Vec<ElementSnapshot>, visible: usize) -> Self {
            Self {
                links,
                visible: AtomicUsize::new(visible),
                scrolls: AtomicUsize::new(0),
                pages: HashMap::new(),
                current: None,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        /// `KIP-n` down to `KIP-1`, newest first.
        pub fn descending(n: usize, visible: usize) -> Self {
            let links = (1..=n)
                .rev()
                .map(|i| ElementSnapshot::new(format!("KIP-{i}")).with_href(proposal_href(i)))
                .collect();
            Self::new(links, visible)
        }

        pub fn with_page(mut self, href: impl Into<String>, page: MockPage) -> Self {
            self.pages.insert(href.into(), page);
            self
        }

        pub fn scroll_count(&self) -> usize {
            self.scrolls.load(Ordering::SeqCst)
        }

        fn page(&self) -> Option<&MockPage> {
            self.current.as_ref().and_then(|url| self.pages.get(url))
        }

        fn on_listing(&self) -> bool {
            self.current.as_deref().map_or(true, |url| url == LISTING_URL)
        }
    }

    pub(crate) fn proposal_href(i: usize) -> String {
        format!("https://snapshot.test/#/klimadao.eth/proposal/0x{i:02x}")
    }

    fn snapshots(texts: &[String]) -> Vec<ElementSnapshot> {
        texts.iter().map(|t| ElementSnapshot::new(t.clone())).collect()
    }

    #[async_trait]
    impl BrowserSession for MockListing {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            if url != LISTING_URL && !self.pages.contains_key(url) {
                return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED at {url}"));
            }
            self.current = Some(url.to_string());
            Ok(())
        }

        async fn find_css(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
            if self.on_listing() {
                let visible = self.visible.load(Ordering::SeqCst).min(self.links.len());
                return Ok(self.links[..visible].to_vec());
            }
            let Some(page) = self.page() else {
                return Ok(Vec::new());
            };
            if selector == BODY_SELECTOR || selector == CONTENT_SELECTOR {
                return Ok(page.body.iter().cloned().map(ElementSnapshot::new).collect());
            }
            Ok(page.css.get(selector).map(|t| snapshots(t)).unwrap_or_default())
        }

        async fn find_xpath(&self, expression: &str) -> Result<Vec<ElementSnapshot>> {
            let Some(page) = self.page() else {
                return Ok(Vec::new());
            };
            if expression == VOTE_XPATH {
                return Ok(snapshots(&page.vote_texts));
            }
            Ok(page.xpath.get(expression).map(|t| snapshots(t)).unwrap_or_default())
        }

        async fn scroll_to_bottom(&self) -> Result<()> {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            let visible = self.visible.load(Ordering::SeqCst);
            if visible < self.links.len() {
                self.visible.store(visible + 1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn scroll_height(&self) -> Result<i64> {
            let visible = self.visible.load(Ordering::SeqCst).min(self.links.len());
            Ok(visible as i64 * 100)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn fast_options() -> CrawlOptions {
        CrawlOptions {
            listing_url: LISTING_URL.to_string(),
            prefix: "KIP".to_string(),
            stop_at: "KIP-1".to_string(),
            render_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            scroll_pause: Duration::ZERO,
            page_settle: Duration::ZERO,
            request_pause: Duration::ZERO,
        }
    }

    fn page(body: &str, votes: &str, options: &[&str]) -> MockPage {
        let mut css = HashMap::new();
        css.insert(
            extract::OPTION_STRATEGIES[0].selector.to_string(),
            options.iter().map(|o| o.to_string()).collect(),
        );
        MockPage {
            body: Some(body.to_string()),
            vote_texts: vec![votes.to_string()],
            css,
            xpath: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn crawls_sorts_and_degrades_failed_pages() {
        let mut links: Vec<ElementSnapshot> = (1..=4)
            .rev()
            .map(|i| ElementSnapshot::new(format!("KIP-{i}")).with_href(proposal_href(i)))
            .collect();
        links.insert(1, ElementSnapshot::new("Snapshot test vote").with_href(proposal_href(9)));

        let mut fallback = MockPage {
            body: Some("Adopt the fallback".to_string()),
            vote_texts: vec!["12 votes".to_string()],
            ..MockPage::default()
        };
        fallback.css.insert(
            "[class*='option']".to_string(),
            vec!["Results".into(), "Yes".into(), "No".into(), "Yes".into()],
        );

        let mut session = MockListing::new(links, 2)
            .with_page(proposal_href(4), page("Fourth", "40 votes", &["For", "Against"]))
            .with_page(proposal_href(2), fallback)
            .with_page(proposal_href(1), page("Genesis", "3 votes", &[]));
        // KIP-3 has no page registered: navigation fails.

        let proposals = crawl_proposals(&mut session, &fast_options())
            .await
            .expect("crawl succeeds");

        let texts: Vec<&str> = proposals.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["KIP-1", "KIP-2", "KIP-3", "KIP-4"]);

        assert_eq!(proposals[0].content, "Genesis");
        assert_eq!(proposals[0].votes, 3);
        assert!(proposals[0].options.is_empty());

        assert_eq!(proposals[1].votes, 12);
        assert_eq!(proposals[1].options, vec!["Yes", "No"]);

        assert_eq!(proposals[2], Proposal::placeholder(&ProposalLink {
            text: "KIP-3".to_string(),
            href: proposal_href(3),
        }));

        assert_eq!(proposals[3].options, vec!["For", "Against"]);
        assert_eq!(proposals[3].votes, 40);
    }

    #[tokio::test]
    async fn page_without_body_becomes_placeholder() {
        let mut session = MockListing::descending(1, 1).with_page(proposal_href(1), MockPage::default());
        let proposals = crawl_proposals(&mut session, &fast_options())
            .await
            .expect("crawl succeeds");
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].content, "");
        assert_eq!(proposals[0].votes, 0);
    }

    #[tokio::test]
    async fn session_is_closed_when_listing_never_renders() {
        let session = MockListing::new(Vec::new(), 0);
        let closed = Arc::clone(&session.closed);
        let err = crawl_and_close(Box::new(session), &fast_options())
            .await
            .expect_err("empty listing times out");
        assert!(err.downcast_ref::<crate::browser::RenderTimeout>().is_some());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_is_closed_after_successful_crawl() {
        let session = MockListing::descending(1, 1)
            .with_page(proposal_href(1), page("Genesis", "1 vote", &["Yes"]));
        let closed = Arc::clone(&session.closed);
        let proposals = crawl_and_close(Box::new(session), &fast_options())
            .await
            .expect("crawl succeeds");
        assert_eq!(proposals.len(), 1);
        assert!(closed.load(Ordering::SeqCst));
    }
}
