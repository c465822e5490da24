use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::browser::BrowserSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub scrolls: u32,
    pub target_found: bool,
    pub final_height: i64,
}

/// `true` for `target` itself or `target` followed by a space and a title,
/// so "KIP-1" matches "KIP-1 Launch" but not "KIP-12".
pub fn matches_target(text: &str, target: &str) -> bool {
    let text = text.trim();
    text == target
        || text
            .strip_prefix(target)
            .map(|rest| rest.starts_with(' '))
            .unwrap_or(false)
}

async fn target_present<S>(session: &S, link_selector: &str, target: &str) -> Result<bool>
where
    S: BrowserSession + ?Sized,
{
    let links = session.find_css(link_selector).await?;
    Ok(links.iter().any(|link| matches_target(&link.text, target)))
}

/// Scroll the lazy-loaded listing until a link matching `target` renders or
/// the document height stops growing between two consecutive scrolls.
pub async fn scroll_until_target<S>(
    session: &S,
    link_selector: &str,
    target: &str,
    pause: Duration,
) -> Result<ScrollOutcome>
where
    S: BrowserSession + ?Sized,
{
    let mut last_height = session.scroll_height().await?;
    let mut found = target_present(session, link_selector, target).await?;
    let mut scrolls = 0u32;

    while !found {
        session.scroll_to_bottom().await?;
        tokio::time::sleep(pause).await;
        scrolls += 1;
        info!("scroll #{scrolls}, looking for {target}");

        let new_height = session.scroll_height().await?;
        found = target_present(session, link_selector, target).await?;
        if new_height == last_height && !found {
            info!("reached the end of content without finding {target}");
            break;
        }
        last_height = new_height;
    }

    if found {
        info!("found {target} after {scrolls} scroll(s)");
    }
    Ok(ScrollOutcome {
        scrolls,
        target_found: found,
        final_height: last_height,
    })
}
