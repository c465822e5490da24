use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::browser::{BrowserSession, ElementSnapshot};

pub const VOTE_XPATH: &str = "//*[contains(text(), 'vote') or contains(text(), 'votes')]";
pub const OPTION_PLACEHOLDER: &str = "Results";

static FIRST_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("static regex compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Css,
    XPath,
}

/// One way of locating the voting-option labels on a proposal page.
#[derive(Debug, Clone, Copy)]
pub struct OptionStrategy {
    pub name: &'static str,
    pub kind: SelectorKind,
    pub selector: &'static str,
    /// Drop the "Results" heading and repeated labels.
    pub filter_labels: bool,
}

/// Tried in order; the first strategy yielding any label wins.
pub const OPTION_STRATEGIES: [OptionStrategy; 3] = [
    OptionStrategy {
        name: "choice row",
        kind: SelectorKind::Css,
        selector: r"div.flex.gap-2.border.rounded-lg.px-3.py-2\.5.last\:mb-0.text-skin-link.relative.overflow-hidden.items-center",
        filter_labels: false,
    },
    OptionStrategy {
        name: "option class",
        kind: SelectorKind::Css,
        selector: "[class*='option']",
        filter_labels: true,
    },
    OptionStrategy {
        name: "option div",
        kind: SelectorKind::XPath,
        selector: "//div[contains(@class, 'option')]",
        filter_labels: true,
    },
];

impl OptionStrategy {
    pub fn labels(&self, elements: &[ElementSnapshot]) -> Option<Vec<String>> {
        let mut labels: Vec<String> = Vec::new();
        for element in elements {
            let text = element.text.trim();
            if text.is_empty() {
                continue;
            }
            if self.filter_labels
                && (text == OPTION_PLACEHOLDER || labels.iter().any(|seen| seen == text))
            {
                continue;
            }
            labels.push(text.to_string());
        }
        if labels.is_empty() {
            None
        } else {
            Some(labels)
        }
    }

    async fn attempt<S>(&self, session: &S) -> Option<Vec<String>>
    where
        S: BrowserSession + ?Sized,
    {
        let found = match self.kind {
            SelectorKind::Css => session.find_css(self.selector).await,
            SelectorKind::XPath => session.find_xpath(self.selector).await,
        };
        match found {
            Ok(elements) => self.labels(&elements),
            Err(err) => {
                warn!("option lookup via {} failed: {err}", self.name);
                None
            }
        }
    }
}

/// Voting-option labels in render order; empty when every strategy misses.
pub async fn extract_options<S>(session: &S) -> Vec<String>
where
    S: BrowserSession + ?Sized,
{
    for strategy in &OPTION_STRATEGIES {
        if let Some(labels) = strategy.attempt(session).await {
            debug!("found {} options using {}", labels.len(), strategy.name);
            return labels;
        }
        debug!("no options via {}", strategy.name);
    }
    Vec::new()
}

pub fn first_integer(text: &str) -> Option<u64> {
    FIRST_INTEGER
        .find_iter(text)
        .find_map(|m| m.as_str().parse::<u64>().ok())
}

/// First integer found in the first element whose text mentions "vote".
pub fn votes_from_elements(elements: &[ElementSnapshot]) -> u64 {
    elements
        .iter()
        .filter(|e| e.text.to_lowercase().contains("vote"))
        .find_map(|e| first_integer(&e.text))
        .unwrap_or(0)
}

pub async fn extract_votes<S>(session: &S) -> u64
where
    S: BrowserSession + ?Sized,
{
    match session.find_xpath(VOTE_XPATH).await {
        Ok(elements) => votes_from_elements(&elements),
        Err(err) => {
            warn!("error extracting votes: {err}");
            0
        }
    }
}

/// Number after the first `{prefix}-` that is followed by digits, e.g. 12 for "KIP-12: ...".
pub fn identifier_number(text: &str, prefix: &str) -> Option<u64> {
    let marker = format!("{prefix}-");
    text.match_indices(&marker).find_map(|(idx, _)| {
        let digits: String = text[idx + marker.len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

/// Ascending by identifier number; identifiers without one keep their
/// relative order after all numbered ones.
pub fn sort_by_identifier<T, F>(items: &mut [T], prefix: &str, text_of: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by_key(|item| match identifier_number(text_of(item), prefix) {
        Some(n) => (0u8, n),
        None => (1u8, 0),
    });
}
