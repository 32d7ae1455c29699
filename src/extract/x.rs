use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::count::{metrics_from_labels, parse_count};
use super::{aria_labels, first, non_empty, text_lines, text_of, Candidate, Profile};
use crate::model::{BOOKMARKS, LIKES, REPLIES, REPOSTS, VIEWS};

pub const DEFAULT_ORIGIN: &str = "https://x.com";

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

static ARTICLE: LazyLock<Selector> = LazyLock::new(|| sel(r#"article[role="article"]"#));
static SOCIAL_CONTEXT: LazyLock<Selector> = LazyLock::new(|| sel(r#"[data-testid="socialContext"]"#));
static STATUS_LINK: LazyLock<Selector> = LazyLock::new(|| sel(r#"a[role="link"][href*="/status/"]"#));
static TIME: LazyLock<Selector> = LazyLock::new(|| sel("time"));
static USER_NAME_SPAN: LazyLock<Selector> = LazyLock::new(|| sel(r#"div[data-testid="User-Name"] span"#));
static TWEET_TEXT: LazyLock<Selector> = LazyLock::new(|| sel(r#"div[data-testid="tweetText"]"#));
static VIEWS_BOX: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"[data-testid="views"], [data-testid="view"], a[href*="/analytics"]"#));

static PROMOTED_CONTEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(promoted|sponsored|ad)\b").unwrap());
static PROMOTED_TOP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bPromoted\b").unwrap());

/// Visible counters: (data-testid, metric). Liked/reposted-by-me variants
/// carry a different testid.
const COUNTERS: &[(&str, &str)] = &[
    ("reply", REPLIES),
    ("retweet", REPOSTS),
    ("unretweet", REPOSTS),
    ("like", LIKES),
    ("unlike", LIKES),
    ("bookmark", BOOKMARKS),
    ("removeBookmark", BOOKMARKS),
];

static COUNTER_SELECTORS: LazyLock<Vec<(Selector, &'static str)>> = LazyLock::new(|| {
    COUNTERS
        .iter()
        .map(|(id, key)| (sel(&format!(r#"[data-testid="{id}"]"#)), *key))
        .collect()
});

/// X / Twitter timeline and thread markup.
pub struct XProfile {
    origin: Url,
}

impl XProfile {
    pub fn new(origin: &str) -> anyhow::Result<Self> {
        Ok(Self {
            origin: Url::parse(origin)?,
        })
    }

    fn absolute(&self, href: &str) -> String {
        self.origin
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

impl Default for XProfile {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin parses"),
        }
    }
}

impl Profile for XProfile {
    fn name(&self) -> &'static str {
        "x"
    }

    fn items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        doc.select(&ARTICLE).collect()
    }

    fn is_promoted(&self, item: ElementRef<'_>) -> bool {
        if let Some(ctx) = first(item, &SOCIAL_CONTEXT) {
            if PROMOTED_CONTEXT_RE.is_match(&text_of(ctx)) {
                return true;
            }
        }
        let top = text_lines(item).into_iter().take(3).collect::<Vec<_>>().join(" ");
        PROMOTED_TOP_RE.is_match(&top)
    }

    fn read(&self, _doc: &Html, item: ElementRef<'_>) -> Candidate {
        // Prefer the status link wrapping the timestamp; quoted posts carry
        // their own status links further down.
        let link_el = item
            .select(&STATUS_LINK)
            .find(|a| a.select(&TIME).next().is_some())
            .or_else(|| first(item, &STATUS_LINK));
        let link = link_el
            .and_then(|a| a.value().attr("href"))
            .map(|href| self.absolute(href));

        let date = first(item, &TIME)
            .and_then(|t| t.value().attr("datetime"))
            .map(str::to_string);

        let spans: Vec<String> = item
            .select(&USER_NAME_SPAN)
            .map(text_of)
            .filter(|t| !t.is_empty())
            .collect();
        let handle = spans
            .iter()
            .find(|t| t.starts_with('@'))
            .map(|t| t.trim_start_matches('@').to_string());
        let name = spans.iter().find(|t| !t.starts_with('@')).cloned();

        let message = first(item, &TWEET_TEXT).and_then(|t| non_empty(text_of(t)));

        let mut visible = BTreeMap::new();
        for (selector, key) in COUNTER_SELECTORS.iter() {
            if let Some(el) = first(item, selector) {
                let n = parse_count(&text_of(el));
                let slot = visible.entry(key.to_string()).or_insert(0);
                *slot = (*slot).max(n);
            }
        }
        if let Some(el) = first(item, &VIEWS_BOX) {
            visible.insert(VIEWS.to_string(), parse_count(&text_of(el)));
        }

        Candidate {
            link,
            date,
            name,
            handle,
            message,
            visible,
            accessible: metrics_from_labels(aria_labels(item)),
            ..Default::default()
        }
    }

    fn affordance_selector(&self) -> &'static str {
        r#"div[role="button"], button"#
    }

    fn wants_click(&self, label: &str) -> bool {
        let replies = label.contains("repl");
        (label.contains("show") && replies)
            || (label.contains("view") && replies)
            || (label.contains("show more") && !replies)
    }
}
