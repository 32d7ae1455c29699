use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{BOOKMARKS, LIKES, QUOTES, REPLIES, REPOSTS, VIEWS};

static SHORTHAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]*\.?[0-9]+)\s*([KkMm])?$").unwrap());
static LEADING_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[+-]?\d+").unwrap());
static ARIA_METRIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d(?:[\d,.]*\d)?(?:\s?[KkMm])?)\s*(repl(?:y|ies)|reposts?|retweets?|likes?|bookmarks?|views?|quotes?)\b",
    )
    .unwrap()
});

/// Parse a display count such as "2.3K", "1,200" or "4M".
///
/// Thousands separators are stripped, a trailing K/M scales the float part,
/// and anything unparseable is 0.
pub fn parse_count(text: &str) -> u64 {
    let cleaned: String = text.trim().chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() {
        return 0;
    }
    if let Some(caps) = SHORTHAND_RE.captures(&cleaned) {
        let n: f64 = caps[1].parse().unwrap_or(0.0);
        let scale = match caps.get(2).map(|m| m.as_str()) {
            Some("k" | "K") => 1_000.0,
            Some(_) => 1_000_000.0,
            None => 1.0,
        };
        return (n * scale).round() as u64;
    }
    // Fall back to a leading integer ("12 replies" style leftovers).
    LEADING_INT_RE
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

/// Map a metric word from an accessible label to its canonical key.
pub fn normalize_metric_key(label: &str) -> String {
    let t = label.to_lowercase();
    if t.starts_with("repl") {
        REPLIES.into()
    } else if t.starts_with("retw") || t.starts_with("repo") {
        REPOSTS.into()
    } else if t.starts_with("like") {
        LIKES.into()
    } else if t.starts_with("book") {
        BOOKMARKS.into()
    } else if t.starts_with("view") {
        VIEWS.into()
    } else if t.starts_with("quot") {
        QUOTES.into()
    } else {
        t.trim_end_matches('s').to_string()
    }
}

/// Scan accessible descriptions ("12 replies, 1 repost, 2,300 likes") and
/// collect the largest number seen per metric.
pub fn metrics_from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for label in labels {
        for caps in ARIA_METRIC_RE.captures_iter(label) {
            let n = parse_count(&caps[1]);
            let key = normalize_metric_key(&caps[2]);
            let slot = totals.entry(key).or_insert(0);
            *slot = (*slot).max(n);
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_counts() {
        assert_eq!(parse_count("2.3K"), 2300);
        assert_eq!(parse_count("101.5K"), 101500);
        assert_eq!(parse_count("1.2m"), 1_200_000);
        assert_eq!(parse_count("4 M"), 4_000_000);
        assert_eq!(parse_count(".5k"), 500);
    }

    #[test]
    fn separators_and_plain() {
        assert_eq!(parse_count("1,200"), 1200);
        assert_eq!(parse_count(" 42 "), 42);
        assert_eq!(parse_count("12 replies"), 12);
    }

    #[test]
    fn garbage_is_zero() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("   "), 0);
        assert_eq!(parse_count("Like"), 0);
        assert_eq!(parse_count("-"), 0);
    }

    #[test]
    fn metric_keys() {
        assert_eq!(normalize_metric_key("Retweets"), "reposts");
        assert_eq!(normalize_metric_key("reply"), "replies");
        assert_eq!(normalize_metric_key("Views"), "views");
        assert_eq!(normalize_metric_key("stars"), "star");
    }

    #[test]
    fn labels_keep_max_per_metric() {
        let m = metrics_from_labels([
            "8 replies, 1 repost, 2,100 likes, 14 bookmarks, 101500 views",
            "2,300 Likes. Like",
            "View post analytics",
        ]);
        assert_eq!(m["replies"], 8);
        assert_eq!(m["reposts"], 1);
        assert_eq!(m["likes"], 2300);
        assert_eq!(m["bookmarks"], 14);
        assert_eq!(m["views"], 101500);
        assert_eq!(m.len(), 5);
    }

    #[test]
    fn label_numbers_stop_at_separators() {
        let m = metrics_from_labels(["Posted 2024, 5 likes", "Mar 3 12 replies", "1.2K Reposts, 4 M views"]);
        assert_eq!(m["likes"], 5);
        assert_eq!(m["replies"], 12);
        assert_eq!(m["reposts"], 1200);
        assert_eq!(m["views"], 4_000_000);
    }
}
