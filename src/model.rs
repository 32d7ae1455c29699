use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LIKES: &str = "likes";
pub const REPOSTS: &str = "reposts";
pub const REPLIES: &str = "replies";
pub const VIEWS: &str = "views";
pub const BOOKMARKS: &str = "bookmarks";
pub const QUOTES: &str = "quotes";

/// Fields written by the scorer. Dropped when an exported file is read back
/// so a re-score starts from the captured data only.
const SCORE_FIELDS: &[&str] = &[
    "age_hours",
    "buzz",
    "keep",
    "buzz_z",
    "keep_z",
    "keep_orth_z",
    "keep_buzz_corr",
    "wlb_likes",
    "wlb_reposts",
    "wlb_replies",
    "wlb_bookmarks",
    "buzz_raw",
    "keep_raw",
];

/// One observation of a feed entry, and also the best-known merged state of
/// that entry once it sits in the capture store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordWire")]
pub struct Record {
    pub link: String,
    pub name: Option<String>,
    pub handle: Option<String>,
    pub date: Option<String>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_link: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn metric(&self, key: &str) -> u64 {
        self.metrics.get(key).copied().unwrap_or(0)
    }

    /// Keep the larger of the existing and the offered value.
    pub fn raise_metric(&mut self, key: &str, value: u64) {
        let slot = self.metrics.entry(key.to_string()).or_insert(0);
        *slot = (*slot).max(value);
    }
}

#[derive(Deserialize)]
struct RecordWire {
    #[serde(default)]
    link: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    parent_link: Option<String>,
    #[serde(default)]
    reactions: BTreeMap<String, u64>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl From<RecordWire> for Record {
    fn from(wire: RecordWire) -> Self {
        let mut metrics = BTreeMap::new();
        let mut extras = BTreeMap::new();
        for (key, value) in wire.rest {
            if SCORE_FIELDS.contains(&key.as_str()) {
                continue;
            }
            match value.as_f64() {
                Some(n) if n >= 0.0 => {
                    metrics.insert(key, n.round() as u64);
                }
                _ => {
                    extras.insert(key, value);
                }
            }
        }
        Record {
            link: wire.link,
            name: wire.name,
            handle: wire.handle,
            date: wire.date,
            message: wire.message,
            parent_link: wire.parent_link,
            reactions: wire.reactions,
            metrics,
            extras,
        }
    }
}
