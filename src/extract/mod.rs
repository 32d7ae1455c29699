pub mod count;
pub mod discourse;
pub mod markdown;
pub mod whatsapp;
pub mod x;

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::model::Record;

pub use discourse::DiscourseProfile;
pub use whatsapp::WhatsAppProfile;
pub use x::XProfile;

/// Everything a profile could read off one feed element, before the
/// mandatory-field filter and the two-source metric merge.
#[derive(Debug, Default, Clone)]
pub struct Candidate {
    pub link: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub handle: Option<String>,
    pub message: Option<String>,
    pub parent_link: Option<String>,
    /// Short-form counters as rendered ("2.3K").
    pub visible: BTreeMap<String, u64>,
    /// Long-form counts from accessible descriptions ("2,300 likes").
    pub accessible: BTreeMap<String, u64>,
    pub reactions: BTreeMap<String, u64>,
    pub extras: BTreeMap<String, Value>,
}

impl Candidate {
    /// Identity and timestamp are both required; entries lacking either are
    /// placeholders or ads and are dropped.
    pub fn into_record(self) -> Option<Record> {
        let link = self.link.filter(|l| !l.trim().is_empty())?;
        let date = self.date.filter(|d| !d.trim().is_empty())?;

        let mut record = Record::new(link);
        record.date = Some(date);
        record.name = self.name;
        record.handle = self.handle;
        record.message = self.message;
        record.parent_link = self.parent_link;
        record.reactions = self.reactions;
        record.extras = self.extras;
        // Visible counters lag or round down; keep the larger reading.
        for (key, n) in self.visible.into_iter().chain(self.accessible) {
            record.raise_metric(&key, n);
        }
        Some(record)
    }
}

/// Per-platform markup rules. Everything site-specific lives behind this
/// trait so the capture, merge and scoring code never changes per site.
pub trait Profile: Send + Sync {
    fn name(&self) -> &'static str;

    /// Feed elements in document order.
    fn items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>>;

    /// Best-effort ad / promoted-content heuristic.
    fn is_promoted(&self, item: ElementRef<'_>) -> bool;

    fn read(&self, doc: &Html, item: ElementRef<'_>) -> Candidate;

    /// Candidates for every non-promoted feed element, in document order.
    /// Profiles whose entries depend on earlier ones override this.
    fn candidates(&self, doc: &Html) -> Vec<Candidate> {
        self.items(doc)
            .into_iter()
            .filter(|item| !self.is_promoted(*item))
            .map(|item| self.read(doc, item))
            .collect()
    }

    /// Whether later entries reply to the first one, as in a thread.
    fn threaded(&self) -> bool {
        true
    }

    /// Hook to reorder or annotate a finished pass before thread linking.
    fn finish(&self, _doc: &Html, _records: &mut Vec<Record>) {}

    /// CSS selector for elements that may be "show more" style affordances.
    fn affordance_selector(&self) -> &'static str;

    /// Decide from the lowercased label text whether to click.
    fn wants_click(&self, label: &str) -> bool;

    /// Script a live page can evaluate for structured data richer than its
    /// markup. Its result goes to `read_live`.
    fn live_script(&self) -> Option<&'static str> {
        None
    }

    /// Records from the value `live_script` produced. An empty result means
    /// the markup pass is used instead.
    fn read_live(&self, _data: &Value) -> Vec<Record> {
        Vec::new()
    }

    /// Order of the exported items. First sighting unless the site has a
    /// natural order.
    fn order_export(&self, _items: &mut [Record]) {}
}

/// A clickable element located in a snapshot, addressed by selector and
/// document-order index so a live view can find it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Affordance {
    pub selector: String,
    pub index: usize,
    pub label: String,
}

/// Result of one extraction pass over a snapshot.
#[derive(Debug, Default)]
pub struct Pass {
    pub records: Vec<Record>,
    pub affordances: Vec<Affordance>,
}

/// Parse a snapshot and run the profile over it. The parsed DOM never
/// leaves this function, so callers can hold the result across awaits.
pub fn run_pass(html: &str, profile: &dyn Profile, with_affordances: bool) -> Pass {
    let doc = Html::parse_document(html);
    let records = extract(&doc, profile);
    let affordances = if with_affordances {
        expand_targets(&doc, profile)
    } else {
        Vec::new()
    };
    Pass { records, affordances }
}

pub fn extract(doc: &Html, profile: &dyn Profile) -> Vec<Record> {
    let mut out: Vec<Record> = profile
        .candidates(doc)
        .into_iter()
        .filter_map(Candidate::into_record)
        .collect();
    profile.finish(doc, &mut out);
    if profile.threaded() {
        link_thread(&mut out);
    }
    out
}

/// Records from a live page's structured data, thread-linked like a markup
/// pass.
pub fn live_records(data: &Value, profile: &dyn Profile) -> Vec<Record> {
    let mut out = profile.read_live(data);
    if profile.threaded() {
        link_thread(&mut out);
    }
    out
}

/// First record is treated as the thread root; the rest point at it unless
/// the profile already knows a better parent.
fn link_thread(records: &mut [Record]) {
    let Some((root, rest)) = records.split_first_mut() else {
        return;
    };
    for r in rest {
        if r.parent_link.is_none() {
            r.parent_link = Some(root.link.clone());
        }
    }
}

pub fn expand_targets(doc: &Html, profile: &dyn Profile) -> Vec<Affordance> {
    let selector_str = profile.affordance_selector();
    let selector = match Selector::parse(selector_str) {
        Ok(s) => s,
        Err(e) => {
            warn!("Bad affordance selector for {}: {}", profile.name(), e);
            return Vec::new();
        }
    };

    doc.select(&selector)
        .enumerate()
        .filter_map(|(index, el)| {
            let aria = el.value().attr("aria-label").unwrap_or("");
            let label = format!("{} {}", text_of(el), aria).trim().to_lowercase();
            if label.is_empty() || !profile.wants_click(&label) {
                return None;
            }
            Some(Affordance {
                selector: selector_str.to_string(),
                index,
                label,
            })
        })
        .collect()
}

// ── DOM helpers shared by profiles ──

/// Whitespace-normalized text content.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Non-empty trimmed text nodes, in order. Approximates rendered lines.
pub fn text_lines(el: ElementRef<'_>) -> Vec<String> {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn first<'a>(el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    el.select(selector).next()
}

pub fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// `aria-label` values of the element and all its descendants.
pub fn aria_labels(el: ElementRef<'_>) -> Vec<&str> {
    static ARIA: std::sync::LazyLock<Selector> =
        std::sync::LazyLock::new(|| Selector::parse("[aria-label]").unwrap());
    el.value()
        .attr("aria-label")
        .into_iter()
        .chain(el.select(&ARIA).filter_map(|e| e.value().attr("aria-label")))
        .collect()
}
