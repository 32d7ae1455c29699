use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::count::parse_count;
use super::markdown::{fragment_to_markdown, to_markdown};
use super::{first, non_empty, text_of, Candidate, Profile};
use crate::model::{Record, LIKES, REPLIES, VIEWS};

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

static POST: LazyLock<Selector> = LazyLock::new(|| sel("article[data-post-id]"));
static COOKED: LazyLock<Selector> = LazyLock::new(|| sel(".cooked"));
static TIME: LazyLock<Selector> = LazyLock::new(|| sel("time"));
static USERNAME: LazyLock<Selector> =
    LazyLock::new(|| sel(".names span.username, .poster span.username"));
static USER_LINK: LazyLock<Selector> =
    LazyLock::new(|| sel(".names span.username a, .poster span.username a"));
static FULL_NAME: LazyLock<Selector> = LazyLock::new(|| sel(".names span.full-name"));
static USER_TITLE: LazyLock<Selector> = LazyLock::new(|| sel(".names .title"));
static LIKE_COUNT: LazyLock<Selector> = LazyLock::new(|| sel(".like-count, .discourse-reactions-counter .reactions-counter"));
static REACTION: LazyLock<Selector> = LazyLock::new(|| sel("[data-reaction]"));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| sel(r#"link[rel="canonical"]"#));
static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static TOPIC_VIEWS: LazyLock<Selector> =
    LazyLock::new(|| sel(".topic-map__views-trigger .number, .topic-map .views .number"));

static POST_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"post_(\d+)").unwrap());
static TOPIC_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/t/([^/]+)/(\d+)").unwrap());

const HEART: &str = "♥️";
const READS: &str = "reads";

/// Reads the topic controller's post stream. Evaluates to `null` on pages
/// without one.
const LIVE_SCRIPT: &str = r#"(() => {
  try {
    const topic = window.Discourse?.__container__?.lookup?.("controller:topic")?.model;
    if (!topic?.postStream?.posts) return null;
    const pick = (o, keys) => Object.fromEntries(keys.map((k) => [k, o?.[k] ?? null]));
    return JSON.parse(JSON.stringify({
      ...pick(topic, ["id", "slug", "title", "views", "relative_url"]),
      origin: location.origin,
      href: location.href,
      posts: [...topic.postStream.posts].map((p) => pick(p, [
        "id", "post_number", "post_type", "cooked", "created_at", "updated_at",
        "reply_to_post_number", "replies_to_post_number", "username", "name",
        "user_id", "user_title", "like_count", "reactions", "actions_summary",
        "reads", "reply_count", "link_counts",
      ])),
    }));
  } catch (e) {
    return null;
  }
})()"#;

/// Topic model as `LIVE_SCRIPT` returns it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LiveTopic {
    id: Option<u64>,
    slug: Option<String>,
    title: Option<String>,
    views: Option<u64>,
    relative_url: Option<String>,
    origin: Option<String>,
    href: Option<String>,
    posts: Option<Vec<LivePost>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LivePost {
    id: Option<u64>,
    post_number: Option<u64>,
    post_type: Option<u64>,
    cooked: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    reply_to_post_number: Option<u64>,
    replies_to_post_number: Option<Vec<u64>>,
    username: Option<String>,
    name: Option<String>,
    user_id: Option<u64>,
    user_title: Option<String>,
    like_count: Option<u64>,
    reactions: Option<Vec<LiveReaction>>,
    actions_summary: Option<Vec<ActionSummary>>,
    reads: Option<u64>,
    reply_count: Option<u64>,
    link_counts: Option<Vec<LinkCount>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LiveReaction {
    id: Option<String>,
    count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionSummary {
    id: Option<u64>,
    count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LinkCount {
    url: Option<String>,
    title: Option<String>,
    clicks: Option<u64>,
    internal: Option<bool>,
}

/// Action type id Discourse uses for likes.
const LIKE_ACTION: u64 = 2;

/// Emoji for the common reaction ids; unknown ids pass through unchanged.
fn reaction_emoji(id: &str) -> String {
    let normalized = id.split(':').next().unwrap_or(id).replace('-', "_");
    let emoji = match normalized.as_str() {
        "heart" => HEART,
        "heart_on_fire" => "❤️‍🔥",
        "+1" => "👍",
        "_1" => "👎",
        "laugh" | "laughing" => "😆",
        "joy" => "😂",
        "grin" => "😁",
        "smile" => "😄",
        "open_mouth" => "😮",
        "scream" => "😱",
        "cry" | "sob" => "😭",
        "clap" => "👏",
        "raised_hands" => "🙌",
        "tada" => "🎉",
        "confetti_ball" => "🎊",
        "rocket" => "🚀",
        "thinking" => "🤔",
        "eyes" => "👀",
        "star_struck" => "🤩",
        "fire" => "🔥",
        "100" => "💯",
        _ => return id.to_string(),
    };
    emoji.to_string()
}

/// Discourse topic pages rendered in the browser.
pub struct DiscourseProfile {
    /// Topic page URL, used when the snapshot has no canonical link.
    page_url: Option<Url>,
}

impl DiscourseProfile {
    pub fn new(page_url: Option<&str>) -> Self {
        Self {
            page_url: page_url.and_then(|u| Url::parse(u).ok()),
        }
    }

    /// `https://host/t/<slug>/<id>` for the topic in view.
    fn topic_base(&self, doc: &Html) -> Option<String> {
        let canonical = doc
            .select(&CANONICAL)
            .next()
            .and_then(|l| l.value().attr("href"));
        let url = match (canonical, &self.page_url) {
            (Some(href), Some(base)) => base.join(href).ok(),
            (Some(href), None) => Url::parse(href).ok(),
            (None, Some(base)) => Some(base.clone()),
            (None, None) => None,
        }?;
        let path: Vec<&str> = url.path().split('/').take(4).collect();
        Some(format!("{}{}", url.origin().ascii_serialization(), path.join("/")))
    }

    fn absolute(&self, href: &str, base: Option<&str>) -> String {
        base.and_then(|b| Url::parse(b).ok())
            .and_then(|b| b.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| href.to_string())
    }

    /// Topic base for live data: the tab URL, then the model's own URL,
    /// then the configured page URL.
    fn live_base(&self, topic: &LiveTopic) -> Option<String> {
        let href = topic.href.as_deref().and_then(|h| Url::parse(h).ok());
        let relative = topic
            .origin
            .as_deref()
            .and_then(|o| Url::parse(o).ok())
            .or_else(|| self.page_url.clone())
            .zip(topic.relative_url.as_deref())
            .and_then(|(origin, rel)| origin.join(rel).ok());
        [href, relative, self.page_url.clone()]
            .iter()
            .flatten()
            .find_map(topic_url)
    }

    fn live_candidate(&self, topic: &LiveTopic, post: &LivePost, base: &str) -> Option<Candidate> {
        let cooked = post.cooked.as_deref().filter(|c| !c.trim().is_empty())?;
        let number = post.post_number.unwrap_or(1);
        let base_url = Url::parse(base).ok();

        let reactions = live_reactions(post);
        let mut visible = BTreeMap::new();
        raise(&mut visible, LIKES, reactions.get(HEART).copied().unwrap_or(0));
        raise(&mut visible, REPLIES, post.reply_count.unwrap_or(0));
        raise(&mut visible, READS, post.reads.unwrap_or(0));

        let mut extras = BTreeMap::new();
        let mut put = |key: &str, value: Value| {
            if !value.is_null() {
                extras.insert(key.to_string(), value);
            }
        };
        put("post_number", json!(number));
        put("post_id", json!(post.id));
        put("reply_to_post_number", json!(post.reply_to_post_number));
        put("topic_id", json!(topic.id));
        put("topic_slug", json!(topic.slug));
        put("topic_title", json!(topic.title));
        put("topic_url", json!(base));
        put("user_id", json!(post.user_id));
        put("user_role", json!(post.user_title.as_deref().filter(|t| !t.is_empty())));
        put(
            "user_link",
            json!(post.username.as_deref().map(|u| self.absolute(&format!("/u/{}", u), Some(base)))),
        );
        if let Some(replies) = post.replies_to_post_number.as_ref().filter(|r| !r.is_empty()) {
            put("replies_to_post_number", json!(replies));
        }
        if let Some(links) = post.link_counts.as_ref().filter(|l| !l.is_empty()) {
            let links: Vec<Value> = links
                .iter()
                .map(|l| {
                    json!({
                        "url": l.url.as_deref().map(|u| self.absolute(u, Some(base))),
                        "title": l.title,
                        "clicks": l.clicks,
                        "internal": l.internal,
                    })
                })
                .collect();
            put("links", Value::from(links));
        }

        Some(Candidate {
            link: Some(permalink(base, number)),
            date: post.created_at.clone().or_else(|| post.updated_at.clone()),
            name: post.name.clone().filter(|n| !n.is_empty()).or_else(|| post.username.clone()),
            handle: post.username.clone(),
            message: non_empty(fragment_to_markdown(cooked, base_url.as_ref())),
            parent_link: post.reply_to_post_number.map(|n| permalink(base, n)),
            visible,
            reactions,
            extras,
            ..Default::default()
        })
    }
}

fn permalink(base: &str, post_number: u64) -> String {
    if post_number == 1 {
        base.to_string()
    } else {
        format!("{}/{}", base, post_number)
    }
}

fn body_text(post: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    first(post, &COOKED).and_then(|c| non_empty(to_markdown(c, base)))
}

/// `https://host/t/<slug>/<id>` when `url` points into a topic.
fn topic_url(url: &Url) -> Option<String> {
    let caps = TOPIC_PATH_RE.captures(url.path())?;
    Some(format!(
        "{}/t/{}/{}",
        url.origin().ascii_serialization(),
        &caps[1],
        &caps[2]
    ))
}

fn post_number(record: &Record) -> u64 {
    record
        .extras
        .get("post_number")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX)
}

fn raise(map: &mut BTreeMap<String, u64>, key: &str, n: u64) {
    if n > 0 {
        let slot = map.entry(key.to_string()).or_insert(0);
        *slot = (*slot).max(n);
    }
}

/// Likes, emoji reactions and like actions folded into one emoji map.
fn live_reactions(post: &LivePost) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    raise(&mut out, HEART, post.like_count.unwrap_or(0));
    for r in post.reactions.iter().flatten() {
        if let Some(id) = r.id.as_deref() {
            raise(&mut out, &reaction_emoji(id), r.count.unwrap_or(0));
        }
    }
    for action in post.actions_summary.iter().flatten() {
        if action.id == Some(LIKE_ACTION) {
            raise(&mut out, HEART, action.count.unwrap_or(0));
        }
    }
    out
}

impl Profile for DiscourseProfile {
    fn name(&self) -> &'static str {
        "discourse"
    }

    fn items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        doc.select(&POST)
            .filter(|p| first(*p, &COOKED).is_some())
            .collect()
    }

    fn is_promoted(&self, item: ElementRef<'_>) -> bool {
        item.value().classes().any(|c| c == "sponsored" || c == "promoted")
    }

    fn read(&self, doc: &Html, item: ElementRef<'_>) -> Candidate {
        let base = self.topic_base(doc);
        let post_number = item
            .value()
            .id()
            .and_then(|id| POST_ID_RE.captures(id))
            .and_then(|c| c[1].parse::<u64>().ok());
        let post_id = item
            .value()
            .attr("data-post-id")
            .and_then(|v| v.parse::<u64>().ok());

        let link = match (&base, post_number) {
            (Some(b), Some(n)) => Some(permalink(b, n)),
            (Some(b), None) => post_id.map(|id| format!("{}?post_id={}", b, id)),
            (None, _) => None,
        };

        let date = first(item, &TIME)
            .and_then(|t| t.value().attr("datetime"))
            .map(str::to_string);
        let handle = first(item, &USERNAME).and_then(|u| non_empty(text_of(u)));
        let name = first(item, &FULL_NAME)
            .and_then(|u| non_empty(text_of(u)))
            .or_else(|| handle.clone());

        let mut reactions = BTreeMap::new();
        for r in item.select(&REACTION) {
            let Some(id) = r.value().attr("data-reaction") else {
                continue;
            };
            let n = r
                .value()
                .attr("data-count")
                .map(parse_count)
                .unwrap_or_else(|| parse_count(&text_of(r)));
            if n > 0 {
                let slot = reactions.entry(reaction_emoji(id)).or_insert(0);
                *slot = u64::max(*slot, n);
            }
        }

        let mut visible = BTreeMap::new();
        if let Some(el) = first(item, &LIKE_COUNT) {
            let likes = parse_count(&text_of(el));
            if likes > 0 {
                visible.insert(LIKES.to_string(), likes);
                let slot = reactions.entry(HEART.to_string()).or_insert(0);
                *slot = u64::max(*slot, likes);
            }
        }

        let mut extras = BTreeMap::new();
        if let Some(n) = post_number {
            extras.insert("post_number".to_string(), Value::from(n));
        }
        if let Some(id) = post_id {
            extras.insert("post_id".to_string(), Value::from(id));
        }
        if let Some(role) = first(item, &USER_TITLE).and_then(|t| non_empty(text_of(t))) {
            extras.insert("user_role".to_string(), Value::from(role));
        }
        if let Some(href) = first(item, &USER_LINK).and_then(|a| a.value().attr("href")) {
            extras.insert(
                "user_link".to_string(),
                Value::from(self.absolute(href, base.as_deref())),
            );
        }
        if let Some(title) = doc.select(&TITLE).next().and_then(|t| non_empty(text_of(t))) {
            extras.insert("topic_title".to_string(), Value::from(title));
        }

        let base_url = base.as_deref().and_then(|b| Url::parse(b).ok());
        Candidate {
            link,
            date,
            name,
            handle,
            message: body_text(item, base_url.as_ref()),
            visible,
            accessible: super::count::metrics_from_labels(super::aria_labels(item)),
            reactions,
            extras,
            ..Default::default()
        }
    }

    /// Posts can render out of order while the stream loads; sort by post
    /// number and attach topic views to the opening post.
    fn finish(&self, doc: &Html, records: &mut Vec<Record>) {
        records.sort_by_key(post_number);
        let views = doc
            .select(&TOPIC_VIEWS)
            .next()
            .map(|v| parse_count(&text_of(v)))
            .unwrap_or(0);
        if let Some(root) = records.first_mut() {
            if views > 0 {
                root.raise_metric(VIEWS, views);
            }
        }
    }

    fn affordance_selector(&self) -> &'static str {
        r#"button, a[role="button"], .timeline-down .timeline-button"#
    }

    fn wants_click(&self, label: &str) -> bool {
        const TRIGGERS: &[&str] = &[
            "show more",
            "load more",
            "expand",
            "continue",
            "view replies",
            "summary",
            "top replies",
        ];
        TRIGGERS.iter().any(|t| label.contains(t))
    }

    fn live_script(&self) -> Option<&'static str> {
        Some(LIVE_SCRIPT)
    }

    /// Posts from the topic controller, which knows reply targets, reads
    /// and link clicks that the markup does not show.
    fn read_live(&self, data: &Value) -> Vec<Record> {
        if data.is_null() {
            return Vec::new();
        }
        let topic = match LiveTopic::deserialize(data) {
            Ok(t) => t,
            Err(e) => {
                debug!("Unexpected topic model: {}", e);
                return Vec::new();
            }
        };
        let Some(base) = self.live_base(&topic) else {
            debug!("Topic model without a topic URL");
            return Vec::new();
        };

        let mut records: Vec<Record> = topic
            .posts
            .iter()
            .flatten()
            // regular posts only; small actions and whispers have other types
            .filter(|p| p.post_type.unwrap_or(1) == 1)
            .filter_map(|p| self.live_candidate(&topic, p, &base))
            .filter_map(Candidate::into_record)
            .collect();
        records.sort_by_key(post_number);
        if let (Some(root), Some(views)) = (records.first_mut(), topic.views.filter(|&v| v > 0)) {
            root.raise_metric(VIEWS, views);
        }
        records
    }

    fn order_export(&self, items: &mut [Record]) {
        items.sort_by_key(post_number);
    }
}
