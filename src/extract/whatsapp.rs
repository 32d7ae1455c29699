use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use url::Url;

use super::{first, text_lines, text_of, Candidate, Profile};
use crate::model::{Record, LIKES};

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

fn re(s: &str) -> Regex {
    Regex::new(s).unwrap()
}

static ROW: LazyLock<Selector> = LazyLock::new(|| sel(r#"#main [role="row"]"#));
static DATA_ID: LazyLock<Selector> = LazyLock::new(|| sel("[data-id]"));
static RECALLED: LazyLock<Selector> = LazyLock::new(|| sel(r#"[data-icon="recalled"]"#));
static SELECTABLE: LazyLock<Selector> = LazyLock::new(|| sel(".selectable-text"));
static PRE_PLAIN: LazyLock<Selector> = LazyLock::new(|| sel("[data-pre-plain-text]"));
static AUTHOR_SECTION: LazyLock<Selector> = LazyLock::new(|| sel(r#"[role=""]"#));
static DIR: LazyLock<Selector> = LazyLock::new(|| sel("[dir]"));
static DIR_AUTO: LazyLock<Selector> = LazyLock::new(|| sel(r#"[dir="auto"]"#));
static LABELLED: LazyLock<Selector> = LazyLock::new(|| sel("[aria-label]"));
static UNLABELLED: LazyLock<Selector> = LazyLock::new(|| sel(":not([aria-label])"));
static QUOTED_MENTION: LazyLock<Selector> = LazyLock::new(|| sel(".quoted-mention"));
static SELECTABLE_LINK: LazyLock<Selector> =
    LazyLock::new(|| sel(r#".selectable-text a[href^="http"]"#));
static LINK: LazyLock<Selector> = LazyLock::new(|| sel(r#"a[href^="http"]"#));

static PRE_PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\[(\d{1,2}):(\d{2})\s?([ap]m),\s?(\d{1,2})/(\d{1,2})/(\d{4})\]\s*(.+?):\s*$")
});
static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(\d{1,2}):(\d{2})\s+(am|pm)"));
static TIME_LINE_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)^\d{1,2}:\d{2}\s*(?:am|pm)\b"));
static TINY_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| re(r"^\d{1,3}$"));
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)^[a-z0-9.-]+\.[a-z]{2,}$"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| re(r"\s+"));
static REACTION_NOISE: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        re(r"(?i)view reactions"),
        re(r"(?i)^reactions? *"),
        re(r"(?i) *in total"),
        re(r"[, .]+$"),
    ]
});
static REACTION_TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| re(r"\s(\d+)$"));
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| re(r"\+?\d[\d\s-]{5,}"));
static MAYBE_RE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bMaybe\b"));
static PLAYBACK_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)Your browser doesn't support video playback\.?|\btenor\b|\bforward-[\w-]+\b|\b\d{1,2}:\d{2}\s*(?:am|pm)\b")
});
static EDGE_QUOTES_RE: LazyLock<Regex> = LazyLock::new(|| re(r#"^["']+|["']+$"#));

pub const GIF_TEXT: &str = "(media-gif)";

/// Text a reader would copy: `data-plain-text` wrappers and emoji images
/// become their characters.
fn plain_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_plain(el, &mut out);
    out
}

fn push_plain(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) => {
                if let Some(plain) = e.attr("data-plain-text") {
                    out.push_str(plain);
                } else if e.name() == "img" && e.classes().any(|c| c == "emoji") {
                    out.push_str(e.attr("alt").unwrap_or(""));
                } else if let Some(inner) = ElementRef::wrap(child) {
                    push_plain(inner, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

fn normalize_url(value: &str) -> &str {
    value.trim().trim_end_matches('/')
}

fn looks_like_url(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() {
        return false;
    }
    let lower = t.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return true;
    }
    !t.contains(char::is_whitespace)
        && t.chars().any(|c| c.is_ascii_alphanumeric())
        && t.contains(['/', '.'])
}

fn within(el: ElementRef<'_>, container: Option<ElementRef<'_>>) -> bool {
    container.is_some_and(|c| el.ancestors().any(|a| a.id() == c.id()))
}

/// Everything one chat row shows on its own, before the context of the rows
/// above it is applied.
#[derive(Debug, Default, Clone)]
struct Row {
    message_id: String,
    user_id: Option<String>,
    system: bool,
    recalled: bool,
    author: Option<String>,
    has_author_section: bool,
    phone: Option<String>,
    time: Option<DateTime<FixedOffset>>,
    /// Visible clock ("9:34 pm") for rows without a full timestamp.
    clock: Option<NaiveTime>,
    text: Option<String>,
    quote: Option<Quote>,
    reactions: Option<String>,
    link: Option<LinkPreview>,
}

#[derive(Debug, Default, Clone)]
struct Quote {
    author: Option<String>,
    phone: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct LinkPreview {
    url: String,
    site: String,
    title: Option<String>,
    description: Option<String>,
}

/// Running context while walking a chat top to bottom.
#[derive(Default)]
struct Thread {
    last_author: Option<String>,
    last_time: Option<DateTime<FixedOffset>>,
    /// (message id, author, whitespace-normalized text) of earlier rows.
    seen: Vec<(String, Option<String>, String)>,
}

/// WhatsApp Web conversations. Messages are keyed by their `data-id`
/// message id, which is also what quoted replies point at.
pub struct WhatsAppProfile {
    /// Offset of the clock the chat was rendered in.
    offset: FixedOffset,
}

impl Default for WhatsAppProfile {
    fn default() -> Self {
        Self::new(*Local::now().offset())
    }
}

impl WhatsAppProfile {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// `[10:33 am, 8/5/2025] +91 99999 99999: ` as (timestamp, phone).
    /// The date is day/month/year.
    fn parse_pre_plain(&self, pre: &str) -> Option<(DateTime<FixedOffset>, String)> {
        let caps = PRE_PLAIN_RE.captures(pre)?;
        let time = clock(&caps[1], &caps[2], &caps[3])?;
        let date = NaiveDate::from_ymd_opt(
            caps[6].parse().ok()?,
            caps[5].parse().ok()?,
            caps[4].parse().ok()?,
        )?;
        let at = self.offset.from_local_datetime(&date.and_time(time)).single()?;
        Some((at, caps[7].trim().to_string()))
    }

    fn parse_row(&self, row: ElementRef<'_>) -> Option<Row> {
        let data_id = first(row, &DATA_ID)?.value().attr("data-id")?;
        let parts: Vec<&str> = data_id.split(['_', '@']).collect();
        let message_id = parts.get(3).filter(|p| !p.is_empty())?.to_string();
        let system = parts.first() == Some(&"true");
        let recalled = first(row, &RECALLED).is_some();

        let mut out = Row {
            message_id,
            user_id: parts.get(1).map(|s| s.to_string()),
            system,
            recalled,
            ..Default::default()
        };

        let quote = row
            .select(&LABELLED)
            .find(|e| {
                e.value()
                    .attr("aria-label")
                    .is_some_and(|l| l.eq_ignore_ascii_case("quoted message"))
            });
        out.quote = quote.map(read_quote);

        out.reactions = row
            .select(&LABELLED)
            .filter_map(|e| e.value().attr("aria-label"))
            .find(|l| l.starts_with("Reactions ") || l.starts_with("reaction "))
            .map(|l| {
                REACTION_NOISE
                    .iter()
                    .fold(l.to_string(), |acc, r| r.replace(&acc, "").into_owned())
            })
            .filter(|l| !l.is_empty());

        if system && !recalled {
            out.text = Some(text_of(row)).filter(|t| !t.is_empty());
        }
        if system || recalled {
            return Some(out);
        }

        let selectable = row.select(&SELECTABLE).find(|s| !within(*s, quote));
        let has_gif = row.select(&LABELLED).any(|e| {
            e.value()
                .attr("aria-label")
                .is_some_and(|l| l.eq_ignore_ascii_case("play gif"))
        });

        let author_section = row.select(&AUTHOR_SECTION).find(|s| !within(*s, quote));
        out.has_author_section = author_section.is_some();
        out.author = author_section
            .and_then(|s| first(s, &DIR))
            .map(|d| d.text().collect::<String>())
            .filter(|a| !a.trim().is_empty());

        let mut raw = selectable.map(plain_text).filter(|t| !t.trim().is_empty());
        let mut fallback = false;
        if raw.is_none() {
            raw = Some(if has_gif {
                GIF_TEXT.to_string()
            } else {
                fallback = true;
                row.text().collect()
            });
        }

        if let Some(pre) = first(row, &PRE_PLAIN).and_then(|p| p.value().attr("data-pre-plain-text")) {
            if let Some((time, phone)) = self.parse_pre_plain(pre) {
                out.time = Some(time);
                out.phone = Some(phone).filter(|p| !p.is_empty());
            }
        }
        if out.time.is_none() {
            out.clock = row
                .select(&DIR_AUTO)
                .last()
                .and_then(|a| {
                    let t = a.text().collect::<String>();
                    CLOCK_RE
                        .captures(&t)
                        .and_then(|c| clock(&c[1], &c[2], &c[3]))
                });
        }

        out.link = link_preview(row, quote, out.author.as_deref(), out.phone.as_deref(), raw.as_deref());
        let cleaned = raw.as_deref().and_then(|raw| {
            clean_text(
                raw,
                out.author.as_deref(),
                out.quote.as_ref(),
                fallback,
                has_gif,
            )
        });
        out.text = cleaned.map(|text| match &out.link {
            Some(link) if link.title.is_some() && normalize_url(&text) == normalize_url(&link.url) => {
                let mut parts = vec![text];
                parts.extend(link.title.clone());
                parts.extend(link.description.clone());
                parts.join("\n")
            }
            _ => text,
        });
        Some(out)
    }

    /// Apply the rows above: continuation author, clock-only times and the
    /// quoted message's id.
    fn contextualize(&self, mut row: Row, thread: &mut Thread) -> Candidate {
        if !row.system && !row.recalled {
            if !row.has_author_section && row.author.is_none() && row.text.is_some() {
                row.author = thread.last_author.clone();
            }
            if row.time.is_none() {
                row.time = row.clock.and_then(|clock| {
                    let day = thread.last_time?.date_naive();
                    self.offset.from_local_datetime(&day.and_time(clock)).single()
                });
            }
            thread.last_author = row.author.clone();
            if row.time.is_some() {
                thread.last_time = row.time;
            }
        } else if row.time.is_none() {
            // system notices and recalled messages sit at the previous time
            row.time = thread.last_time;
        }

        let quote_id = row.quote.as_ref().and_then(|q| {
            let wanted = collapse(q.text.as_deref()?);
            if wanted.is_empty() {
                return None;
            }
            thread
                .seen
                .iter()
                .rev()
                .find(|(_, author, text)| *author == q.author && text.starts_with(&wanted))
                .map(|(id, _, _)| id.clone())
        });
        if let Some(text) = &row.text {
            thread
                .seen
                .push((row.message_id.clone(), row.author.clone(), collapse(text)));
        }

        self.to_candidate(row, quote_id)
    }

    fn to_candidate(&self, row: Row, quote_id: Option<String>) -> Candidate {
        let mut extras = BTreeMap::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                extras.insert(key.to_string(), v);
            }
        };
        put("message_id", Some(Value::from(row.message_id.clone())));
        put("user_id", row.user_id.map(Value::from));
        put("is_system_message", Some(Value::from(row.system)));
        put("is_recalled", Some(Value::from(row.recalled)));
        put("reaction_summary", row.reactions.clone().map(Value::from));
        if let Some(q) = &row.quote {
            put("quote_author", q.author.clone().map(Value::from));
            put("quote_author_phone", q.phone.clone().map(Value::from));
            put("quote_text", q.text.clone().map(Value::from));
            put("quote_message_id", quote_id.clone().map(Value::from));
        }
        if let Some(link) = &row.link {
            put("link_url", Some(Value::from(link.url.clone())));
            put("link_site", Some(Value::from(link.site.clone())));
            put("link_title", link.title.clone().map(Value::from));
            put("link_description", link.description.clone().map(Value::from));
        }

        let mut visible = BTreeMap::new();
        if let Some(total) = row.reactions.as_deref().map(reaction_total).filter(|&n| n > 0) {
            visible.insert(LIKES.to_string(), total);
        }

        Candidate {
            link: Some(row.message_id),
            date: row.time.map(|t| t.to_rfc3339()),
            name: row.author.map(|a| a.trim().to_string()),
            handle: row.phone,
            message: row.text,
            parent_link: quote_id,
            visible,
            extras,
            ..Default::default()
        }
    }
}

fn clock(hour: &str, minute: &str, meridiem: &str) -> Option<NaiveTime> {
    let h: u32 = hour.parse().ok()?;
    let m: u32 = minute.parse().ok()?;
    let pm = meridiem.eq_ignore_ascii_case("pm");
    NaiveTime::from_hms_opt(h % 12 + if pm { 12 } else { 0 }, m, 0)
}

/// "👍, ❤ 4" has 4 reactions; without a number each listed emoji counts once.
fn reaction_total(summary: &str) -> u64 {
    match REACTION_TOTAL_RE.captures(summary) {
        Some(c) => c[1].parse().unwrap_or(0),
        None => summary.split(',').filter(|p| !p.trim().is_empty()).count() as u64,
    }
}

fn read_quote(quote: ElementRef<'_>) -> Quote {
    let section = first(quote, &AUTHOR_SECTION);
    let unlabelled = section
        .and_then(|s| s.select(&UNLABELLED).find(|e| e.id() != s.id()))
        .map(|e| e.text().collect::<String>());
    let labelled = section
        .and_then(|s| first(s, &LABELLED))
        .map(|e| e.text().collect::<String>())
        .filter(|l| !l.trim().is_empty());
    let (author, phone) = match labelled {
        Some(label) => (
            Some(label),
            unlabelled.map(|p| p.chars().filter(char::is_ascii_digit).collect::<String>()),
        ),
        None => (unlabelled, None),
    };
    Quote {
        author: author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
        phone: phone.filter(|p| !p.is_empty()),
        text: first(quote, &QUOTED_MENTION)
            .map(plain_text)
            .filter(|t| !t.trim().is_empty()),
    }
}

/// URL, site and preview card text of the first external link. The card's
/// markup changes between builds, so its title and description are the
/// lines shown above the URL that are not author, quote, caption or clock.
fn link_preview(
    row: ElementRef<'_>,
    quote: Option<ElementRef<'_>>,
    author: Option<&str>,
    phone: Option<&str>,
    raw: Option<&str>,
) -> Option<LinkPreview> {
    let anchor = first(row, &SELECTABLE_LINK).or_else(|| first(row, &LINK))?;
    let href = anchor.value().attr("href")?;
    let url = Url::parse(href).ok()?;
    let host = url.host_str()?;
    let site = host.strip_prefix("www.").unwrap_or(host).to_string();

    let own: HashSet<String> = raw
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let quoted: HashSet<String> = quote.map(text_lines).unwrap_or_default().into_iter().collect();

    let wanted = normalize_url(href).to_lowercase();
    let lines = text_lines(row);
    let at = lines.iter().position(|line| {
        let n = normalize_url(line).to_lowercase();
        looks_like_url(line) && (n == wanted || n.contains(&wanted) || wanted.contains(&n))
    });
    let mut preview = LinkPreview {
        url: href.to_string(),
        site,
        ..Default::default()
    };
    let Some(at) = at else {
        return Some(preview);
    };

    let mut candidates: Vec<&String> = lines[..at]
        .iter()
        .filter(|line| {
            Some(line.as_str()) != author
                && Some(line.as_str()) != phone
                && !own.contains(line.as_str())
                && !quoted.contains(line.as_str())
                && !TIME_LINE_RE.is_match(line)
                && !TINY_COUNT_RE.is_match(line)
        })
        .collect();
    if candidates.last().is_some_and(|l| DOMAIN_RE.is_match(l)) {
        candidates.pop();
    }
    if let Some((title, rest)) = candidates.split_first() {
        preview.title = Some(title.to_string());
        let description = rest.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n");
        preview.description = Some(description).filter(|d| !d.trim().is_empty());
    }
    Some(preview)
}

/// Strip what leaks into message text: the quoted text, and in whole-row
/// fallback text the author, phone numbers, clock and media noise.
fn clean_text(
    raw: &str,
    author: Option<&str>,
    quote: Option<&Quote>,
    fallback: bool,
    has_gif: bool,
) -> Option<String> {
    let mut text = raw.to_string();

    if let Some(quoted) = quote.and_then(|q| q.text.as_deref()) {
        let normalized = collapse(quoted);
        let unquoted = normalized.trim_matches('"').to_string();
        for variant in [quoted.to_string(), normalized, unquoted] {
            if variant.is_empty() {
                continue;
            }
            if let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(&variant))) {
                text = pattern.replace_all(&text, "").into_owned();
            }
        }
    }

    if fallback {
        if let Some(author) = author {
            if let Ok(pattern) = Regex::new(&format!(r"(?i)^{}\s*", regex::escape(author))) {
                text = pattern.replace(&text, "").into_owned();
            }
        }
        if let Some(quote_author) = quote.and_then(|q| q.author.as_deref()) {
            if let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(quote_author))) {
                text = pattern.replace_all(&text, "").into_owned();
            }
        }
        text = MAYBE_RE.replace_all(&text, "").into_owned();
        text = PHONE_RE.replace_all(&text, "").into_owned();
    }

    text = PLAYBACK_NOISE_RE.replace_all(&text, "").into_owned();
    if has_gif || text.to_lowercase().contains(GIF_TEXT) {
        return Some(GIF_TEXT.to_string());
    }

    let text = text.replace(['\u{201c}', '\u{201d}'], "\"");
    let text = collapse(&text);
    let text = EDGE_QUOTES_RE.replace_all(&text, "").trim().to_string();
    Some(text).filter(|t| !t.is_empty())
}

impl Profile for WhatsAppProfile {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        doc.select(&ROW)
            .filter(|row| first(*row, &DATA_ID).is_some())
            .collect()
    }

    fn is_promoted(&self, _item: ElementRef<'_>) -> bool {
        false
    }

    /// One row read without the rows above it.
    fn read(&self, _doc: &Html, item: ElementRef<'_>) -> Candidate {
        match self.parse_row(item) {
            Some(row) => self.contextualize(row, &mut Thread::default()),
            None => Candidate::default(),
        }
    }

    fn candidates(&self, doc: &Html) -> Vec<Candidate> {
        let mut thread = Thread::default();
        self.items(doc)
            .into_iter()
            .filter_map(|row| self.parse_row(row))
            .map(|row| self.contextualize(row, &mut thread))
            .collect()
    }

    fn threaded(&self) -> bool {
        false
    }

    fn affordance_selector(&self) -> &'static str {
        r#"div[role="button"], span[role="button"], button"#
    }

    fn wants_click(&self, label: &str) -> bool {
        label == "read more"
    }

    /// Chronological, like the conversation itself.
    fn order_export(&self, items: &mut [Record]) {
        items.sort_by_key(|r| {
            r.date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.timestamp())
                .unwrap_or(i64::MIN)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{expand_targets, extract};
    use crate::merge::CaptureStore;

    fn profile() -> WhatsAppProfile {
        WhatsAppProfile::new(FixedOffset::east_opt(0).unwrap())
    }

    fn chat() -> Vec<Record> {
        let html = std::fs::read_to_string("tests/fixtures/chat.html").unwrap();
        extract(&Html::parse_document(&html), &profile())
    }

    fn rows(body: &str) -> Vec<Record> {
        let html = format!(r#"<html><body><div id="main">{}</div></body></html>"#, body);
        extract(&Html::parse_document(&html), &profile())
    }

    fn row(id: &str, pre: &str, inner: &str) -> String {
        format!(
            r#"<div role="row"><div data-id="false_120363403498637789@g.us_{id}_123@lid"><div data-pre-plain-text="{pre}">{inner}</div></div></div>"#
        )
    }

    #[test]
    fn messages_keyed_by_data_id() {
        let records = chat();
        let ids: Vec<&str> = records.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(
            ids,
            [
                "AC186CE91CBE1B7EA49A2127E5DDE29D",
                "3EB036C7035BE6F5227333",
                "AC808B3EE3AB05D57A37A08250124655",
                "3EB0E63CFC6AC65FD9BF6E",
                "LINKMSG",
                "GIFMSG1",
                "RECALLED1",
            ]
        );
        // a chat is not a thread
        assert_eq!(records[1].parent_link, None);
        assert!(records[3].parent_link.is_some());
    }

    #[test]
    fn time_and_phone_from_pre_plain_text() {
        let first = &chat()[0];
        assert_eq!(first.date.as_deref(), Some("2025-12-10T09:12:00+00:00"));
        assert_eq!(first.handle.as_deref(), Some("+00 10000 00000"));
        assert_eq!(first.name.as_deref(), Some("Member Alpha"));
        assert_eq!(first.extras["user_id"], "120363403498637789");
        assert_eq!(first.extras["is_system_message"], false);
        assert_eq!(
            first.message.as_deref(),
            Some("As far as US dairy argument goes, tariffs matter 🐄")
        );
    }

    #[test]
    fn continuation_inherits_author_and_day() {
        let second = &chat()[1];
        assert_eq!(second.name.as_deref(), Some("Member Alpha"));
        assert_eq!(second.handle, None);
        assert_eq!(second.date.as_deref(), Some("2025-12-10T21:34:00+00:00"));
        assert_eq!(second.extras["reaction_summary"], "👍, ❤ 4");
        assert_eq!(second.metric(LIKES), 4);
    }

    #[test]
    fn system_notice_keeps_text_and_time() {
        let notice = &chat()[2];
        assert_eq!(notice.extras["is_system_message"], true);
        assert!(notice.message.as_deref().unwrap().contains("changed to a new mobile number"));
        assert_eq!(notice.date.as_deref(), Some("2025-12-10T21:34:00+00:00"));
        assert_eq!(notice.name, None);
    }

    #[test]
    fn quoted_reply_points_at_original() {
        let reply = &chat()[3];
        assert_eq!(reply.handle.as_deref(), Some("+00 10000 00001"));
        assert_eq!(reply.extras["quote_author"], "Member Alpha");
        assert_eq!(reply.extras["quote_author_phone"], "001000000000");
        assert_eq!(reply.extras["quote_message_id"], "AC186CE91CBE1B7EA49A2127E5DDE29D");
        assert_eq!(reply.parent_link.as_deref(), Some("AC186CE91CBE1B7EA49A2127E5DDE29D"));
        assert_eq!(reply.message.as_deref(), Some("Fair point, but volumes are small."));
        assert_eq!(reply.name.as_deref(), Some("Member Beta"));
    }

    #[test]
    fn link_only_message_gets_preview_text() {
        let link = &chat()[4];
        let url = "https://thinkingmachines.ai/blog/tinker-general-availability/";
        assert_eq!(link.extras["link_url"], url);
        assert_eq!(link.extras["link_site"], "thinkingmachines.ai");
        assert_eq!(link.extras["link_title"], "Example Title");
        assert_eq!(link.extras["link_description"], "Example description.");
        assert_eq!(
            link.message.as_deref(),
            Some(format!("{url}\nExample Title\nExample description.").as_str())
        );
    }

    #[test]
    fn gif_and_quote_from_unknown_number() {
        let gif = &chat()[5];
        assert_eq!(gif.message.as_deref(), Some(GIF_TEXT));
        assert_eq!(gif.extras["quote_author"], "Member Gamma");
        assert_eq!(gif.extras["quote_author_phone"], "001000000003");
        assert!(!gif.extras.contains_key("quote_message_id"));
        assert_eq!(gif.parent_link, None);
    }

    #[test]
    fn recalled_message_has_no_text() {
        let recalled = &chat()[6];
        assert_eq!(recalled.extras["is_recalled"], true);
        assert_eq!(recalled.message, None);
        assert_eq!(recalled.date.as_deref(), Some("2025-12-10T21:50:00+00:00"));
    }

    #[test]
    fn caption_with_link_keeps_caption() {
        let records = rows(&row(
            "XMSG",
            "[1:15 pm, 12/11/2025] +00 000: ",
            r#"<div class="preview-card"><div><span>Example preview title</span></div>
               <div><span>Example preview description.</span></div><div><span>x.com</span></div></div>
               <div class="selectable-text">Some caption text
               <a href="https://x.com/claudeai/status/1999209593247826419">https://x.com/claudeai/status/1999209593247826419</a></div>
               <div role=""><span dir="ltr">User</span></div>"#,
        ));
        let r = &records[0];
        assert_eq!(r.date.as_deref(), Some("2025-11-12T13:15:00+00:00"));
        assert_eq!(r.extras["link_title"], "Example preview title");
        assert_eq!(r.extras["link_site"], "x.com");
        assert_eq!(
            r.message.as_deref(),
            Some("Some caption text https://x.com/claudeai/status/1999209593247826419")
        );
    }

    #[test]
    fn www_site_and_preview_domain_line() {
        let records = rows(&row(
            "LINKMSG2",
            "[1:15 pm, 12/11/2025] +00 000: ",
            r#"<div><div><span>Now available in public beta</span></div>
               <div><span>Quickstart docs inside.</span></div><div><span>www.linkedin.com</span></div></div>
               <div class="selectable-text"><a href="https://www.linkedin.com/posts/introducing">https://www.linkedin.com/posts/introducing</a></div>
               <div role=""><span dir="ltr">User</span></div>"#,
        ));
        assert_eq!(records[0].extras["link_site"], "linkedin.com");
        assert_eq!(records[0].extras["link_title"], "Now available in public beta");
        assert_eq!(records[0].extras["link_description"], "Quickstart docs inside.");
    }

    #[test]
    fn phone_only_author_is_not_inherited() {
        let records = rows(&[
            row("MSG1", "[9:12 am, 10/12/2025] +00 00000 00000: ",
                r#"<div class="selectable-text">First message</div><div role=""><span dir="ltr">User A</span></div>"#),
            row("MSG2", "[9:13 am, 10/12/2025] +00 00000 00000: ",
                r#"<div class="selectable-text">Continuation message</div>"#),
            row("MSG3", "[9:14 am, 10/12/2025] +00 00000 00001: ",
                r#"<div class="selectable-text">From an unknown contact</div><div role=""><span>+00 00000 00001</span></div>"#),
        ]
        .concat());
        assert_eq!(records[1].name.as_deref(), Some("User A"));
        assert_eq!(records[2].name, None);
        assert_eq!(records[2].handle.as_deref(), Some("+00 00000 00001"));
    }

    #[test]
    fn emoji_wrappers_become_characters() {
        let records = rows(&row(
            "EMOJI",
            "[1:14 pm, 12/11/2025] +00 000: ",
            r#"<div class="selectable-text"><span>Hello <span data-plain-text="🌍">globe</span> world
               <img data-plain-text="😂" src="x"> <img class="emoji" alt="🤔" src="y"></span></div>
               <div role=""><span dir="ltr">User</span></div>"#,
        ));
        assert_eq!(records[0].message.as_deref(), Some("Hello 🌍 world 😂 🤔"));
    }

    #[test]
    fn richer_sighting_wins_on_merge() {
        let short = rows(&row("ABC", "[9:12 am, 10/12/2025] +00 1: ",
            r#"<div class="selectable-text">short</div><div role=""><span dir="ltr">U</span></div>"#));
        let long = rows(&row("ABC", "[9:12 am, 10/12/2025] +00 1: ",
            r#"<div class="selectable-text">a much longer message body with more context</div>
               <div aria-label="Reactions 🔥 in total"></div>"#));
        let mut store = CaptureStore::new();
        store.reconcile(short);
        store.reconcile(long);
        let merged = store.get("ABC").unwrap();
        assert_eq!(merged.message.as_deref(), Some("a much longer message body with more context"));
        assert_eq!(merged.name.as_deref(), Some("U"));
        assert_eq!(merged.extras["reaction_summary"], "🔥");
        assert_eq!(merged.metric(LIKES), 1);
    }

    #[test]
    fn export_is_chronological() {
        let mut records = chat();
        records.reverse();
        profile().order_export(&mut records);
        let dates: Vec<&str> = records.iter().filter_map(|r| r.date.as_deref()).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn read_more_is_the_only_affordance() {
        let html = r#"<html><body><div id="main"><div role="button">Read more</div><div role="button">Delete</div></div></body></html>"#;
        let targets = expand_targets(&Html::parse_document(html), &profile());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].label, "read more");
    }
}
