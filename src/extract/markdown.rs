use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());

/// Markdown for rendered post HTML: links keep their target, mentions and
/// emoji images become text, lists get markers and code keeps its fences.
pub fn to_markdown(el: ElementRef<'_>, base: Option<&Url>) -> String {
    let mut cx = Context {
        lists: Vec::new(),
        base,
    };
    cleanup(&children(el, &mut cx)).trim().to_string()
}

/// Same as [`to_markdown`] for an HTML string, such as a post's `cooked`
/// field.
pub fn fragment_to_markdown(html: &str, base: Option<&Url>) -> String {
    let fragment = Html::parse_fragment(html);
    to_markdown(fragment.root_element(), base)
}

struct Context<'u> {
    /// Enclosing lists, innermost last; true for `<ol>`.
    lists: Vec<bool>,
    base: Option<&'u Url>,
}

fn cleanup(text: &str) -> String {
    BLANK_LINES_RE
        .replace_all(&text.replace('\u{a0}', " "), "\n\n")
        .into_owned()
}

fn children(el: ElementRef<'_>, cx: &mut Context) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&WS_RE.replace_all(text, " ")),
            Node::Element(_) => {
                if let Some(e) = ElementRef::wrap(child) {
                    out.push_str(&element(e, cx));
                }
            }
            _ => {}
        }
    }
    out
}

fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn raw_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn block(text: &str) -> String {
    let trimmed = cleanup(text);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n\n{}\n\n", trimmed)
    }
}

fn wrap(el: ElementRef<'_>, cx: &mut Context, mark: &str) -> String {
    let inner = children(el, cx);
    let inner = inner.trim();
    if inner.is_empty() {
        String::new()
    } else {
        format!("{mark}{inner}{mark}")
    }
}

fn element(el: ElementRef<'_>, cx: &mut Context) -> String {
    let attr = |name: &str| el.value().attr(name).filter(|v| !v.is_empty());
    match el.value().name() {
        "script" | "style" | "noscript" => String::new(),
        "span" | "a" if has_class(el, "mention") => {
            let name = raw_text(el);
            format!("@{}", name.trim().trim_start_matches('@'))
        }
        "img" if has_class(el, "emoji") => attr("alt").or(attr("title")).unwrap_or("").to_string(),
        "br" => "  \n".to_string(),
        "p" | "div" => block(&children(el, cx)),
        "strong" | "b" => wrap(el, cx, "**"),
        "em" | "i" => wrap(el, cx, "*"),
        "code" => {
            let content = WS_RE.replace_all(&raw_text(el), " ").trim().to_string();
            let in_pre = el
                .parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|p| p.value().name() == "pre");
            match (content.is_empty(), in_pre) {
                (true, _) => String::new(),
                (false, true) => content,
                (false, false) => format!("`{}`", content),
            }
        }
        "pre" => {
            let text = raw_text(el);
            if text.trim().is_empty() {
                return String::new();
            }
            format!("\n\n```\n{}\n```\n\n", text.trim_end())
        }
        "blockquote" => {
            let content = cleanup(children(el, cx).trim());
            if content.is_empty() {
                return String::new();
            }
            let quoted: Vec<String> = content
                .lines()
                .map(|line| format!("> {}", line.trim()).trim_end().to_string())
                .collect();
            format!("\n\n{}\n\n", quoted.join("\n"))
        }
        "ul" | "ol" => {
            let ordered = el.value().name() == "ol";
            cx.lists.push(ordered);
            let items: Vec<String> = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "li")
                .enumerate()
                .map(|(i, li)| list_item(li, cx, i + 1))
                .filter(|s| !s.is_empty())
                .collect();
            cx.lists.pop();
            format!("\n{}\n", items.join("\n"))
        }
        "li" => list_item(el, cx, 1),
        "hr" => "\n\n---\n\n".to_string(),
        "a" => {
            let inner = children(el, cx);
            let Some(href) = attr("href") else {
                return inner.trim().to_string();
            };
            let target = cx
                .base
                .and_then(|b| b.join(href).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| href.to_string());
            let text = match inner.trim() {
                "" => href,
                t => t,
            };
            format!("[{}]({})", text, target)
        }
        "img" => {
            let alt = attr("alt").unwrap_or("");
            match attr("src") {
                Some(src) => format!("![{}]({})", alt, src),
                None => alt.to_string(),
            }
        }
        "table" => {
            let rows: Vec<Vec<String>> = el
                .select(&ROW)
                .map(|row| {
                    row.children()
                        .filter_map(ElementRef::wrap)
                        .map(|cell| WS_RE.replace_all(&raw_text(cell), " ").trim().to_string())
                        .collect()
                })
                .collect();
            let Some(header) = rows.first() else {
                return String::new();
            };
            let rule = vec!["---".to_string(); header.len()];
            let lines: Vec<String> = std::iter::once(header)
                .chain(std::iter::once(&rule))
                .chain(&rows[1..])
                .map(|cols| format!("| {} |", cols.join(" | ")))
                .collect();
            format!("\n{}\n\n", lines.join("\n"))
        }
        _ => children(el, cx),
    }
}

fn list_item(li: ElementRef<'_>, cx: &mut Context, position: usize) -> String {
    let marker = match cx.lists.last() {
        Some(true) => format!("{}. ", position),
        _ => "- ".to_string(),
    };
    let content = cleanup(children(li, cx).trim());
    let mut lines = content.lines();
    let Some(head) = lines.next() else {
        return String::new();
    };
    let pad = " ".repeat(marker.len());
    let mut out = format!("{}{}", marker, head.trim());
    for line in lines.filter(|l| !l.trim().is_empty()) {
        out.push('\n');
        out.push_str(&pad);
        out.push_str(line.trim_end());
    }
    out
}
