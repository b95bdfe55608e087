//! # Entity Scanning
//!
//! Finds hashtags and links in message text, and derives topic names from them.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::types::{Entity, EntityKind};

static RE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:https?://[^\s<>"]+|www\.[^\s<>"]+|[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.[a-z]{2,}(?::\d+)?(?:/[^\s<>"]*)?)"#,
    )
    .unwrap()
});
static RE_HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w&/#])(#[\p{L}\p{N}_]*[\p{L}_][\p{L}\p{N}_]*)").unwrap());

/// Tags carried by a message, lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub has_hashtags: bool,
    /// Names without the leading `#`.
    pub tags: Vec<String>,
    /// As written, with the `#`.
    pub raw: Vec<String>,
}

/// Hashtag and URL spans of `text`, ordered by offset. Hashtags inside links are ignored.
pub fn scan(text: &str) -> Vec<Entity> {
    let mut entities: Vec<Entity> = RE_URL
        .find_iter(text)
        .map(|m| {
            let trimmed = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
            Entity {
                kind: EntityKind::Url,
                offset: m.start(),
                length: trimmed.len(),
            }
        })
        .filter(|e| e.length > 0)
        .collect();

    let hashtags: Vec<Entity> = RE_HASHTAG
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| Entity {
            kind: EntityKind::Hashtag,
            offset: m.start(),
            length: m.len(),
        })
        .filter(|tag| {
            !entities
                .iter()
                .any(|url| tag.offset >= url.offset && tag.offset < url.offset + url.length)
        })
        .collect();

    entities.extend(hashtags);
    entities.sort_by_key(|e| e.offset);
    entities
}

pub fn extract_tags(text: &str, entities: &[Entity]) -> Tags {
    let mut tags = Tags::default();
    for entity in entities.iter().filter(|e| e.kind == EntityKind::Hashtag) {
        let raw = entity.slice(text).trim().to_lowercase();
        if raw.is_empty() {
            continue;
        }
        let name = raw.strip_prefix('#').unwrap_or(&raw).to_string();
        if !tags.tags.contains(&name) {
            tags.tags.push(name);
            tags.raw.push(raw);
        }
    }
    tags.has_hashtags = !tags.tags.is_empty();
    tags
}

/// Removes the hashtags from `text` and collapses the leftover whitespace.
pub fn strip_hashtags(text: &str, entities: &[Entity]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in entities.iter().filter(|e| e.kind == EntityKind::Hashtag) {
        if entity.offset < cursor || entity.offset + entity.length > text.len() {
            continue;
        }
        out.push_str(&text[cursor..entity.offset]);
        cursor = entity.offset + entity.length;
    }
    out.push_str(&text[cursor..]);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hostname of a link without scheme and `www.`.
pub fn hostname(link: &str) -> Option<String> {
    let link = link.trim();
    let without_scheme = link.split_once("://").map(|(_, rest)| rest).unwrap_or(link);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    let parsed = url::Url::parse(&format!("https://{}", without_www)).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Turns a free-form topic name into a storable one: `c++` -> `cpp`, `c#` -> `csharp`.
pub fn normalize_topic(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        match c {
            '+' => out.push('p'),
            '#' => out.push_str("sharp"),
            '.' => out.push_str("dot"),
            '/' => out.push_str("slash"),
            '[' | ']' | '{' | '}' | ':' | ';' | '*' | '^' | '=' => {}
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }
    out
}

/// Topic names typed by a user for a custom subscription, comma separated.
/// Names shorter than 2 or longer than 15 characters are discarded.
pub fn parse_custom_topics(answer: &str) -> Vec<(String, String)> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|t| (2..=15).contains(&t.chars().count()))
        .map(|t| {
            let stripped = t.strip_prefix('#').unwrap_or(t);
            (capitalize(stripped), normalize_topic(stripped))
        })
        .filter(|(_, name)| !name.is_empty())
        .collect()
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
