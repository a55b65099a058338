//! Task <-> fragment encoding.
//!
//! A task is stored remotely as a fragment whose `content` is a small
//! frontmatter block followed by the markdown description and, when the task
//! has comments, a marker line and a JSON array:
//!
//! ```text
//! ---
//! status: "in-progress"
//! priority: "high"
//! kanbanOrder: 3
//! listOrder: 7
//! createdAt: "2025-01-04T10:00:00.000Z"
//! startDate: "2025-01-06"
//! dependencies:
//!   - "frag-123"
//! ---
//!
//! Description text.
//!
//! <!-- comments:json -->
//! [{"id":"...","text":"Looks good","author":"Ada","authorEmail":"","createdAt":"..."}]
//! ```
//!
//! The frontmatter is a private wire format, not YAML. Supported value shapes
//! are `key: "quoted"`, `key: <number>`, `key: <bareword>` and a `key:` line
//! followed by indented `- "item"` lines. Quotes inside values are not
//! escaped: a `"` inside a dependency id or date does not survive a round
//! trip.
//!
//! Decoding never fails. Missing or malformed pieces fall back to defaults so
//! one corrupted fragment cannot break a listing.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::model::{
    dedup_preserving_order, Fragment, FragmentPayload, Task, TaskComment, TaskPriority, TaskStatus,
};

/// Application id written into every task fragment's source tag.
pub const APP_ID: &str = "my-tasks-plan";
/// Tag identifying fragments owned by this application.
pub const SOURCE_TAG: &str = "source:my-tasks-plan";
/// Tag shared by every task fragment, regardless of source.
pub const TASK_TAG: &str = "task";
pub const STATUS_TAG_PREFIX: &str = "status:";
pub const PRIORITY_TAG_PREFIX: &str = "priority:";
pub const PROJECT_TAG_PREFIX: &str = "project:";

const FRONTMATTER_DELIM: &str = "---";
const COMMENTS_MARKER: &str = "<!-- comments:json -->";

/// Tags reserved for bookkeeping: the literal `task` and anything namespaced.
pub fn is_system_tag(tag: &str) -> bool {
    tag == TASK_TAG || tag.contains(':')
}

/// Encode a task into a fragment create/update payload.
///
/// `id` and `updated_at` are not part of the encoding; they belong to the
/// fragment wrapper.
pub fn encode(task: &Task) -> FragmentPayload {
    let mut lines = vec![
        FRONTMATTER_DELIM.to_string(),
        format!("status: \"{}\"", task.status),
        format!("priority: \"{}\"", task.priority),
        format!("kanbanOrder: {}", task.kanban_order),
        format!("listOrder: {}", task.list_order),
        format!("createdAt: \"{}\"", task.created_at),
    ];

    if let Some(start) = task.start_date.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("startDate: \"{start}\""));
    }
    if let Some(end) = task.end_date.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("endDate: \"{end}\""));
    }

    if !task.dependencies.is_empty() {
        lines.push("dependencies:".to_string());
        for dep in &task.dependencies {
            lines.push(format!("  - \"{dep}\""));
        }
    }

    lines.push(FRONTMATTER_DELIM.to_string());

    let mut content = format!("{}\n\n{}", lines.join("\n"), task.description);

    if !task.comments.is_empty() {
        // Serializing a Vec of plain string structs cannot fail.
        let json = serde_json::to_string(&task.comments).unwrap_or_else(|_| "[]".to_string());
        content.push_str(&format!("\n\n{COMMENTS_MARKER}\n{json}"));
    }

    FragmentPayload {
        title: task.title.clone(),
        content,
        summary: format!("Task: {} [{}/{}]", task.title, task.status, task.priority),
        tags: encode_tags(task),
    }
}

fn encode_tags(task: &Task) -> Vec<String> {
    let mut tags = vec![
        TASK_TAG.to_string(),
        SOURCE_TAG.to_string(),
        format!("{STATUS_TAG_PREFIX}{}", task.status),
        format!("{PRIORITY_TAG_PREFIX}{}", task.priority),
    ];
    tags.extend(
        task.projects
            .iter()
            .map(|project| format!("{PROJECT_TAG_PREFIX}{project}")),
    );
    tags.extend(task.tags.iter().cloned());
    dedup_preserving_order(tags)
}

/// Decode a fragment into a task.
pub fn decode(fragment: &Fragment) -> Task {
    let content = fragment.content.as_str();
    let frontmatter = parse_frontmatter(content);
    let (description, comments_raw) = split_body(content);

    let status: TaskStatus = frontmatter
        .string("status")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    let priority: TaskPriority = frontmatter
        .string("priority")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    let created_at = frontmatter
        .string("createdAt")
        .map(str::to_string)
        .or_else(|| fragment.updated_at.clone().filter(|ts| !ts.is_empty()))
        .unwrap_or_else(now_iso);
    let updated_at = fragment
        .updated_at
        .clone()
        .filter(|ts| !ts.is_empty())
        .unwrap_or_else(|| created_at.clone());

    let tags = dedup_preserving_order(
        fragment
            .tags
            .iter()
            .filter(|tag| !is_system_tag(tag))
            .cloned(),
    );
    let projects = dedup_preserving_order(fragment.tags.iter().filter_map(|tag| {
        tag.strip_prefix(PROJECT_TAG_PREFIX)
            .map(|project| project.to_string())
    }));

    Task {
        id: fragment.id.clone(),
        title: fragment.title.clone(),
        description,
        status,
        priority,
        kanban_order: frontmatter.integer("kanbanOrder").unwrap_or(0),
        list_order: frontmatter.integer("listOrder").unwrap_or(0),
        created_at,
        updated_at,
        tags,
        projects,
        dependencies: frontmatter.list("dependencies").unwrap_or_default(),
        comments: decode_comments(&fragment.id, comments_raw),
        start_date: frontmatter.string("startDate").map(str::to_string),
        end_date: frontmatter.string("endDate").map(str::to_string),
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FrontmatterValue {
    Str(String),
    Number(f64),
    List(Vec<String>),
}

#[derive(Debug, Default)]
pub(crate) struct Frontmatter {
    values: HashMap<String, FrontmatterValue>,
}

impl Frontmatter {
    #[cfg(test)]
    pub(crate) fn get(&self, key: &str) -> Option<&FrontmatterValue> {
        self.values.get(key)
    }

    /// Non-empty string value.
    fn string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(FrontmatterValue::Str(value)) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn integer(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(FrontmatterValue::Number(value)) => Some(value.trunc() as i64),
            _ => None,
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(key) {
            Some(FrontmatterValue::List(items)) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Locate the frontmatter block: content must open with `---\n`; the block
/// ends at the first following `\n---`.
fn frontmatter_block(content: &str) -> Option<(&str, usize)> {
    let rest = content.strip_prefix("---\n")?;
    let close = rest.find("\n---")?;
    let block = &rest[..close];
    let end = "---\n".len() + close + "\n---".len();
    Some((block, end))
}

pub(crate) fn parse_frontmatter(content: &str) -> Frontmatter {
    let Some((block, _)) = frontmatter_block(content) else {
        return Frontmatter::default();
    };

    let mut values = HashMap::new();
    let mut current_array: Option<(String, Vec<String>)> = None;

    for line in block.split('\n') {
        if let Some((_, items)) = current_array.as_mut() {
            if let Some(item) = parse_array_item(line) {
                items.push(item.to_string());
                continue;
            }
        }

        if let Some((key, items)) = current_array.take() {
            values.insert(key, FrontmatterValue::List(items));
        }

        let Some((key, raw_value)) = parse_key_value(line) else {
            continue;
        };
        let value = raw_value.trim();

        if value.is_empty() {
            current_array = Some((key.to_string(), Vec::new()));
            continue;
        }

        let parsed = if let Some(quoted) = value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            FrontmatterValue::Str(quoted.to_string())
        } else if is_number(value) {
            match value.parse::<f64>() {
                Ok(number) => FrontmatterValue::Number(number),
                Err(_) => FrontmatterValue::Str(value.to_string()),
            }
        } else {
            FrontmatterValue::Str(value.to_string())
        };
        values.insert(key.to_string(), parsed);
    }

    if let Some((key, items)) = current_array {
        values.insert(key, FrontmatterValue::List(items));
    }

    Frontmatter { values }
}

/// `<ws>+ - <ws>+ "?item"?` where the item holds no quote characters.
fn parse_array_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.len() == line.len() {
        return None;
    }
    let after_dash = trimmed.strip_prefix('-')?;
    let item = after_dash.trim_start();
    if item.len() == after_dash.len() {
        return None;
    }
    let item = item.strip_prefix('"').unwrap_or(item);
    let item = item.strip_suffix('"').unwrap_or(item);
    if item.contains('"') {
        return None;
    }
    Some(item)
}

/// `<word>: <value>` where word is `[A-Za-z0-9_]+`.
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = &line[..colon];
    if key.is_empty() || !key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return None;
    }
    Some((key, &line[colon + 1..]))
}

/// `-?\d+(\.\d+)?`
fn is_number(value: &str) -> bool {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit());
    all_digits(whole) && fraction.map_or(true, all_digits)
}

/// Split the body after the frontmatter into (description, raw comments).
///
/// The marker is located by its first occurrence after the frontmatter, so
/// marker-like text inside comment bodies (which live after the real marker)
/// cannot shift the split.
fn split_body(content: &str) -> (String, Option<&str>) {
    let after_frontmatter = match frontmatter_block(content) {
        Some((_, end)) => content[end..].trim_start_matches('\n'),
        None => content,
    };

    match after_frontmatter.find(COMMENTS_MARKER) {
        Some(idx) => {
            let description = after_frontmatter[..idx].trim().to_string();
            let remainder = &after_frontmatter[idx + COMMENTS_MARKER.len()..];
            (description, remainder.strip_prefix('\n'))
        }
        None => (after_frontmatter.trim().to_string(), None),
    }
}

fn decode_comments(fragment_id: &str, raw: Option<&str>) -> Vec<TaskComment> {
    let Some(json) = raw.map(str::trim).filter(|json| !json.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<TaskComment>>(json) {
        Ok(comments) => comments,
        Err(err) => {
            warn!(fragment = fragment_id, error = %err, "ignoring malformed comments block");
            Vec::new()
        }
    }
}
