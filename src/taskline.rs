use crate::models::TerminalState;
use chrono::NaiveDate;
use std::ops::Range;

const TODO_MARKER: &str = "@todo";
const DUE_MARKER: &str = "@due";

/// A successfully parsed task line: the stripped title plus an optional
/// due date taken from a `@due(...)` annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskLine {
    pub title: String,
    pub due: Option<NaiveDate>,
}

/// Outcome of scanning one line of a markdown cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// No bare `@todo` marker on this line.
    NotTask,
    Task(TaskLine),
    /// Marker present but the `@due(...)` value did not parse as a date.
    BadDue { title: String, raw: String },
}

/// Scans a line for a bare `@todo` marker. `@todo(...)` carries an argument
/// and is deliberately not a sync marker. The marker must be preceded by
/// whitespace and followed by whitespace or end of line.
pub fn parse_task_line(line: &str) -> ParsedLine {
    let Some(marker) = find_bare_marker(line, TODO_MARKER) else {
        return ParsedLine::NotTask;
    };

    let title = strip_title(&line[..marker.start]);
    if title.is_empty() {
        return ParsedLine::NotTask;
    }

    match find_due_value(line) {
        None => ParsedLine::Task(TaskLine { title, due: None }),
        Some(raw) => match parse_due(&raw) {
            Some(due) => ParsedLine::Task(TaskLine { title, due: Some(due) }),
            None => ParsedLine::BadDue { title, raw },
        },
    }
}

/// Replaces the bare `@todo` marker on `line` with the terminal form.
/// For `Done` the open checkbox is flipped to the closed form as well.
/// Returns `None` when the line has no bare marker.
pub fn rewrite_terminal(line: &str, state: TerminalState) -> Option<String> {
    let marker = find_bare_marker(line, TODO_MARKER)?;

    let replacement = match state {
        TerminalState::Done(date) => format!("@done({})", date.format("%Y-%m-%d")),
        TerminalState::Canceled => "@canceled".to_string(),
    };

    let mut out = String::with_capacity(line.len() + replacement.len());
    out.push_str(&line[..marker.start]);
    out.push_str(&replacement);
    out.push_str(&line[marker.end..]);
    let mut out = out.trim_end().to_string();

    if matches!(state, TerminalState::Done(_)) {
        out = out.replacen("- [ ] ", "- [x] ", 1);
    }

    Some(out)
}

/// Byte range of a bare `name` token: preceded by whitespace, followed by
/// whitespace or end of line, and not opening an argument list.
fn find_bare_marker(line: &str, name: &str) -> Option<Range<usize>> {
    let bytes = line.as_bytes();
    let mut offset = 0usize;

    while let Some(pos) = line[offset..].find(name) {
        let start = offset + pos;
        let end = start + name.len();
        offset = end;

        let preceded = start > 0 && bytes[start - 1].is_ascii_whitespace();
        if !preceded {
            continue;
        }
        match bytes.get(end) {
            None => return Some(start..end),
            Some(b) if b.is_ascii_whitespace() => return Some(start..end),
            _ => continue,
        }
    }

    None
}

/// Contents of the first whitespace-preceded `@due(...)` annotation.
fn find_due_value(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let needle = format!("{DUE_MARKER}(");
    let mut offset = 0usize;

    while let Some(pos) = line[offset..].find(&needle) {
        let start = offset + pos;
        offset = start + needle.len();

        if start == 0 || !bytes[start - 1].is_ascii_whitespace() {
            continue;
        }
        let value_start = start + needle.len();
        let close = line[value_start..].find(')')?;
        let value = line[value_start..value_start + close].trim();
        if value.is_empty() {
            return None;
        }
        return Some(value.to_string());
    }

    None
}

/// Strips one leading bullet and a `[ ]`/`[x]` checkbox from the text
/// preceding the marker, leaving the bare title.
fn strip_title(prefix: &str) -> String {
    let mut text = prefix.trim();
    if let Some(rest) = text.strip_prefix('-').or_else(|| text.strip_prefix('*')) {
        text = rest.trim_start();
    }

    let mut chars = text.chars();
    if chars.next() == Some('[') && chars.next().is_some() && chars.next() == Some(']') {
        text = chars.as_str().trim_start();
    }

    text.trim_end().to_string()
}

/// Accepts the date formats seen in real notes. The original tooling ran
/// values through a lenient parser; this keeps the common subset.
pub fn parse_due(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%b %d, %Y", "%B %d, %Y"];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // RFC 3339 timestamps keep the date in the first ten characters.
    if trimmed.len() >= 10 {
        if let Ok(date) = NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d") {
            return Some(date);
        }
    }
    None
}
