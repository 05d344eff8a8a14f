use crate::models::TerminalState;
use crate::notebook::{self, NotebookError};
use crate::taskline::{self, ParsedLine};
use std::path::Path;
use tracing::debug;

/// Rewrites the first task line in `path` whose parsed title equals
/// `title` into the given terminal form, then writes the note back.
/// Returns `Ok(false)` when no line matched, leaving the note untouched.
///
/// Only one line is rewritten per call: duplicate task lines in a note
/// produce duplicate remote tasks, and each terminal event retires
/// exactly one of them.
pub fn rewrite_task_line(
    path: &Path,
    title: &str,
    state: TerminalState,
) -> Result<bool, NotebookError> {
    let mut content = notebook::load_content(path)?;

    for cell in content.cells.iter_mut().filter(|c| c.is_markdown()) {
        if let Some(data) = rewrite_in_cell(&cell.data, title, state) {
            cell.data = data;
            notebook::store_content(path, &content)?;
            debug!(path = %path.display(), title, "rewrote task line to terminal form");
            return Ok(true);
        }
    }

    Ok(false)
}

fn rewrite_in_cell(data: &str, title: &str, state: TerminalState) -> Option<String> {
    let mut lines: Vec<&str> = data.lines().collect();
    let hit = lines.iter().position(|line| {
        matches!(taskline::parse_task_line(line), ParsedLine::Task(parsed) if parsed.title == title)
    })?;

    let rewritten = taskline::rewrite_terminal(lines[hit], state)?;
    lines[hit] = &rewritten;
    let mut out = lines.join("\n");
    if data.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}
