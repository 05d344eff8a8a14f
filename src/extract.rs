use crate::models::{Task, TaskMap};
use crate::notebook::{self, NotebookError};
use crate::sync::CorrelationStrategy;
use crate::taskline::{self, ParsedLine};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Scans the note library for task lines and returns the fresh local view.
///
/// Notes not modified since the boundary reuse their cached descriptors
/// verbatim (consumed out of `cached`); modified notes are re-parsed and
/// their fresh descriptors claim `remote_id`s from the cache entry by
/// structural match. Files with zero tasks are omitted.
pub fn extract_tasks(
    root: &Path,
    trash: &str,
    boundary: Option<SystemTime>,
    cached: &mut TaskMap,
    strategy: &dyn CorrelationStrategy,
) -> Result<TaskMap, NotebookError> {
    let mut local = TaskMap::new();

    for note in notebook::enumerate_notes(root, trash)? {
        let path = note.content_path;

        let unchanged = boundary.is_some_and(|b| note.modified < b);
        if unchanged {
            if let Some(entry) = cached.remove(&path) {
                debug!(path = %path.display(), "reusing cached tasks for unmodified note");
                local.insert(path, entry);
            }
            continue;
        }

        let content = match notebook::load_content(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable note");
                continue;
            }
        };

        let mut tasks = Vec::new();
        for cell in content.cells.iter().filter(|c| c.is_markdown()) {
            for line in cell.data.lines() {
                match taskline::parse_task_line(line) {
                    ParsedLine::NotTask => {}
                    ParsedLine::BadDue { title, raw } => {
                        warn!(
                            path = %path.display(),
                            title,
                            due = raw,
                            "dropping task with unparseable due date"
                        );
                    }
                    ParsedLine::Task(parsed) => {
                        let mut task = Task {
                            title: parsed.title,
                            due: parsed.due,
                            context: content.title.clone(),
                            remote_id: None,
                        };
                        claim_remote_id(cached, &path, &mut task, strategy);
                        tasks.push(task);
                    }
                }
            }
        }

        if !tasks.is_empty() {
            local.insert(path, tasks);
        }
    }

    Ok(local)
}

/// Adopts the remote id of a structurally matching cached descriptor in the
/// same file, consuming that cache entry. At most one cached descriptor is
/// claimed per fresh task, so duplicate titles pair off one-to-one.
fn claim_remote_id(
    cached: &mut TaskMap,
    path: &Path,
    task: &mut Task,
    strategy: &dyn CorrelationStrategy,
) {
    let Some(entry) = cached.get_mut(path) else {
        return;
    };
    let position = entry
        .iter()
        .position(|old| old.remote_id.is_some() && strategy.matches(task, old));
    if let Some(position) = position {
        task.remote_id = entry.remove(position).remote_id;
    }
    if entry.is_empty() {
        cached.remove(path);
    }
}
