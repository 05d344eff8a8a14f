use crate::cache::{CacheError, SyncCache};
use crate::config::Config;
use crate::extract;
use crate::fetch::{self, RemoteChanges};
use crate::google::{RemoteError, RemoteTaskStore, TasksClient};
use crate::models::{RemoteId, Task, TaskMap, TerminalState};
use crate::notebook::NotebookError;
use crate::rewrite;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Decides when two task descriptors refer to the same task. The engine
/// has no stable task ids on the note side, so identity is structural.
pub trait CorrelationStrategy {
    /// Key under which remote records correlate; records sharing a key
    /// fold a deletion plus an addition into a move.
    fn remote_key(&self, title: &str) -> String;

    /// Whether a freshly extracted task may claim a cached descriptor's
    /// remote id.
    fn matches(&self, fresh: &Task, cached: &Task) -> bool;
}

/// Default strategy: titles correlate remotely, and a local task claims a
/// cached id only when title and due date both agree. Editing either makes
/// the line a new task.
pub struct TitleCorrelation;

impl CorrelationStrategy for TitleCorrelation {
    fn remote_key(&self, title: &str) -> String {
        title.to_string()
    }

    fn matches(&self, fresh: &Task, cached: &Task) -> bool {
        fresh.title == cached.title && fresh.due == cached.due
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Notebook(#[from] NotebookError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Counts of what one run changed on either side.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub completed: usize,
    pub canceled: usize,
    pub moved: usize,
    pub deleted_remote: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        *self == SyncReport::default()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}, completed {}, canceled {}, moved {}, deleted {} remote, {} failed",
            self.created, self.completed, self.canceled, self.moved, self.deleted_remote, self.failed
        )
    }
}

/// One full synchronization pass: load cache, scan notes, fetch remote
/// changes, reconcile, persist the new cache.
pub fn run(config: &Config) -> Result<SyncReport, SyncError> {
    let strategy = TitleCorrelation;

    let cache = SyncCache::new(&config.library.cache_file);
    let (mut cached, boundary) = cache.load()?;

    let mut local = extract::extract_tasks(
        &config.library.root,
        &config.library.trash,
        boundary,
        &mut cached,
        &strategy,
    )?;

    let client = TasksClient::connect(&config.google)?;
    let changes =
        fetch::fetch_remote_changes(&client, boundary, &config.google.active_list, &strategy)?;

    let report = reconcile(&mut local, &mut cached, changes, &client);

    cache.store(&local)?;
    info!(%report, "sync pass finished");
    Ok(report)
}

/// Applies remote changes to the local view and pushes local changes to
/// the remote store, in a fixed order: moves, remote deletions, remote
/// completions, orphan deletions, creations. Individual remote or note
/// failures are logged and counted, never fatal; whatever state results
/// becomes the new cache and the next run converges from there.
pub fn reconcile(
    local: &mut TaskMap,
    cached: &mut TaskMap,
    changes: RemoteChanges,
    store: &dyn RemoteTaskStore,
) -> SyncReport {
    let mut report = SyncReport::default();

    // Identifier changes first, so later steps address tasks where they
    // live now.
    for mv in changes.moves {
        if retarget(local, &mv.from, &mv.to) || retarget(cached, &mv.from, &mv.to) {
            report.moved += 1;
        } else {
            warn!(from = %mv.from, to = %mv.to, "move for unknown task");
        }
    }

    for id in changes.deletions {
        apply_terminal(local, cached, &id, TerminalState::Canceled, &mut report);
    }

    for completion in changes.completions {
        apply_terminal(
            local,
            cached,
            &completion.id,
            TerminalState::Done(completion.date),
            &mut report,
        );
    }

    // Descriptors still in the cache were not re-extracted: their note or
    // line is gone, so their remote counterpart goes too.
    for (path, tasks) in std::mem::take(cached) {
        for task in tasks {
            let Some(id) = task.remote_id else { continue };
            match store.delete_task(&id) {
                Ok(()) => report.deleted_remote += 1,
                Err(err) => {
                    warn!(task = %id, path = %path.display(), error = %err, "remote delete failed");
                    report.failed += 1;
                }
            }
        }
    }

    if !changes.additions.is_empty() {
        info!(
            count = changes.additions.len(),
            "remote-only tasks left untouched"
        );
    }

    match changes.active_list_id {
        Some(list_id) => {
            for (path, tasks) in local.iter_mut() {
                for task in tasks.iter_mut().filter(|t| t.remote_id.is_none()) {
                    match store.insert_task(&list_id, task) {
                        Ok(id) => {
                            task.remote_id = Some(id);
                            report.created += 1;
                        }
                        Err(err) => {
                            warn!(
                                title = task.title,
                                path = %path.display(),
                                error = %err,
                                "remote create failed, will retry next run"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        None => {
            let pending: usize = local
                .values()
                .map(|tasks| tasks.iter().filter(|t| t.remote_id.is_none()).count())
                .sum();
            if pending > 0 {
                warn!(pending, "active task list not found, skipping creations");
            }
        }
    }

    report
}

/// Retires the task addressed by `id`: rewrites its note line to the
/// terminal form and drops its descriptor so it is neither re-created nor
/// re-deleted. A descriptor found only in the cache has already lost its
/// note locally, so only bookkeeping remains.
fn apply_terminal(
    local: &mut TaskMap,
    cached: &mut TaskMap,
    id: &RemoteId,
    state: TerminalState,
    report: &mut SyncReport,
) {
    fn hrtb<F: for<'a> Fn(&'a mut SyncReport) -> &'a mut usize>(f: F) -> F {
        f
    }
    let counter = hrtb(|report: &mut SyncReport| match state {
        TerminalState::Done(_) => &mut report.completed,
        TerminalState::Canceled => &mut report.canceled,
    });

    if let Some((path, task)) = take_by_remote_id(local, id) {
        match rewrite::rewrite_task_line(&path, &task.title, state) {
            Ok(true) => *counter(report) += 1,
            Ok(false) => {
                warn!(task = %id, title = task.title, path = %path.display(), "no matching task line to retire");
                report.failed += 1;
            }
            Err(err) => {
                warn!(task = %id, path = %path.display(), error = %err, "note rewrite failed");
                report.failed += 1;
            }
        }
        return;
    }

    if take_by_remote_id(cached, id).is_some() {
        *counter(report) += 1;
    } else {
        warn!(task = %id, "terminal event for unknown task");
    }
}

fn take_by_remote_id(map: &mut TaskMap, id: &RemoteId) -> Option<(PathBuf, Task)> {
    let (path, index) = map.iter().find_map(|(path, tasks)| {
        tasks
            .iter()
            .position(|t| t.remote_id.as_ref() == Some(id))
            .map(|index| (path.clone(), index))
    })?;

    let tasks = map.get_mut(&path)?;
    let task = tasks.remove(index);
    if tasks.is_empty() {
        map.remove(&path);
    }
    Some((path, task))
}

fn retarget(map: &mut TaskMap, from: &RemoteId, to: &RemoteId) -> bool {
    for tasks in map.values_mut() {
        for task in tasks.iter_mut() {
            if task.remote_id.as_ref() == Some(from) {
                task.remote_id = Some(to.clone());
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Completion, MoveEvent};
    use crate::models::{Cell, NoteContent};
    use crate::notebook;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::path::Path;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeStore {
        inserted: RefCell<Vec<(String, Task)>>,
        deleted: RefCell<Vec<RemoteId>>,
        fail_insert: bool,
    }

    impl RemoteTaskStore for FakeStore {
        fn insert_task(&self, list_id: &str, task: &Task) -> Result<RemoteId, RemoteError> {
            if self.fail_insert {
                return Err(RemoteError::Request("wire down".to_string()));
            }
            let mut inserted = self.inserted.borrow_mut();
            let id = RemoteId::new(list_id, format!("t{}", inserted.len() + 1));
            inserted.push((list_id.to_string(), task.clone()));
            Ok(id)
        }

        fn delete_task(&self, id: &RemoteId) -> Result<(), RemoteError> {
            self.deleted.borrow_mut().push(id.clone());
            Ok(())
        }
    }

    fn task(title: &str) -> Task {
        Task {
            title: title.to_string(),
            due: None,
            context: "Inbox".to_string(),
            remote_id: None,
        }
    }

    fn synced(title: &str, id: RemoteId) -> Task {
        Task {
            remote_id: Some(id),
            ..task(title)
        }
    }

    fn changes_with_list(list: &str) -> RemoteChanges {
        RemoteChanges {
            active_list_id: Some(list.to_string()),
            ..RemoteChanges::default()
        }
    }

    fn write_note(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("content.json");
        let content = NoteContent {
            title: "Inbox".to_string(),
            cells: vec![Cell::markdown(body)],
        };
        notebook::store_content(&path, &content).expect("write note");
        path
    }

    #[test]
    fn new_tasks_acquire_remote_ids() {
        let store = FakeStore::default();
        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![task("one"), task("two")]);
        let mut cached = TaskMap::new();

        let report = reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        assert_eq!(report.created, 2);
        let ids: Vec<_> = local[Path::new("a.json")]
            .iter()
            .map(|t| t.remote_id.clone())
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(RemoteId::new("L1", "t1")),
                Some(RemoteId::new("L1", "t2")),
            ]
        );
    }

    #[test]
    fn second_run_with_no_changes_is_noop() {
        let store = FakeStore::default();
        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![task("one")]);
        let mut cached = TaskMap::new();
        reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        // Next run: extraction reclaimed every cached descriptor, nothing
        // changed remotely.
        let mut second_local = local.clone();
        let mut second_cached = TaskMap::new();
        let store2 = FakeStore::default();
        let report = reconcile(
            &mut second_local,
            &mut second_cached,
            changes_with_list("L1"),
            &store2,
        );

        assert!(report.is_noop());
        assert!(store2.inserted.borrow().is_empty());
        assert!(store2.deleted.borrow().is_empty());
        assert_eq!(second_local, local);
    }

    #[test]
    fn remote_completion_retires_the_note_line() {
        let dir = tempdir().expect("tempdir");
        let path = write_note(dir.path(), "- [ ] pay rent @todo\n");
        let id = RemoteId::new("L1", "t1");

        let mut local = TaskMap::new();
        local.insert(path.clone(), vec![synced("pay rent", id.clone())]);
        let mut cached = TaskMap::new();

        let mut changes = changes_with_list("L1");
        changes.completions.push(Completion {
            id,
            date: NaiveDate::from_ymd_opt(2024, 5, 2).expect("valid date"),
        });

        let store = FakeStore::default();
        let report = reconcile(&mut local, &mut cached, changes, &store);

        assert_eq!(report.completed, 1);
        assert!(local.is_empty());
        let body = notebook::load_content(&path).expect("read note").cells[0]
            .data
            .clone();
        assert_eq!(body, "- [x] pay rent @done(2024-05-02)\n");
    }

    #[test]
    fn remote_deletion_cancels_the_note_line() {
        let dir = tempdir().expect("tempdir");
        let path = write_note(dir.path(), "- [ ] old idea @todo\n");
        let id = RemoteId::new("L1", "t1");

        let mut local = TaskMap::new();
        local.insert(path.clone(), vec![synced("old idea", id.clone())]);
        let mut cached = TaskMap::new();

        let mut changes = changes_with_list("L1");
        changes.deletions.push(id);

        let store = FakeStore::default();
        let report = reconcile(&mut local, &mut cached, changes, &store);

        assert_eq!(report.canceled, 1);
        assert!(local.is_empty());
        assert!(store.deleted.borrow().is_empty());
        let body = notebook::load_content(&path).expect("read note").cells[0]
            .data
            .clone();
        assert_eq!(body, "- [ ] old idea @canceled\n");
    }

    #[test]
    fn unclaimed_cached_tasks_are_deleted_remotely() {
        let id = RemoteId::new("L1", "t7");
        let mut local = TaskMap::new();
        let mut cached = TaskMap::new();
        cached.insert(PathBuf::from("gone.json"), vec![synced("stale", id.clone())]);

        let store = FakeStore::default();
        let report = reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        assert_eq!(report.deleted_remote, 1);
        assert_eq!(store.deleted.borrow().clone(), vec![id]);
    }

    #[test]
    fn cached_task_without_id_is_dropped_silently() {
        let mut local = TaskMap::new();
        let mut cached = TaskMap::new();
        cached.insert(PathBuf::from("gone.json"), vec![task("never pushed")]);

        let store = FakeStore::default();
        let report = reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        assert!(report.is_noop());
        assert!(store.deleted.borrow().is_empty());
    }

    #[test]
    fn move_updates_identifier_without_side_effects() {
        let from = RemoteId::new("L1", "a");
        let to = RemoteId::new("L2", "b");

        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![synced("roaming", from.clone())]);
        let mut cached = TaskMap::new();

        let mut changes = changes_with_list("L1");
        changes.moves.push(MoveEvent { from, to: to.clone() });

        let store = FakeStore::default();
        let report = reconcile(&mut local, &mut cached, changes, &store);

        assert_eq!(report.moved, 1);
        assert!(store.inserted.borrow().is_empty());
        assert!(store.deleted.borrow().is_empty());
        assert_eq!(
            local[Path::new("a.json")][0].remote_id,
            Some(to)
        );
    }

    #[test]
    fn duplicate_titles_create_separate_remote_tasks() {
        let store = FakeStore::default();
        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![task("twin"), task("twin")]);
        let mut cached = TaskMap::new();

        let report = reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        assert_eq!(report.created, 2);
        let ids: Vec<_> = local[Path::new("a.json")]
            .iter()
            .map(|t| t.remote_id.clone())
            .collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn missing_active_list_skips_creations() {
        let store = FakeStore::default();
        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![task("waiting")]);
        let mut cached = TaskMap::new();

        let report = reconcile(&mut local, &mut cached, RemoteChanges::default(), &store);

        assert!(report.is_noop());
        assert!(store.inserted.borrow().is_empty());
        assert_eq!(local[Path::new("a.json")][0].remote_id, None);
    }

    #[test]
    fn failed_create_leaves_task_for_the_next_run() {
        let store = FakeStore {
            fail_insert: true,
            ..FakeStore::default()
        };
        let mut local = TaskMap::new();
        local.insert(PathBuf::from("a.json"), vec![task("flaky")]);
        let mut cached = TaskMap::new();

        let report = reconcile(&mut local, &mut cached, changes_with_list("L1"), &store);

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 0);
        assert_eq!(local[Path::new("a.json")][0].remote_id, None);
    }
}
