use crate::google::{RemoteError, RemoteTaskRecord, TasksClient};
use crate::models::RemoteId;
use crate::sync::CorrelationStrategy;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::warn;

/// A remote task completed since the boundary, with its completion date.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: RemoteId,
    pub date: NaiveDate,
}

/// A remote deletion and addition folded into one identifier change.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveEvent {
    pub from: RemoteId,
    pub to: RemoteId,
}

/// Everything that changed remotely since the boundary, classified.
#[derive(Debug, Default)]
pub struct RemoteChanges {
    /// Resolved id of the list new tasks are created in; `None` when no
    /// list carries the configured title.
    pub active_list_id: Option<String>,
    pub completions: Vec<Completion>,
    pub moves: Vec<MoveEvent>,
    /// Deletions that did not fold into a move.
    pub deletions: Vec<RemoteId>,
    /// Additions that did not fold into a move. These exist remotely only
    /// and are never imported into the note store.
    pub additions: Vec<RemoteId>,
}

/// Fetches all lists and classifies every record updated since the
/// boundary. Lists are processed in the service's stable order so move
/// folding among duplicate titles is reproducible.
pub fn fetch_remote_changes(
    client: &TasksClient,
    boundary: Option<SystemTime>,
    active_list: &str,
    strategy: &dyn CorrelationStrategy,
) -> Result<RemoteChanges, RemoteError> {
    let lists = client.list_task_lists()?;
    let active_list_id = lists
        .iter()
        .find(|list| list.title == active_list)
        .map(|list| list.id.clone());

    let since = updated_min(boundary);
    let mut fetched = Vec::new();
    for list in &lists {
        let records = client.list_tasks_updated_since(&list.id, &since)?;
        fetched.push((list.id.clone(), records));
    }

    let mut changes = classify(&fetched, strategy);
    changes.active_list_id = active_list_id;
    Ok(changes)
}

/// Pure classification pass over fetched records. A deleted and an added
/// record sharing a correlation key collapse into one move; the remainder
/// stay deletions and additions.
pub fn classify(
    fetched: &[(String, Vec<RemoteTaskRecord>)],
    strategy: &dyn CorrelationStrategy,
) -> RemoteChanges {
    let mut pending_added: BTreeMap<String, RemoteId> = BTreeMap::new();
    let mut pending_deleted: BTreeMap<String, RemoteId> = BTreeMap::new();
    let mut changes = RemoteChanges::default();

    for (list_id, records) in fetched {
        for record in records {
            let title = record.title.clone().unwrap_or_default();
            let key = strategy.remote_key(&title);
            let id = RemoteId::new(list_id.clone(), record.id.clone());

            if record.deleted {
                if let Some(to) = pending_added.remove(&key) {
                    changes.moves.push(MoveEvent { from: id, to });
                } else {
                    pending_deleted.insert(key, id);
                }
            } else if record.status.as_deref() == Some("completed") {
                match record.completed.as_deref().and_then(completion_date) {
                    Some(date) => changes.completions.push(Completion { id, date }),
                    None => {
                        warn!(task = %id, "completed record without a usable timestamp");
                    }
                }
            } else if let Some(from) = pending_deleted.remove(&key) {
                changes.moves.push(MoveEvent { from, to: id });
            } else {
                pending_added.insert(key, id);
            }
        }
    }

    changes.deletions = pending_deleted.into_values().collect();
    changes.additions = pending_added.into_values().collect();
    changes
}

/// RFC 3339 form of the boundary for the `updatedMin` query; epoch on a
/// first run so everything is fetched.
pub fn updated_min(boundary: Option<SystemTime>) -> String {
    let at: DateTime<Utc> = boundary
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The completion timestamp carries the date in its first ten characters.
fn completion_date(stamp: &str) -> Option<NaiveDate> {
    if stamp.len() < 10 {
        return None;
    }
    NaiveDate::parse_from_str(&stamp[..10], "%Y-%m-%d").ok()
}
