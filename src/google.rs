use crate::config::GoogleConfig;
use crate::models::{RemoteId, Task};
use chrono::{NaiveDate, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TASKS_API: &str = "https://tasks.googleapis.com/tasks/v1";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Request(String),
    #[error("{op} failed: HTTP {status}")]
    Status {
        op: &'static str,
        status: reqwest::StatusCode,
    },
}

/// Seam between the reconciler and the remote service, so tests can
/// substitute an in-memory double for the HTTP client.
pub trait RemoteTaskStore {
    fn insert_task(&self, list_id: &str, task: &Task) -> Result<RemoteId, RemoteError>;
    fn delete_task(&self, id: &RemoteId) -> Result<(), RemoteError>;
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TaskListsResponse {
    items: Option<Vec<TaskListEntry>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskListEntry {
    pub id: String,
    pub title: String,
}

#[derive(Deserialize)]
struct TasksResponse {
    items: Option<Vec<RemoteTaskRecord>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// One task record as the service returns it, including tombstones for
/// deleted tasks and completion timestamps.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTaskRecord {
    pub id: String,
    pub title: Option<String>,
    pub status: Option<String>,
    pub completed: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Serialize)]
struct TaskInsertRequest {
    title: String,
    status: String,
    notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    due: Option<String>,
}

/// Blocking Google Tasks client carrying a valid access token.
pub struct TasksClient {
    http: Client,
    access_token: String,
}

impl TasksClient {
    pub fn connect(config: &GoogleConfig) -> Result<Self, RemoteError> {
        let access_token = ensure_access_token(config)?;
        Ok(Self {
            http: Client::new(),
            access_token,
        })
    }

    /// Lists all task lists, following pagination.
    pub fn list_task_lists(&self) -> Result<Vec<TaskListEntry>, RemoteError> {
        let url = format!("{TASKS_API}/users/@me/lists");
        let mut lists = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[("maxResults", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let resp = request
                .send()
                .map_err(|e| RemoteError::Request(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(RemoteError::Status {
                    op: "task list enumeration",
                    status: resp.status(),
                });
            }
            let body: TaskListsResponse = resp
                .json()
                .map_err(|e| RemoteError::Request(e.to_string()))?;
            lists.extend(body.items.unwrap_or_default());
            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(lists)
    }

    /// Fetches every task in a list updated at or after `updated_min`,
    /// including completed, hidden, and deleted records.
    pub fn list_tasks_updated_since(
        &self,
        list_id: &str,
        updated_min: &str,
    ) -> Result<Vec<RemoteTaskRecord>, RemoteError> {
        let url = format!("{TASKS_API}/lists/{list_id}/tasks");
        let mut tasks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[
                    ("showCompleted", "true"),
                    ("showHidden", "true"),
                    ("showDeleted", "true"),
                    ("updatedMin", updated_min),
                    ("maxResults", PAGE_SIZE),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let resp = request
                .send()
                .map_err(|e| RemoteError::Request(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(RemoteError::Status {
                    op: "task fetch",
                    status: resp.status(),
                });
            }
            let body: TasksResponse = resp
                .json()
                .map_err(|e| RemoteError::Request(e.to_string()))?;
            tasks.extend(body.items.unwrap_or_default());
            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(list = list_id, count = tasks.len(), "fetched remote tasks");
        Ok(tasks)
    }
}

impl RemoteTaskStore for TasksClient {
    fn insert_task(&self, list_id: &str, task: &Task) -> Result<RemoteId, RemoteError> {
        let url = format!("{TASKS_API}/lists/{list_id}/tasks");
        let body = TaskInsertRequest {
            title: task.title.clone(),
            status: "needsAction".to_string(),
            notes: format!("[ {} ]", task.context),
            due: task.due.map(due_to_rfc3339),
        };
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status {
                op: "task create",
                status: resp.status(),
            });
        }
        let created: RemoteTaskRecord = resp
            .json()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        Ok(RemoteId::new(list_id, created.id))
    }

    fn delete_task(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let url = format!("{TASKS_API}/lists/{}/tasks/{}", id.list, id.task);
        let resp = self
            .http
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status {
                op: "task delete",
                status: resp.status(),
            });
        }
        Ok(())
    }
}

/// The service stores due dates as date-only values carried in an RFC 3339
/// timestamp.
pub fn due_to_rfc3339(due: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", due.format("%Y-%m-%d"))
}

/// Returns a usable access token from the stored token file, refreshing it
/// when it is about to expire. Obtaining the initial grant is external to
/// the engine: without a token file the run fails with guidance.
fn ensure_access_token(config: &GoogleConfig) -> Result<String, RemoteError> {
    if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
        return Err(RemoteError::Config(
            "google client_id/client_secret required in config.toml".to_string(),
        ));
    }
    if !config.token_path.exists() {
        return Err(RemoteError::Auth(format!(
            "no stored token at {}; authorize the Tasks scope first",
            config.token_path.display()
        )));
    }

    let stored = load_token(&config.token_path)?;
    if token_is_fresh(&stored, Utc::now().timestamp()) {
        return Ok(stored.access_token);
    }

    let refreshed = refresh_access_token(config, &stored.refresh_token)?;
    save_token(&config.token_path, &refreshed)?;
    Ok(refreshed.access_token)
}

/// A token is fresh while it has more than a minute of validity left.
fn token_is_fresh(token: &StoredToken, now: i64) -> bool {
    token.expires_at > now + 60
}

fn refresh_access_token(
    config: &GoogleConfig,
    refresh_token: &str,
) -> Result<StoredToken, RemoteError> {
    let client = Client::new();
    let resp = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|e| RemoteError::Request(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(RemoteError::Auth(format!(
            "token refresh failed: HTTP {}",
            resp.status()
        )));
    }

    let token: TokenResponse = resp
        .json()
        .map_err(|e| RemoteError::Request(e.to_string()))?;
    Ok(StoredToken {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
        expires_at: Utc::now().timestamp() + token.expires_in as i64,
    })
}

fn load_token(path: &Path) -> Result<StoredToken, RemoteError> {
    let raw = fs::read_to_string(path).map_err(|e| RemoteError::Auth(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| RemoteError::Auth(e.to_string()))
}

fn save_token(path: &Path, token: &StoredToken) -> Result<(), RemoteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RemoteError::Auth(e.to_string()))?;
    }
    let raw = serde_json::to_string_pretty(token).map_err(|e| RemoteError::Auth(e.to_string()))?;
    fs::write(path, raw).map_err(|e| RemoteError::Auth(e.to_string()))
}
