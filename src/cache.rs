use crate::models::TaskMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read sync cache {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sync cache {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write sync cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable snapshot of the task descriptors observed on the last successful
/// run. The cache file's modification time doubles as the run boundary, so
/// a run that dies before `store` leaves the boundary untouched and the next
/// run reprocesses everything since the last success.
pub struct SyncCache {
    path: PathBuf,
}

impl SyncCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the previous snapshot and its modification time. A missing
    /// cache is a first run: empty map, no boundary.
    pub fn load(&self) -> Result<(TaskMap, Option<SystemTime>), CacheError> {
        if !self.path.exists() {
            return Ok((TaskMap::new(), None));
        }

        let raw = fs::read_to_string(&self.path).map_err(|e| CacheError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        let map: TaskMap = serde_json::from_str(&raw).map_err(|e| CacheError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        let boundary = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| CacheError::Read {
                path: self.path.clone(),
                source: e,
            })?;
        Ok((map, Some(boundary)))
    }

    /// Replaces the snapshot atomically: serialize to a sibling temp file,
    /// then rename over the target. A crash mid-write leaves the previous
    /// cache valid.
    pub fn store(&self, map: &TaskMap) -> Result<(), CacheError> {
        let raw = serde_json::to_string(map).map_err(|e| CacheError::Parse {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        }
        fs::write(&tmp, raw).map_err(|e| CacheError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| CacheError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}
