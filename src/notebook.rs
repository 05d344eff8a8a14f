use crate::models::NoteContent;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("library root {0} is not readable")]
    Root(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed note {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A note discovered in the library: its content record plus the storage
/// modification time used for boundary checks.
#[derive(Debug, Clone)]
pub struct NoteRef {
    pub content_path: PathBuf,
    pub modified: SystemTime,
}

/// Enumerates every note's `content.json` under the library root, skipping
/// the trash notebook subtree. Results are sorted by path so each run
/// visits notes in the same order.
pub fn enumerate_notes(root: &Path, trash: &str) -> Result<Vec<NoteRef>, NotebookError> {
    if !root.is_dir() {
        return Err(NotebookError::Root(root.to_path_buf()));
    }

    let mut notes = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name().to_str() != Some(trash));

    for entry in walker {
        let entry = entry.map_err(|e| NotebookError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || entry.file_name().to_str() != Some("content.json") {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| NotebookError::Io {
            path: entry.path().to_path_buf(),
            source: e.into(),
        })?;
        let modified = metadata.modified().map_err(|e| NotebookError::Io {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        notes.push(NoteRef {
            content_path: entry.into_path(),
            modified,
        });
    }

    notes.sort_by(|a, b| a.content_path.cmp(&b.content_path));
    Ok(notes)
}

pub fn load_content(path: &Path) -> Result<NoteContent, NotebookError> {
    let raw = fs::read_to_string(path).map_err(|e| NotebookError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&raw).map_err(|e| NotebookError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes a note's content record back in full. Notes are always rewritten
/// whole, never patched in place.
pub fn store_content(path: &Path, content: &NoteContent) -> Result<(), NotebookError> {
    let raw = serde_json::to_string(content).map_err(|e| NotebookError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, raw).map_err(|e| NotebookError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;
    use tempfile::TempDir;

    fn write_note(root: &Path, notebook: &str, note: &str, title: &str, lines: &str) -> PathBuf {
        let dir = root.join(notebook).join(note);
        fs::create_dir_all(&dir).expect("create note dir");
        let content = NoteContent {
            title: title.to_string(),
            cells: vec![Cell::markdown(lines)],
        };
        let path = dir.join("content.json");
        fs::write(&path, serde_json::to_string(&content).expect("serialize")).expect("write note");
        path
    }

    #[test]
    fn enumerate_skips_trash_and_sorts() {
        let tmp = TempDir::new().expect("tempdir");
        let b = write_note(tmp.path(), "B.qvnotebook", "n1.qvnote", "Beta", "x @todo");
        let a = write_note(tmp.path(), "A.qvnotebook", "n2.qvnote", "Alpha", "y @todo");
        write_note(tmp.path(), "Trash.qvnotebook", "n3.qvnote", "Gone", "z @todo");

        let notes = enumerate_notes(tmp.path(), "Trash.qvnotebook").expect("enumerate");
        let paths: Vec<_> = notes.iter().map(|n| n.content_path.clone()).collect();
        assert_eq!(paths, vec![a, b]);
    }

    #[test]
    fn missing_root_is_fatal() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("nope");
        assert!(enumerate_notes(&missing, "Trash.qvnotebook").is_err());
    }

    #[test]
    fn content_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_note(tmp.path(), "A.qvnotebook", "n.qvnote", "Alpha", "line one");
        let mut content = load_content(&path).expect("load");
        assert_eq!(content.title, "Alpha");

        content.cells[0].data = "changed".to_string();
        store_content(&path, &content).expect("store");
        let reread = load_content(&path).expect("reload");
        assert_eq!(reread.cells[0].data, "changed");
    }
}
