use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "quiversync", "quiversync")
}

fn home_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_library_root() -> PathBuf {
    home_dir().join("Dropbox/Apps/Quiver/Quiver.qvlibrary")
}

fn default_token_path() -> PathBuf {
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("token.json");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".quiversync-token.json")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("QUIVERSYNC_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".quiversync.toml")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub google: GoogleConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root of the Quiver library (`*.qvlibrary` directory).
    pub root: PathBuf,
    /// Notebook directory name excluded from scanning.
    pub trash: String,
    /// Sync cache location; a relative path lands inside the library root.
    pub cache_file: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            trash: "Trash.qvnotebook".to_string(),
            cache_file: PathBuf::from("tasksync.json"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Stored OAuth token; obtained out of band, refreshed in place.
    pub token_path: PathBuf,
    /// Title of the task list new tasks are created in.
    pub active_list: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_path: default_token_path(),
            active_list: "Active".to_string(),
        }
    }
}

impl Config {
    /// Loads the config from `override_path` or the default location,
    /// falling back to defaults on a missing or unparseable file. The
    /// normalized config is written back so a first run leaves an editable
    /// file behind.
    pub fn load(override_path: Option<&Path>) -> Self {
        let config_path = override_path.map_or_else(config_path, Path::to_path_buf);

        let mut config = if let Ok(content) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "unparseable config, using defaults");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        let changed = config.normalize_paths();
        if changed || !config_path.exists() {
            let _ = config.save_to_path(&config_path);
        }

        config
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).unwrap_or_default();
        fs::write(path, content)
    }

    fn normalize_paths(&mut self) -> bool {
        let mut changed = false;

        if self.library.cache_file.as_os_str().is_empty() {
            self.library.cache_file = PathBuf::from("tasksync.json");
            changed = true;
        }
        if self.library.cache_file.is_relative() {
            self.library.cache_file = self.library.root.join(&self.library.cache_file);
            changed = true;
        }

        if self.google.token_path.as_os_str().is_empty() {
            self.google.token_path = default_token_path();
            changed = true;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: Config = toml::from_str(
            r#"
            [google]
            client_id = "abc"
            client_secret = "xyz"
            "#,
        )
        .expect("parse");

        assert_eq!(config.google.client_id, "abc");
        assert_eq!(config.google.active_list, "Active");
        assert_eq!(config.library.trash, "Trash.qvnotebook");
    }

    #[test]
    fn relative_cache_file_lands_inside_the_library() {
        let mut config = Config::default();
        config.library.root = PathBuf::from("/lib/Quiver.qvlibrary");
        config.library.cache_file = PathBuf::from("tasksync.json");

        assert!(config.normalize_paths());
        assert_eq!(
            config.library.cache_file,
            PathBuf::from("/lib/Quiver.qvlibrary/tasksync.json")
        );
    }

    #[test]
    fn absolute_cache_file_is_left_alone() {
        let mut config = Config::default();
        config.library.cache_file = PathBuf::from("/var/cache/tasksync.json");

        config.normalize_paths();
        assert_eq!(
            config.library.cache_file,
            PathBuf::from("/var/cache/tasksync.json")
        );
    }
}
