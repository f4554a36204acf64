//! Startup configuration: which store backend the process runs against
//! and where agent artifacts land. Resolved once in `main`, logged, and
//! never revisited.

use std::path::PathBuf;

pub const STORE_URL_VAR: &str = "GREENLIGHT_STORE_URL";
pub const DB_PATH_VAR: &str = "GREENLIGHT_DB_PATH";
pub const ARTIFACT_DIR_VAR: &str = "GREENLIGHT_ARTIFACT_DIR";

const DEFAULT_ARTIFACT_DIR: &str = ".greenlight/artifacts";

/// The selected persistence backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    /// Remote document store reached over HTTP.
    Remote { url: String },
    /// Local SQLite database file.
    Sqlite { path: PathBuf },
    /// Process-local map; state is lost on exit.
    Memory,
}

impl StoreConfig {
    /// Resolution order: a remote store URL wins, then a database path,
    /// then the in-memory fallback. CLI flags take precedence over the
    /// corresponding environment variables.
    pub fn resolve(store_url: Option<String>, db_path: Option<PathBuf>) -> Self {
        Self::pick(
            store_url,
            db_path,
            env_non_empty(STORE_URL_VAR),
            env_non_empty(DB_PATH_VAR).map(PathBuf::from),
        )
    }

    fn pick(
        flag_url: Option<String>,
        flag_db: Option<PathBuf>,
        env_url: Option<String>,
        env_db: Option<PathBuf>,
    ) -> Self {
        if let Some(url) = flag_url.or(env_url) {
            return Self::Remote { url };
        }
        if let Some(path) = flag_db.or(env_db) {
            return Self::Sqlite { path };
        }
        Self::Memory
    }
}

/// Where agent artifacts are written: flag, then environment, then the
/// working-directory default.
pub fn artifact_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env_non_empty(ARTIFACT_DIR_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR))
}

fn env_non_empty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_url_wins_over_db_path() {
        let config = StoreConfig::pick(
            Some("http://store.internal".to_string()),
            Some(PathBuf::from("runs.db")),
            None,
            None,
        );
        assert_eq!(
            config,
            StoreConfig::Remote {
                url: "http://store.internal".to_string()
            }
        );
    }

    #[test]
    fn test_flag_wins_over_environment() {
        let config = StoreConfig::pick(
            None,
            Some(PathBuf::from("from-flag.db")),
            None,
            Some(PathBuf::from("from-env.db")),
        );
        assert_eq!(
            config,
            StoreConfig::Sqlite {
                path: PathBuf::from("from-flag.db")
            }
        );
    }

    #[test]
    fn test_env_url_beats_flag_db_path() {
        let config = StoreConfig::pick(
            None,
            Some(PathBuf::from("runs.db")),
            Some("http://store.internal".to_string()),
            None,
        );
        assert!(matches!(config, StoreConfig::Remote { .. }));
    }

    #[test]
    fn test_nothing_configured_falls_back_to_memory() {
        assert_eq!(
            StoreConfig::pick(None, None, None, None),
            StoreConfig::Memory
        );
    }

    #[test]
    fn test_artifact_dir_prefers_flag() {
        let dir = artifact_dir(Some(PathBuf::from("/tmp/artifacts")));
        assert_eq!(dir, PathBuf::from("/tmp/artifacts"));
    }

    #[test]
    fn test_artifact_dir_default() {
        // Only exercised when the env var is unset, which is the normal
        // test environment.
        if std::env::var(ARTIFACT_DIR_VAR).is_err() {
            assert_eq!(artifact_dir(None), PathBuf::from(DEFAULT_ARTIFACT_DIR));
        }
    }
}
