// src/infra/paths.rs — Filesystem locations
//
// All paths respect the SPARROW_HOME environment variable for isolation.
// When unset, everything lives under ~/.sparrow/.

use std::path::PathBuf;

/// Returns the SPARROW_HOME override, if set.
fn sparrow_home() -> Option<PathBuf> {
    std::env::var_os("SPARROW_HOME").map(PathBuf::from)
}

/// Home directory
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Application directory: $SPARROW_HOME or ~/.sparrow
pub fn app_dir() -> PathBuf {
    if let Some(home) = sparrow_home() {
        return home;
    }
    dirs_home().join(".sparrow")
}

pub fn config_file_path() -> PathBuf {
    app_dir().join("config.toml")
}

/// Chat session database
pub fn db_path() -> PathBuf {
    app_dir().join("chat_sessions.db")
}

/// Create the application directory if missing.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(app_dir())
}
