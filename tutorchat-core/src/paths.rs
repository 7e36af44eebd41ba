// ABOUTME: XDG Base Directory paths for config, history and logs
// ABOUTME: Falls back to local directories when no home directory is available

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "tutorchat";
const APPLICATION: &str = "tutorchat";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// e.g. ~/.local/share/tutorchat/
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// e.g. ~/.config/tutorchat/
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn log_dir_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn history_db_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("history.db")
}

pub fn export_dir_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("exports")
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest).display().to_string();
        }
    }
    path.to_string()
}
