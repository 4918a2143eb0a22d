//! Filesystem locations for application data.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::settings::Settings;

/// Resolve the data directory, creating it if missing.
///
/// `settings.data_dir` wins; otherwise `~/.local/share/ragtrace`.
pub fn data_dir(settings: &Settings) -> Result<PathBuf> {
    let dir = match &settings.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .context("Could not determine data directory")?
            .join("ragtrace"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

/// Path of the knowledge-base database (documents and embeddings).
///
/// Kept separate from the thread database: the MCP server runs as a
/// child process and redb locks a file exclusively per process.
pub fn kb_database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("kb.redb")
}

/// Path of the conversation-thread database.
pub fn thread_database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("threads.redb")
}

/// Path of the JSONL trace export file.
pub fn trace_path(settings: &Settings, data_dir: &Path) -> PathBuf {
    settings
        .trace
        .export_path
        .clone()
        .unwrap_or_else(|| data_dir.join("traces.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_data_dir_is_created_and_used() {
        let temp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = Some(temp.path().join("nested").join("data"));

        let dir = data_dir(&settings).unwrap();
        assert!(dir.exists());
        assert!(dir.ends_with("nested/data"));
    }

    #[test]
    fn trace_path_defaults_under_data_dir() {
        let settings = Settings::default();
        let path = trace_path(&settings, Path::new("/tmp/ragtrace-data"));
        assert_eq!(path, Path::new("/tmp/ragtrace-data/traces.jsonl"));
    }

    #[test]
    fn trace_path_honors_override() {
        let mut settings = Settings::default();
        settings.trace.export_path = Some(PathBuf::from("/tmp/custom.jsonl"));
        let path = trace_path(&settings, Path::new("/tmp/ragtrace-data"));
        assert_eq!(path, Path::new("/tmp/custom.jsonl"));
    }
}
