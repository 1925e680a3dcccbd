use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// JSON state file with atomic replace on save
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// State file at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file named `name` inside `dir`
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state, `None` if the file does not exist
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open state file: {}", self.path.display()))?;
        let state = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "State loaded");
        Ok(Some(state))
    }

    /// Serialize to a temporary sibling, then rename over the target
    pub fn save<T: Serialize>(&self, state: &T) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("state.json");
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        let write_result = (|| -> Result<()> {
            let file = File::create(&temp_path).with_context(|| {
                format!("Failed to create temp state file: {}", temp_path.display())
            })?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, state).context("Failed to serialize state")?;
            writer.flush().context("Failed to flush state file")?;
            writer
                .get_ref()
                .sync_all()
                .context("Failed to sync state file")?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    /// Remove the file if present
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete state file: {}", self.path.display()))?;
        }
        Ok(())
    }
}
