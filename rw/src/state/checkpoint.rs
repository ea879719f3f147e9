//! Durable checkpoints for restart boundaries
//!
//! One JSON file per run under the state directory. Commits write a temp file in the same
//! directory and rename it over the old checkpoint, so a reader sees either the previous
//! state or the new one and never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::IterationState;
use crate::error::LoopError;
use crate::r#loop::RunConfig;

/// Everything needed to resume a run from its last boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run: RunConfig,
    pub state: IterationState,
    /// Number of segments that have ended when this was written
    pub segment: u32,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run: &RunConfig, state: &IterationState, segment: u32) -> Self {
        Self {
            run: run.clone(),
            state: state.clone(),
            segment,
            updated_at: Utc::now(),
        }
    }
}

/// Directory of per-run checkpoint files
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "CheckpointStore::new: called");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LoopError + '_ {
        move |source| LoopError::CheckpointIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Write the first checkpoint of a new run
    ///
    /// Fails with [`LoopError::RunExists`] when the run id already has a checkpoint, so two
    /// starts of the same run cannot both own it.
    pub fn create(&self, checkpoint: &Checkpoint) -> Result<PathBuf, LoopError> {
        let path = self.path_for(&checkpoint.run.run_id);
        debug!(path = %path.display(), "CheckpointStore::create: called");
        let tmp = self.write_temp(checkpoint, &path)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                LoopError::RunExists(checkpoint.run.run_id.clone())
            } else {
                LoopError::CheckpointIo {
                    path: path.clone(),
                    source: e.error,
                }
            }
        })?;

        debug!("CheckpointStore::create: persisted");
        Ok(path)
    }

    /// Atomically replace the run's checkpoint
    pub fn commit(&self, checkpoint: &Checkpoint) -> Result<PathBuf, LoopError> {
        let path = self.path_for(&checkpoint.run.run_id);
        debug!(
            path = %path.display(),
            iteration_index = %checkpoint.state.iteration_index,
            segment = %checkpoint.segment,
            "CheckpointStore::commit: called"
        );
        let tmp = self.write_temp(checkpoint, &path)?;
        tmp.persist(&path).map_err(|e| LoopError::CheckpointIo {
            path: path.clone(),
            source: e.error,
        })?;

        debug!("CheckpointStore::commit: persisted");
        Ok(path)
    }

    /// Synced temp file in the state directory, ready to be renamed into place
    fn write_temp(&self, checkpoint: &Checkpoint, path: &Path) -> Result<tempfile::NamedTempFile, LoopError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(Self::io_err(&self.dir))?;
        tmp.write_all(&bytes).map_err(Self::io_err(path))?;
        tmp.as_file().sync_all().map_err(Self::io_err(path))?;
        Ok(tmp)
    }

    /// Load the last committed checkpoint for a run
    pub fn load(&self, run_id: &str) -> Result<Checkpoint, LoopError> {
        let path = self.path_for(run_id);
        debug!(path = %path.display(), "CheckpointStore::load: called");
        if !path.exists() {
            debug!("CheckpointStore::load: no checkpoint file");
            return Err(LoopError::UnknownRun(run_id.to_string()));
        }
        let bytes = fs::read(&path).map_err(Self::io_err(&path))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        info!(
            run_id,
            iteration_index = checkpoint.state.iteration_index,
            terminal = %checkpoint.state.terminal,
            "Loaded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Run ids with a checkpoint, sorted
    pub fn list(&self) -> Result<Vec<String>, LoopError> {
        debug!(dir = %self.dir.display(), "CheckpointStore::list: called");
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)
            .map_err(Self::io_err(&self.dir))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
