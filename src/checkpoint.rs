//! Durable job progress. A checkpoint holds the candidate list captured at
//! scan time, the index of the next candidate to attempt, and the outcomes of
//! every candidate before it.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::rebuild::RebuildOutcome;
use crate::scanner::RebuildCandidate;

pub const DEFAULT_CHECKPOINT_PATH: &str = "index-rebuilder.checkpoint.json";

/// Identifies which job a checkpoint belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobKey {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub threshold_percent: u8,
    pub table_filter: Option<String>,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} >= {}%",
            self.server, self.port, self.database, self.threshold_percent
        )?;
        if let Some(table) = &self.table_filter {
            write!(f, " table '{}'", table)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job: JobKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub candidates: Vec<RebuildCandidate>,
    pub next_index: usize,
    pub outcomes: Vec<RebuildOutcome>,
}

impl Checkpoint {
    pub fn new(job: JobKey, candidates: Vec<RebuildCandidate>) -> Self {
        let now = Utc::now();
        Self {
            job,
            created_at: now,
            updated_at: now,
            candidates,
            next_index: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn next_candidate(&self) -> Option<&RebuildCandidate> {
        self.candidates.get(self.next_index)
    }

    pub fn is_done(&self) -> bool {
        self.next_index >= self.candidates.len()
    }

    pub fn remaining(&self) -> usize {
        self.candidates.len().saturating_sub(self.next_index)
    }

    /// Records the outcome for the current candidate and advances.
    pub fn record(&mut self, outcome: RebuildOutcome) {
        debug_assert_eq!(self.next_candidate(), Some(&outcome.candidate));
        self.outcomes.push(outcome);
        self.next_index += 1;
        self.updated_at = Utc::now();
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.next_index > self.candidates.len() {
            return Err(format!(
                "next index {} is past the {} candidates",
                self.next_index,
                self.candidates.len()
            ));
        }
        if self.outcomes.len() != self.next_index {
            return Err(format!(
                "{} outcomes recorded for {} completed candidates",
                self.outcomes.len(),
                self.next_index
            ));
        }
        let mismatched = self
            .outcomes
            .iter()
            .zip(&self.candidates)
            .position(|(outcome, candidate)| &outcome.candidate != candidate);
        if let Some(position) = mismatched {
            return Err(format!(
                "outcome {} does not match candidate {}",
                position, self.candidates[position]
            ));
        }
        Ok(())
    }
}

pub trait CheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>>;

    /// Must be durable when it returns.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Stores the checkpoint as pretty JSON, replaced atomically on every save.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> Error {
        Error::Checkpoint {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&data).map_err(|e| Error::CheckpointCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        checkpoint
            .validate()
            .map_err(|reason| Error::CheckpointCorrupt {
                path: self.path.clone(),
                reason,
            })?;

        debug!(
            "Loaded checkpoint from {}: {}/{} done",
            self.path.display(),
            checkpoint.next_index,
            checkpoint.candidates.len()
        );
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| self.io_error(io::Error::new(ErrorKind::InvalidData, e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let temp = self.temp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)?;
            sync_parent_dir(&self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp);
            self.io_error(e)
        })?;

        debug!(
            "Checkpoint saved: {}/{} done",
            checkpoint.next_index,
            checkpoint.candidates.len()
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Checkpoint {} removed", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
