//! Record sources
//!
//! A [`RecordSource`] lists the batches currently ready for a task kind.
//! Sources never consume what they return: the same batch is offered again on
//! the next sweep.

use super::types::{RecordBatch, TaskKind};
use crate::error::{FleetError, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn ready_batches(&self, kind: TaskKind) -> Result<Vec<RecordBatch>>;
}

/// Reads `<collection>_static_*` files from one directory, in name order.
///
/// A missing directory simply has no batches.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RecordSource for DirectorySource {
    async fn ready_batches(&self, kind: TaskKind) -> Result<Vec<RecordBatch>> {
        let prefix = format!("{}_static_", kind.collection());

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FleetError::Source {
                    reason: format!("listing {}: {}", self.dir.display(), e),
                })
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.len() > prefix.len() {
                names.push(name);
            }
        }
        names.sort();

        let mut batches = Vec::with_capacity(names.len());
        for name in names {
            let path = self.dir.join(&name);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| FleetError::Source {
                    reason: format!("reading {}: {}", path.display(), e),
                })?;
            batches.push(RecordBatch::new(name, &text));
        }

        Ok(batches)
    }
}

/// Batches held in memory, keyed by task kind.
#[derive(Default)]
pub struct MemorySource {
    batches: parking_lot::RwLock<HashMap<TaskKind, Vec<RecordBatch>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: TaskKind, batch: RecordBatch) {
        self.batches.write().entry(kind).or_default().push(batch);
    }

    pub fn clear(&self) {
        self.batches.write().clear();
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn ready_batches(&self, kind: TaskKind) -> Result<Vec<RecordBatch>> {
        Ok(self.batches.read().get(&kind).cloned().unwrap_or_default())
    }
}
