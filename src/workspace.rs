//! Project workspaces on disk and per-workspace mutual exclusion.
//!
//! A workspace is `<workspace_root>/<name>`; the merge engine writes the
//! frontend and backend subtrees plus the generated top-level files into it.
//! `WorkspaceLocks` hands out one async mutex per workspace name so two
//! concurrent scaffolds of the same name serialize instead of interleaving
//! file writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Paths of one project workspace.
#[derive(Debug, Clone)]
pub struct ProjectWorkspace {
    name: String,
    root: PathBuf,
}

impl ProjectWorkspace {
    pub fn new(workspace_root: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: workspace_root.join(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.root.join("frontend")
    }

    pub fn backend_dir(&self) -> PathBuf {
        self.root.join("backend")
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }

    pub fn swagger_file(&self) -> PathBuf {
        self.root.join("swagger.json")
    }

    /// Path of a design-artifact dump (`erd.txt`, `api.txt`, `diagram.txt`).
    pub fn artifact_dump(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.txt"))
    }

    /// Create the workspace root, parents included.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create workspace {}", self.root.display()))?;
        Ok(())
    }
}

/// Registry of per-workspace-name async locks.
///
/// Guards are owned, so a lock can be held across await points for the
/// whole merge/provision span. Entries are never removed; the set of
/// workspace names is small and bounded by real projects.
#[derive(Default)]
pub struct WorkspaceLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, waiting if another holder is active.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("workspace lock registry poisoned");
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
