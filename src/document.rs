//! Design documents and the storage seam.
//!
//! Document CRUD lives outside the engine; the pipeline only needs to read
//! a document, commit generated artifacts back onto it (all-or-nothing),
//! and flip the per-artifact saved flags on an explicit save.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's design document and its generated artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignDocument {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub requirements: String,
    pub diagram_code: String,
    pub erd_code: String,
    pub api_code: String,
    pub diagram_saved: bool,
    pub erd_saved: bool,
    pub api_saved: bool,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DesignDocument {
    pub fn new(id: i64, title: &str, content: &str, requirements: Option<&str>, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.to_string(),
            content: content.to_string(),
            requirements: requirements
                .unwrap_or("No requirements provided")
                .to_string(),
            diagram_code: String::new(),
            erd_code: String::new(),
            api_code: String::new(),
            diagram_saved: false,
            erd_saved: false,
            api_saved: false,
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The three generated artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Diagram,
    Erd,
    ApiSpec,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Diagram => "diagram",
            ArtifactKind::Erd => "erd",
            ArtifactKind::ApiSpec => "api",
        }
    }
}

/// Storage seam for design documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<DesignDocument>;

    /// Commit all three artifacts at once. The generation chord calls this
    /// exactly once, after every branch has succeeded.
    async fn put_artifacts(&self, id: i64, diagram: &str, erd: &str, api: &str) -> Result<()>;

    /// Explicit save operation: flips exactly one flag.
    async fn mark_saved(&self, id: i64, kind: ArtifactKind) -> Result<()>;
}

/// In-memory store used by tests and the CLI.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<i64, DesignDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: DesignDocument) {
        self.documents
            .lock()
            .expect("document store lock poisoned")
            .insert(document.id, document);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: i64) -> Result<DesignDocument> {
        let documents = self.documents.lock().expect("document store lock poisoned");
        match documents.get(&id) {
            Some(document) => Ok(document.clone()),
            None => bail!("Document {} not found", id),
        }
    }

    async fn put_artifacts(&self, id: i64, diagram: &str, erd: &str, api: &str) -> Result<()> {
        let mut documents = self.documents.lock().expect("document store lock poisoned");
        let Some(document) = documents.get_mut(&id) else {
            bail!("Document {} not found", id);
        };
        document.diagram_code = diagram.to_string();
        document.erd_code = erd.to_string();
        document.api_code = api.to_string();
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_saved(&self, id: i64, kind: ArtifactKind) -> Result<()> {
        let mut documents = self.documents.lock().expect("document store lock poisoned");
        let Some(document) = documents.get_mut(&id) else {
            bail!("Document {} not found", id);
        };
        match kind {
            ArtifactKind::Diagram => document.diagram_saved = true,
            ArtifactKind::Erd => document.erd_saved = true,
            ArtifactKind::ApiSpec => document.api_saved = true,
        }
        document.updated_at = Utc::now();
        Ok(())
    }
}
