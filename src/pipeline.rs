//! End-to-end scaffold pipeline.
//!
//! `ScaffoldEngine` owns the injected collaborator handles (document store,
//! completion service, notifier, container runtime, repository host) and
//! composes the orchestration primitives:
//!
//! - `generate_design` fans the three artifact prompts out as a chord and
//!   commits the results all-or-nothing.
//! - `scaffold` runs the merge / publish / provision chain for a document,
//!   guarded by single-flight admission and the workspace lock.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::TemplateCatalog;
use crate::chain::{ActiveRuns, Chain, ChainOutcome, Chord};
use crate::config::EngineConfig;
use crate::document::{DesignDocument, DocumentStore};
use crate::errors::OrchestrationError;
use crate::generate::ArtifactGenerator;
use crate::merge::MergeEngine;
use crate::notify::{Notifier, TASK_UPDATES_TOPIC};
use crate::publish::{OwnerIdentity, Publisher, RepoHost, authenticated_url};
use crate::sandbox::{ContainerRuntime, SandboxProvisioner};
use crate::workspace::{ProjectWorkspace, WorkspaceLocks};

/// Deadline for the three-way artifact generation chord.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a scaffold run needs, validated up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaffoldRequest {
    pub document_id: i64,
    /// Workspace and repository name.
    pub name: String,
    pub owner: OwnerIdentity,
    pub frontend_tags: Option<Vec<String>>,
    pub backend_tags: Option<Vec<String>>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub provision: bool,
}

impl ScaffoldRequest {
    /// Fail fast before any async work starts.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.name.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "project name must not be empty".to_string(),
            ));
        }
        if self.name.contains('/') || self.name.contains(char::is_whitespace) {
            return Err(OrchestrationError::Validation(format!(
                "project name '{}' must not contain slashes or whitespace",
                self.name
            )));
        }
        if self.owner.username.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "owner username must not be empty".to_string(),
            ));
        }
        if self.frontend_tags.is_none() && self.backend_tags.is_none() {
            return Err(OrchestrationError::Validation(
                "at least one of frontend_tags or backend_tags is required".to_string(),
            ));
        }
        for (side, tags) in [
            ("frontend", &self.frontend_tags),
            ("backend", &self.backend_tags),
        ] {
            if let Some(tags) = tags
                && tags.is_empty()
            {
                return Err(OrchestrationError::Validation(format!(
                    "{side}_tags must not be an empty list"
                )));
            }
        }
        if self.publish && self.owner.token.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "publishing requires an access token".to_string(),
            ));
        }
        if self.provision && !self.publish {
            // The sandbox clones the published repository.
            return Err(OrchestrationError::Validation(
                "provisioning requires publishing".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ScaffoldEngine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn ArtifactGenerator>,
    notifier: Arc<dyn Notifier>,
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn RepoHost>,
    active: Arc<ActiveRuns>,
    locks: Arc<WorkspaceLocks>,
}

impl ScaffoldEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn ArtifactGenerator>,
        notifier: Arc<dyn Notifier>,
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn RepoHost>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            notifier,
            runtime,
            host,
            active: Arc::new(ActiveRuns::new()),
            locks: Arc::new(WorkspaceLocks::new()),
        }
    }

    /// Generate the diagram, ERD and API artifacts concurrently and commit
    /// them onto the document. Any branch failing means nothing is written.
    pub async fn generate_design(
        &self,
        document_id: i64,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestrationError> {
        let _run = self.active.clone().try_begin(document_id)?;
        let document = self.store.get(document_id).await.map_err(|source| {
            OrchestrationError::StageFailed {
                stage: "load".to_string(),
                source: source.into(),
            }
        })?;

        self.notifier
            .publish(
                TASK_UPDATES_TOPIC,
                &format!("design generation started for document {document_id}"),
            )
            .await;

        let chord = Chord::new(GENERATION_TIMEOUT)
            .branch("diagram", {
                let generator = self.generator.clone();
                let prompt = diagram_prompt(&document);
                move |_| async move { Ok(Value::String(generator.complete(&prompt).await?)) }
            })
            .branch("erd", {
                let generator = self.generator.clone();
                let prompt = erd_prompt(&document);
                move |_| async move { Ok(Value::String(generator.complete(&prompt).await?)) }
            })
            .branch("api", {
                let generator = self.generator.clone();
                let prompt = api_prompt(&document);
                move |_| async move { Ok(Value::String(generator.complete(&prompt).await?)) }
            });

        let result = chord.run(cancel).await;
        let artifacts = match result {
            Ok(values) => values,
            Err(err) => {
                self.notifier
                    .publish(
                        TASK_UPDATES_TOPIC,
                        &format!("design generation failed for document {document_id}: {err}"),
                    )
                    .await;
                return Err(err);
            }
        };

        // Join order is submission order: diagram, erd, api.
        let texts: Vec<&str> = artifacts
            .iter()
            .map(|v| v.as_str().unwrap_or_default())
            .collect();
        self.store
            .put_artifacts(document_id, texts[0], texts[1], texts[2])
            .await
            .map_err(|source| OrchestrationError::StageFailed {
                stage: "store".to_string(),
                source: source.into(),
            })?;

        self.notifier
            .publish(
                TASK_UPDATES_TOPIC,
                &format!("design generation completed for document {document_id}"),
            )
            .await;
        info!(document_id, "design artifacts generated");
        Ok(())
    }

    /// Run the scaffold chain for a validated request: merge, then
    /// optionally publish, then optionally provision. Holds the
    /// single-flight slot for the document and the workspace lock for the
    /// project name across the whole chain.
    pub async fn scaffold(
        &self,
        request: ScaffoldRequest,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, OrchestrationError> {
        request.validate()?;
        let _run = self.active.clone().try_begin(request.document_id)?;
        let document = self.store.get(request.document_id).await.map_err(|source| {
            OrchestrationError::StageFailed {
                stage: "load".to_string(),
                source: source.into(),
            }
        })?;
        let _lock = self.locks.acquire(&request.name).await;

        let workspace = ProjectWorkspace::new(&self.config.workspace_root, &request.name);
        let merge_engine = Arc::new(MergeEngine::new(
            &self.config.templates_root,
            TemplateCatalog::default(),
        ));

        let mut chain = Chain::new();

        chain = chain.stage("merge", {
            let notifier = self.notifier.clone();
            let merge_engine = merge_engine.clone();
            let workspace = workspace.clone();
            let document = document.clone();
            let frontend = request.frontend_tags.clone();
            let backend = request.backend_tags.clone();
            move |_, _| async move {
                notifier.publish(TASK_UPDATES_TOPIC, "merge started").await;
                let outcome = merge_engine.merge(
                    &workspace,
                    &document,
                    frontend.as_deref(),
                    backend.as_deref(),
                );
                publish_stage_result(&notifier, "merge", &outcome).await;
                let outcome = outcome?;
                Ok(json!({
                    "workspace": workspace.root().display().to_string(),
                    "frontend_template": outcome.frontend_template,
                    "backend_template": outcome.backend_template,
                }))
            }
        });

        if request.publish {
            chain = chain.stage("publish", {
                let notifier = self.notifier.clone();
                let publisher = Publisher::new(self.host.clone());
                let workspace = workspace.clone();
                let name = request.name.clone();
                let identity = request.owner.clone();
                let private = request.private;
                let organization = request.organization.clone();
                move |mut value, _| async move {
                    notifier.publish(TASK_UPDATES_TOPIC, "publish started").await;
                    let outcome = publisher
                        .publish(
                            workspace.root(),
                            &name,
                            &identity,
                            private,
                            organization.as_deref(),
                        )
                        .await;
                    publish_stage_result(&notifier, "publish", &outcome).await;
                    let remote = outcome?;
                    let fields = value
                        .as_object_mut()
                        .ok_or_else(|| anyhow::anyhow!("merge stage produced no summary"))?;
                    fields.insert("repo_url".to_string(), json!(remote.web_url));
                    fields.insert("clone_url".to_string(), json!(remote.clone_url));
                    Ok(value)
                }
            });
        }

        if request.provision {
            chain = chain.stage("provision", {
                let notifier = self.notifier.clone();
                let provisioner =
                    SandboxProvisioner::new(self.runtime.clone(), self.config.sandbox.clone());
                let name = request.name.clone();
                let identity = request.owner.clone();
                move |mut value, stage_cancel| async move {
                    notifier
                        .publish(TASK_UPDATES_TOPIC, "provision started")
                        .await;
                    let clone_url = value
                        .get("clone_url")
                        .and_then(|v| v.as_str())
                        .map(|url| authenticated_url(url, &identity.token))
                        .ok_or_else(|| anyhow::anyhow!("no clone URL from publish stage"))?;
                    let outcome = provisioner
                        .provision(&identity.username, &clone_url, &name, &stage_cancel)
                        .await;
                    publish_stage_result(&notifier, "provision", &outcome).await;
                    let sandbox = outcome?;
                    let fields = value
                        .as_object_mut()
                        .ok_or_else(|| anyhow::anyhow!("publish stage produced no summary"))?;
                    fields.insert("sandbox_url".to_string(), json!(sandbox.url));
                    fields.insert("container".to_string(), json!(sandbox.container));
                    Ok(value)
                }
            });
        }

        let run_id = uuid::Uuid::new_v4();
        info!(
            %run_id,
            document_id = request.document_id,
            name = %request.name,
            publish = request.publish,
            provision = request.provision,
            "scaffold chain starting"
        );
        let outcome = chain.run(Value::Null, cancel).await;
        info!(%run_id, ok = outcome.result.is_ok(), "scaffold chain finished");
        Ok(outcome)
    }
}

async fn publish_stage_result<T, E: std::fmt::Display>(
    notifier: &Arc<dyn Notifier>,
    stage: &str,
    outcome: &Result<T, E>,
) {
    match outcome {
        Ok(_) => {
            notifier
                .publish(TASK_UPDATES_TOPIC, &format!("{stage} completed"))
                .await;
        }
        Err(e) => {
            notifier
                .publish(TASK_UPDATES_TOPIC, &format!("{stage} failed: {e}"))
                .await;
        }
    }
}

fn diagram_prompt(document: &DesignDocument) -> String {
    format!(
        "Generate a mermaid sequence diagram for the application described below.\n\
         Description: {}\nRequirements: {}\n\
         Return only the diagram code, no explanation.",
        document.content, document.requirements
    )
}

fn erd_prompt(document: &DesignDocument) -> String {
    format!(
        "Generate an entity-relationship description for the application described below.\n\
         Description: {}\nRequirements: {}\n\
         Use one block per entity in the form `Name {{ fieldName fieldType }}` with one\n\
         field per line and field types from: string, int, bool, timestamp.\n\
         Return only the blocks, no explanation.",
        document.content, document.requirements
    )
}

fn api_prompt(document: &DesignDocument) -> String {
    format!(
        "Generate a REST API specification for the application described below.\n\
         Description: {}\nRequirements: {}\n\
         Return only a JSON object with a top-level \"paths\" map in OpenAPI style,\n\
         no explanation.",
        document.content, document.requirements
    )
}
