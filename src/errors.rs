//! Typed error hierarchy for the DevSketch engine.
//!
//! One enum per subsystem:
//! - `OrchestrationError` — chain/chord execution and admission failures
//! - `GenerationError` — completion-service adapter failures
//! - `TemplateError` — catalog matching failures
//! - `SchemaError` — emitter-input failures
//! - `ProvisionError` — sandbox provisioning failures (one variant per
//!   terminal state of the provisioning state machine)
//! - `PublishError` — remote creation and push failures
//!
//! Notification failures are deliberately absent: the channel is
//! fire-and-forget and only ever logs.

use std::time::Duration;
use thiserror::Error;

/// Errors from the task orchestrator (chains and chords).
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A scaffold run is already in flight for document {document_id}")]
    AlreadyRunning { document_id: i64 },

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Fan-out join timed out after {elapsed:?}")]
    JoinTimeout { elapsed: Duration },

    #[error("Run was cancelled")]
    Cancelled,
}

/// Errors from the code generation adapter.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion service returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("Completion response contained no choices")]
    EmptyCompletion,
}

/// Errors from the template catalog matcher.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No {side} template matches tags {tags:?}")]
    NotFound { side: String, tags: Vec<String> },
}

/// Errors from the schema compiler's emitters.
///
/// The ERD parser itself never fails — unparseable lines are skipped — but
/// the API-spec emitter needs well-formed JSON to work from.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("API spec is not valid JSON: {0}")]
    InvalidApiSpec(#[from] serde_json::Error),

    #[error("API spec is empty after stripping code fences")]
    EmptyApiSpec,
}

/// Errors from the sandbox provisioner. Each step of the state machine has
/// a distinct variant, and every command failure carries the captured
/// output so operators can diagnose without entering the instance.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Container name '{name}' already in use")]
    CreateConflict { name: String },

    #[error("Container runtime error: {0}")]
    Runtime(anyhow::Error),

    #[error("Runtime inside sandbox not ready after {waited:?}")]
    ReadinessTimeout { waited: Duration },

    #[error("Tooling bootstrap failed inside sandbox: {output}")]
    BootstrapFailed { output: String },

    #[error("Repository clone failed inside sandbox: {output}")]
    CloneFailed { output: String },

    #[error("Cloned directory missing inside sandbox: {path}")]
    CloneTargetMissing { path: String },

    #[error("Deployment manifest missing inside sandbox: {path}")]
    ManifestMissing { path: String },

    #[error("Service build failed inside sandbox: {output}")]
    BuildFailed { output: String },

    #[error("Provisioning was cancelled")]
    Cancelled,
}

/// Errors from the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Remote repository creation failed ({status}): {detail}")]
    RemoteCreateFailed { status: u16, detail: String },

    #[error("Remote host request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Push to {remote} failed: {detail}")]
    PushFailed { remote: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_carries_document_id() {
        let err = OrchestrationError::AlreadyRunning { document_id: 7 };
        assert!(err.to_string().contains('7'));
        assert!(matches!(
            err,
            OrchestrationError::AlreadyRunning { document_id: 7 }
        ));
    }

    #[test]
    fn stage_failed_preserves_source() {
        let err = OrchestrationError::StageFailed {
            stage: "merge".to_string(),
            source: anyhow::anyhow!("disk full").into(),
        };
        assert!(err.to_string().contains("merge"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn provision_variants_are_distinct() {
        let timeout = ProvisionError::ReadinessTimeout {
            waited: Duration::from_secs(30),
        };
        let manifest = ProvisionError::ManifestMissing {
            path: "/app/demo/docker-compose.yml".to_string(),
        };
        assert!(matches!(timeout, ProvisionError::ReadinessTimeout { .. }));
        assert!(!matches!(timeout, ProvisionError::ManifestMissing { .. }));
        assert!(manifest.to_string().contains("docker-compose.yml"));
    }

    #[test]
    fn clone_failure_carries_captured_output() {
        let err = ProvisionError::CloneFailed {
            output: "fatal: repository not found".to_string(),
        };
        assert!(err.to_string().contains("repository not found"));
    }

    #[test]
    fn template_not_found_lists_tags() {
        let err = TemplateError::NotFound {
            side: "frontend".to_string(),
            tags: vec!["vue".to_string()],
        };
        assert!(err.to_string().contains("vue"));
        assert!(err.to_string().contains("frontend"));
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&OrchestrationError::Cancelled);
        assert_std_error(&GenerationError::EmptyCompletion);
        assert_std_error(&ProvisionError::Cancelled);
        assert_std_error(&PublishError::PushFailed {
            remote: "origin".to_string(),
            detail: "rejected".to_string(),
        });
    }
}
