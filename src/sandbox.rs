//! Sandbox provisioning.
//!
//! Each owner gets one nested-runtime container (`<owner>-dind`) attached
//! to the edge-proxy network and labeled so the proxy routes
//! `https://<owner>.<base_domain>/` into it. Provisioning walks a fixed
//! state machine: create, wait for the inner runtime, bootstrap tooling,
//! clone the published repository, verify the checkout, then build and
//! start its services with the workspace's own deployment manifest.
//!
//! The container runtime sits behind a trait so the whole walk is testable
//! against a scripted mock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SandboxSettings;
use crate::errors::ProvisionError;
use crate::retry::{RetryPolicy, WaitOutcome};

/// Provisioning lifecycle states. `TimedOut`, `CloneFailed`,
/// `ManifestMissing`, `BuildFailed` and `Running` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    WaitingForRuntime,
    Ready,
    TimedOut,
    Cloning,
    Cloned,
    CloneFailed,
    Verifying,
    Verified,
    ManifestMissing,
    Building,
    Running,
    BuildFailed,
}

/// What to launch: image, identity, wiring.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub privileged: bool,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Override the image entrypoint (used for the self-terminating TTL
    /// variant). `None` runs the image as-is.
    pub command: Option<Vec<String>>,
}

/// Container runtime seam. `exec` returns the exit code and the combined
/// captured output.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), ProvisionError>;
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<(i64, String), ProvisionError>;
    async fn remove(&self, name: &str) -> Result<(), ProvisionError>;
}

/// Real runtime over the local container daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, ProvisionError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            cmd: spec.command.clone(),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                network_mode: Some(spec.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(_) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                return Err(ProvisionError::CreateConflict {
                    name: spec.name.clone(),
                });
            }
            Err(e) => return Err(ProvisionError::Runtime(anyhow::Error::from(e))),
        }

        self.docker
            .start_container::<String>(&spec.name, None)
            .await
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?;
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<(i64, String), ProvisionError> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?;

        let mut captured = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(log) => captured.push_str(&log.to_string()),
                        Err(e) => return Err(ProvisionError::Runtime(anyhow::Error::from(e))),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?;
        Ok((inspect.exit_code.unwrap_or(-1), captured))
    }

    async fn remove(&self, name: &str) -> Result<(), ProvisionError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ProvisionError::Runtime(anyhow::Error::from(e)))?;
        Ok(())
    }
}

/// A successfully provisioned sandbox.
#[derive(Debug, Clone)]
pub struct ProvisionedSandbox {
    pub container: String,
    pub url: String,
    pub state: SandboxState,
}

pub struct SandboxProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxSettings,
}

/// Canonical container name for an owner's sandbox.
pub fn container_name(owner: &str) -> String {
    format!("{owner}-dind")
}

/// Edge-proxy routing labels for one owner's sandbox.
pub fn routing_labels(owner: &str, settings: &SandboxSettings) -> HashMap<String, String> {
    let host = format!("{owner}.{}", settings.base_domain);
    let mut labels = HashMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{owner}.rule"),
        format!("HostRegexp(`{host}`)"),
    );
    labels.insert(
        format!("traefik.http.routers.{owner}.entrypoints"),
        "websecure".to_string(),
    );
    labels.insert(
        format!("traefik.http.routers.{owner}.tls.certresolver"),
        settings.cert_resolver.clone(),
    );
    labels.insert(
        format!("traefik.http.routers.{owner}.middlewares"),
        format!("{owner}-rewrite"),
    );
    labels.insert(
        format!("traefik.http.middlewares.{owner}-rewrite.replacepathregex.regex"),
        "^/.*".to_string(),
    );
    labels.insert(
        format!("traefik.http.middlewares.{owner}-rewrite.replacepathregex.replacement"),
        "/".to_string(),
    );
    labels.insert(
        format!("traefik.http.services.{owner}.loadbalancer.server.port"),
        settings.service_port.to_string(),
    );
    labels
}

fn shell(command: impl Into<String>) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), command.into()]
}

impl SandboxProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxSettings) -> Self {
        Self { runtime, settings }
    }

    fn spec_for(&self, owner: &str) -> ContainerSpec {
        let command = self.settings.ttl_secs.map(|ttl| {
            // Self-terminating variant: the inner daemon runs in the
            // background and PID 1 exits when the TTL elapses.
            shell(format!("dockerd-entrypoint.sh & sleep {ttl}; exit 0"))
        });
        ContainerSpec {
            name: container_name(owner),
            image: self.settings.image.clone(),
            network: self.settings.network.clone(),
            privileged: true,
            env: self
                .settings
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            labels: routing_labels(owner, &self.settings),
            command,
        }
    }

    /// Run the full provisioning walk for `owner`, cloning `repo_url` and
    /// bringing its services up. Returns the routable sandbox URL.
    pub async fn provision(
        &self,
        owner: &str,
        repo_url: &str,
        repo_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedSandbox, ProvisionError> {
        let name = container_name(owner);
        let spec = self.spec_for(owner);

        self.runtime.create(&spec).await?;
        debug!(container = %name, state = ?SandboxState::Created, "sandbox container created");

        debug!(container = %name, state = ?SandboxState::WaitingForRuntime, "waiting for inner runtime");
        match self.wait_for_runtime(&name, cancel).await {
            WaitOutcome::Ready(()) => {
                info!(container = %name, state = ?SandboxState::Ready, "inner runtime ready");
            }
            WaitOutcome::TimedOut { waited } => {
                warn!(container = %name, state = ?SandboxState::TimedOut, ?waited, "inner runtime never came up");
                return Err(ProvisionError::ReadinessTimeout { waited });
            }
            WaitOutcome::Cancelled => return Err(ProvisionError::Cancelled),
        }

        self.bootstrap(&name).await?;

        debug!(container = %name, state = ?SandboxState::Cloning, repo = repo_name, "cloning repository");
        let clone_target = format!("/app/{repo_name}");
        let (code, output) = self
            .runtime
            .exec(
                &name,
                &[
                    "git".to_string(),
                    "clone".to_string(),
                    repo_url.to_string(),
                    clone_target.clone(),
                ],
            )
            .await?;
        if code != 0 {
            warn!(container = %name, state = ?SandboxState::CloneFailed, "clone failed");
            return Err(ProvisionError::CloneFailed { output });
        }
        info!(container = %name, state = ?SandboxState::Cloned, repo = repo_name, "repository cloned");

        debug!(container = %name, state = ?SandboxState::Verifying, "verifying checkout");
        let (code, _) = self
            .runtime
            .exec(&name, &shell(format!("test -d {clone_target}")))
            .await?;
        if code != 0 {
            return Err(ProvisionError::CloneTargetMissing { path: clone_target });
        }
        let manifest = format!("{clone_target}/docker-compose.yml");
        let (code, _) = self
            .runtime
            .exec(&name, &shell(format!("test -f {manifest}")))
            .await?;
        if code != 0 {
            warn!(container = %name, state = ?SandboxState::ManifestMissing, "no deployment manifest in checkout");
            return Err(ProvisionError::ManifestMissing { path: manifest });
        }

        debug!(container = %name, state = ?SandboxState::Building, "building services");
        let (code, output) = self
            .runtime
            .exec(
                &name,
                &shell(format!("docker-compose -f {manifest} up --build -d")),
            )
            .await?;
        if code != 0 {
            warn!(container = %name, state = ?SandboxState::BuildFailed, "service build failed");
            return Err(ProvisionError::BuildFailed { output });
        }

        let url = format!("https://{owner}.{}/", self.settings.base_domain);
        info!(container = %name, state = ?SandboxState::Running, url = %url, "sandbox running");
        Ok(ProvisionedSandbox {
            container: name,
            url,
            state: SandboxState::Running,
        })
    }

    /// Poll the inner daemon until it answers `docker info`.
    async fn wait_for_runtime(&self, name: &str, cancel: &CancellationToken) -> WaitOutcome<()> {
        let policy = RetryPolicy::new(self.settings.poll_interval, self.settings.poll_timeout);
        policy
            .wait_until(cancel, || async {
                match self
                    .runtime
                    .exec(name, &["docker".to_string(), "info".to_string()])
                    .await
                {
                    Ok((0, _)) => Some(()),
                    Ok((code, _)) => {
                        debug!(container = name, code, "inner runtime not ready yet");
                        None
                    }
                    Err(e) => {
                        debug!(container = name, error = %e, "readiness probe errored");
                        None
                    }
                }
            })
            .await
    }

    /// Install git and docker-compose and prepare the clone target dir.
    async fn bootstrap(&self, name: &str) -> Result<(), ProvisionError> {
        let (code, output) = self
            .runtime
            .exec(
                name,
                &shell("apk add --no-cache git docker-compose && mkdir -p /app"),
            )
            .await?;
        if code != 0 {
            return Err(ProvisionError::BootstrapFailed { output });
        }
        debug!(container = name, "tooling bootstrapped");
        Ok(())
    }

    pub async fn teardown(&self, owner: &str) -> Result<(), ProvisionError> {
        self.runtime.remove(&container_name(owner)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted runtime: each exec'd command is matched by substring against
    /// the script and yields the configured (exit code, output).
    #[derive(Default)]
    struct MockRuntime {
        script: Vec<(&'static str, i64, &'static str)>,
        calls: Mutex<Vec<String>>,
        create_error: Option<fn(&ContainerSpec) -> ProvisionError>,
    }

    impl MockRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count_containing(&self, needle: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn create(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {}", spec.name));
            match self.create_error {
                Some(make) => Err(make(spec)),
                None => Ok(()),
            }
        }

        async fn exec(&self, _name: &str, cmd: &[String]) -> Result<(i64, String), ProvisionError> {
            let joined = cmd.join(" ");
            self.calls.lock().unwrap().push(joined.clone());
            for (needle, code, output) in &self.script {
                if joined.contains(needle) {
                    return Ok((*code, output.to_string()));
                }
            }
            Ok((0, String::new()))
        }

        async fn remove(&self, name: &str) -> Result<(), ProvisionError> {
            self.calls.lock().unwrap().push(format!("remove {name}"));
            Ok(())
        }
    }

    fn fast_settings() -> SandboxSettings {
        SandboxSettings {
            poll_interval: Duration::from_millis(5),
            poll_timeout: Duration::from_millis(25),
            base_domain: "sketch.dev".to_string(),
            ..SandboxSettings::default()
        }
    }

    fn provisioner(runtime: MockRuntime) -> SandboxProvisioner {
        SandboxProvisioner::new(Arc::new(runtime), fast_settings())
    }

    #[tokio::test]
    async fn happy_path_ends_running_with_routable_url() {
        let provisioner = provisioner(MockRuntime::default());
        let cancel = CancellationToken::new();

        let sandbox = provisioner
            .provision("alice", "https://token@github.com/alice/demo.git", "demo", &cancel)
            .await
            .unwrap();

        assert_eq!(sandbox.container, "alice-dind");
        assert_eq!(sandbox.url, "https://alice.sketch.dev/");
        assert_eq!(sandbox.state, SandboxState::Running);
    }

    #[tokio::test]
    async fn readiness_timeout_never_attempts_clone() {
        let runtime = Arc::new(MockRuntime {
            script: vec![("docker info", 1, "daemon starting")],
            ..MockRuntime::default()
        });
        let provisioner = SandboxProvisioner::new(runtime.clone(), fast_settings());
        let cancel = CancellationToken::new();

        let err = provisioner
            .provision("bob", "https://example/repo.git", "repo", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ReadinessTimeout { .. }));
        assert_eq!(runtime.count_containing("git clone"), 0);
        // The probe itself did run.
        assert!(runtime.count_containing("docker info") >= 1);
    }

    #[tokio::test]
    async fn clone_failure_carries_output() {
        let runtime = Arc::new(MockRuntime {
            script: vec![("git clone", 128, "fatal: repository not found")],
            ..MockRuntime::default()
        });
        let provisioner = SandboxProvisioner::new(runtime.clone(), fast_settings());
        let cancel = CancellationToken::new();

        let err = provisioner
            .provision("bob", "https://example/missing.git", "missing", &cancel)
            .await
            .unwrap_err();
        match err {
            ProvisionError::CloneFailed { output } => {
                assert!(output.contains("repository not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Verification never ran.
        assert_eq!(runtime.count_containing("test -d"), 0);
    }

    #[tokio::test]
    async fn missing_manifest_is_distinct_from_missing_checkout() {
        let runtime = Arc::new(MockRuntime {
            script: vec![("test -f", 1, "")],
            ..MockRuntime::default()
        });
        let provisioner = SandboxProvisioner::new(runtime.clone(), fast_settings());
        let cancel = CancellationToken::new();

        let err = provisioner
            .provision("bob", "https://example/repo.git", "repo", &cancel)
            .await
            .unwrap_err();
        match err {
            ProvisionError::ManifestMissing { path } => {
                assert_eq!(path, "/app/repo/docker-compose.yml");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.count_containing("docker-compose -f"), 0);
    }

    #[tokio::test]
    async fn build_failure_is_terminal() {
        let runtime = Arc::new(MockRuntime {
            script: vec![("up --build", 1, "service 'backend' failed to build")],
            ..MockRuntime::default()
        });
        let provisioner = SandboxProvisioner::new(runtime.clone(), fast_settings());
        let cancel = CancellationToken::new();

        let err = provisioner
            .provision("bob", "https://example/repo.git", "repo", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BuildFailed { .. }));
    }

    #[tokio::test]
    async fn create_conflict_passes_through() {
        let runtime = MockRuntime {
            create_error: Some(|spec| ProvisionError::CreateConflict {
                name: spec.name.clone(),
            }),
            ..MockRuntime::default()
        };
        let provisioner = provisioner(runtime);
        let cancel = CancellationToken::new();

        let err = provisioner
            .provision("carol", "https://example/repo.git", "repo", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::CreateConflict { name } if name == "carol-dind"
        ));
    }

    #[tokio::test]
    async fn cancellation_during_readiness_wait() {
        let runtime = Arc::new(MockRuntime {
            script: vec![("docker info", 1, "")],
            ..MockRuntime::default()
        });
        let provisioner = SandboxProvisioner::new(runtime, fast_settings());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provisioner
            .provision("bob", "https://example/repo.git", "repo", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
    }

    #[test]
    fn routing_labels_cover_proxy_contract() {
        let labels = routing_labels("alice", &fast_settings());
        assert_eq!(labels.get("traefik.enable").unwrap(), "true");
        assert_eq!(
            labels.get("traefik.http.routers.alice.rule").unwrap(),
            "HostRegexp(`alice.sketch.dev`)"
        );
        assert_eq!(
            labels
                .get("traefik.http.routers.alice.entrypoints")
                .unwrap(),
            "websecure"
        );
        assert_eq!(
            labels
                .get("traefik.http.services.alice.loadbalancer.server.port")
                .unwrap(),
            "8000"
        );
        assert_eq!(
            labels
                .get("traefik.http.middlewares.alice-rewrite.replacepathregex.regex")
                .unwrap(),
            "^/.*"
        );
    }

    #[test]
    fn ttl_setting_switches_to_self_terminating_command() {
        let mut settings = fast_settings();
        settings.ttl_secs = Some(300);
        let provisioner = SandboxProvisioner::new(Arc::new(MockRuntime::default()), settings);
        let spec = provisioner.spec_for("alice");
        let command = spec.command.unwrap().join(" ");
        assert!(command.contains("sleep 300"));

        let provisioner =
            SandboxProvisioner::new(Arc::new(MockRuntime::default()), fast_settings());
        assert!(provisioner.spec_for("alice").command.is_none());
    }
}
