//! Engine configuration.
//!
//! Loaded from `devsketch.toml` with per-field defaults, so a missing file
//! or a partial section is always usable. `DEVSKETCH_*` environment
//! variables override file values. Secrets (completion-service key, VCS
//! tokens) never live in the file — they come from the environment or
//! from the request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration for the scaffold engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which project workspaces are created.
    pub workspace_root: PathBuf,
    /// Root of the starter-template catalog on disk.
    pub templates_root: PathBuf,
    pub generation: GenerationConfig,
    pub sandbox: SandboxSettings,
}

/// Completion-service settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
}

/// Sandbox provisioning settings.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Nested-runtime image to launch.
    pub image: String,
    /// Network the edge proxy watches.
    pub network: String,
    /// Base domain for per-owner subdomains.
    pub base_domain: String,
    /// TLS certificate resolver name the edge proxy knows.
    pub cert_resolver: String,
    /// Port the proxied service listens on inside the sandbox.
    pub service_port: u16,
    /// Readiness probe interval.
    pub poll_interval: Duration,
    /// Overall readiness deadline.
    pub poll_timeout: Duration,
    /// When set, the container self-terminates after this many seconds.
    /// Unset means the container is left running (see DESIGN.md).
    pub ttl_secs: Option<u64>,
    /// Extra environment injected into the sandbox.
    pub env: HashMap<String, String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let mut env = HashMap::new();
        // dind refuses to start the daemon without TLS unless this is blanked.
        env.insert("DOCKER_TLS_CERTDIR".to_string(), String::new());
        Self {
            image: "docker:dind".to_string(),
            network: "devsketch-net".to_string(),
            base_domain: "localhost".to_string(),
            cert_resolver: "letsencrypt".to_string(),
            service_port: 8000,
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(30),
            ttl_secs: None,
            env,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("temp"),
            templates_root: PathBuf::from("templates"),
            generation: GenerationConfig::default(),
            sandbox: SandboxSettings::default(),
        }
    }
}

/// Raw TOML structure for `devsketch.toml`.
#[derive(Debug, Deserialize)]
struct EngineToml {
    workspace_root: Option<PathBuf>,
    templates_root: Option<PathBuf>,
    generation: Option<GenerationSection>,
    sandbox: Option<SandboxSection>,
}

#[derive(Debug, Deserialize)]
struct GenerationSection {
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    image: Option<String>,
    network: Option<String>,
    base_domain: Option<String>,
    cert_resolver: Option<String>,
    service_port: Option<u16>,
    poll_interval_secs: Option<u64>,
    poll_timeout_secs: Option<u64>,
    ttl_secs: Option<u64>,
    env: Option<HashMap<String, String>>,
}

impl EngineConfig {
    /// Load config from `devsketch.toml` under `dir`, then apply
    /// `DEVSKETCH_*` environment overrides on top.
    /// A missing file means defaults plus overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(dir)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(dir: &Path) -> Result<Self> {
        let config_path = dir.join("devsketch.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let toml: EngineToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(root) = toml.workspace_root {
            config.workspace_root = root;
        }
        if let Some(root) = toml.templates_root {
            config.templates_root = root;
        }
        if let Some(section) = toml.generation {
            if let Some(base_url) = section.base_url {
                config.generation.base_url = base_url;
            }
            if let Some(model) = section.model {
                config.generation.model = model;
            }
            if let Some(api_key_env) = section.api_key_env {
                config.generation.api_key_env = api_key_env;
            }
        }
        if let Some(section) = toml.sandbox {
            if let Some(image) = section.image {
                config.sandbox.image = image;
            }
            if let Some(network) = section.network {
                config.sandbox.network = network;
            }
            if let Some(base_domain) = section.base_domain {
                config.sandbox.base_domain = base_domain;
            }
            if let Some(resolver) = section.cert_resolver {
                config.sandbox.cert_resolver = resolver;
            }
            if let Some(port) = section.service_port {
                config.sandbox.service_port = port;
            }
            if let Some(secs) = section.poll_interval_secs {
                config.sandbox.poll_interval = Duration::from_secs(secs);
            }
            if let Some(secs) = section.poll_timeout_secs {
                config.sandbox.poll_timeout = Duration::from_secs(secs);
            }
            if section.ttl_secs.is_some() {
                config.sandbox.ttl_secs = section.ttl_secs;
            }
            if let Some(env) = section.env {
                config.sandbox.env.extend(env);
            }
        }

        Ok(config)
    }

    /// Apply `DEVSKETCH_*` overrides. `lookup` abstracts the process
    /// environment so the pass is testable without mutating it.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .parse()
                .with_context(|| format!("Invalid value for {key}"))
        }

        if let Some(v) = lookup("DEVSKETCH_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEVSKETCH_TEMPLATES_ROOT") {
            self.templates_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEVSKETCH_GENERATION_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = lookup("DEVSKETCH_GENERATION_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = lookup("DEVSKETCH_GENERATION_API_KEY_ENV") {
            self.generation.api_key_env = v;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_IMAGE") {
            self.sandbox.image = v;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_NETWORK") {
            self.sandbox.network = v;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_BASE_DOMAIN") {
            self.sandbox.base_domain = v;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_CERT_RESOLVER") {
            self.sandbox.cert_resolver = v;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_SERVICE_PORT") {
            self.sandbox.service_port = parsed("DEVSKETCH_SANDBOX_SERVICE_PORT", v)?;
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_POLL_INTERVAL_SECS") {
            self.sandbox.poll_interval =
                Duration::from_secs(parsed("DEVSKETCH_SANDBOX_POLL_INTERVAL_SECS", v)?);
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_POLL_TIMEOUT_SECS") {
            self.sandbox.poll_timeout =
                Duration::from_secs(parsed("DEVSKETCH_SANDBOX_POLL_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = lookup("DEVSKETCH_SANDBOX_TTL_SECS") {
            self.sandbox.ttl_secs = Some(parsed("DEVSKETCH_SANDBOX_TTL_SECS", v)?);
        }
        Ok(())
    }
}
