use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devsketch::catalog::{ProjectSide, TemplateCatalog};
use devsketch::config::EngineConfig;
use devsketch::document::{DesignDocument, DocumentStore, MemoryDocumentStore};
use devsketch::generate::CompletionClient;
use devsketch::notify::ChannelNotifier;
use devsketch::pipeline::{ScaffoldEngine, ScaffoldRequest};
use devsketch::publish::GithubHost;
use devsketch::sandbox::DockerRuntime;
use devsketch::schema::emit::render_models;
use devsketch::schema::parser::parse_erd;

#[derive(Parser)]
#[command(name = "devsketch", version, about = "Design-to-project scaffolding engine")]
struct Cli {
    /// Directory containing devsketch.toml.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the design artifacts for a project description.
    Generate {
        #[arg(long)]
        content: String,
        #[arg(long)]
        requirements: Option<String>,
        #[arg(long, default_value = "Untitled")]
        title: String,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Run the scaffold chain for a document and request file.
    Scaffold {
        /// JSON file with the design document (artifacts included).
        #[arg(long)]
        document: PathBuf,
        /// JSON file with the scaffold request.
        #[arg(long)]
        request: PathBuf,
    },
    /// Compile an ERD file into data-model source.
    CompileSchema {
        #[arg(long)]
        erd: PathBuf,
    },
    /// Resolve tags against the template catalog.
    MatchTemplate {
        #[arg(long, value_enum)]
        side: SideArg,
        tags: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Frontend,
    Backend,
}

impl From<SideArg> for ProjectSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Frontend => ProjectSide::Frontend,
            SideArg::Backend => ProjectSide::Backend,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config_dir)?;

    match cli.command {
        Command::Generate {
            content,
            requirements,
            title,
            owner,
        } => {
            let store = Arc::new(MemoryDocumentStore::new());
            store.insert(DesignDocument::new(
                1,
                &title,
                &content,
                requirements.as_deref(),
                &owner,
            ));
            let engine = build_engine(&config, store.clone(), "")?;

            engine.generate_design(1, &CancellationToken::new()).await?;
            let document = store.get(1).await?;
            println!("--- diagram ---\n{}", document.diagram_code);
            println!("--- erd ---\n{}", document.erd_code);
            println!("--- api ---\n{}", document.api_code);
        }

        Command::Scaffold { document, request } => {
            let document: DesignDocument = read_json(&document)?;
            let request: ScaffoldRequest = read_json(&request)?;
            if document.id != request.document_id {
                bail!(
                    "request targets document {} but the document file has id {}",
                    request.document_id,
                    document.id
                );
            }

            let store = Arc::new(MemoryDocumentStore::new());
            store.insert(document);
            let engine = build_engine(&config, store, &request.owner.token)?;

            let outcome = engine.scaffold(request, &CancellationToken::new()).await?;
            for record in &outcome.records {
                info!(stage = %record.name, status = ?record.status, "stage finished");
            }
            match outcome.result {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(err) => bail!(err),
            }
        }

        Command::CompileSchema { erd } => {
            let erd_code = std::fs::read_to_string(&erd)
                .with_context(|| format!("Failed to read {}", erd.display()))?;
            print!("{}", render_models(&parse_erd(&erd_code)));
        }

        Command::MatchTemplate { side, tags } => {
            let catalog = TemplateCatalog::default();
            let template = catalog.find_match(side.into(), &tags)?;
            println!("{template}");
        }
    }

    Ok(())
}

fn build_engine(
    config: &EngineConfig,
    store: Arc<MemoryDocumentStore>,
    token: &str,
) -> Result<ScaffoldEngine> {
    let api_key = std::env::var(&config.generation.api_key_env).unwrap_or_default();
    let generator = Arc::new(CompletionClient::new(
        &config.generation.base_url,
        &config.generation.model,
        &api_key,
    ));

    let notifier = Arc::new(ChannelNotifier::new(64));
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok((topic, message)) = events.recv().await {
            info!(topic, message, "progress");
        }
    });

    let runtime = Arc::new(DockerRuntime::connect()?);
    let host = Arc::new(GithubHost::new(token));

    Ok(ScaffoldEngine::new(
        config.clone(),
        store,
        generator,
        notifier,
        runtime,
        host,
    ))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
