//! Command-line harness for the extraction pipeline

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use osint_lens::{
    action_links, extract_entities, AnnotationRenderer, BlobStore, Document, HttpMetadataClient,
    MediaAnalysisDispatcher, PatternLibrary, PipelineConfig, ScanOrchestrator,
};

#[derive(Parser)]
#[command(name = "osint-lens", version, about = "Entity extraction for conversation views")]
struct Cli {
    /// Pipeline config (JSON); defaults plus OSINT_LENS_* overrides otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan pass over an HTML snapshot
    Scan {
        file: PathBuf,
        /// Write the annotated markup here
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Extract entities from a piece of text
    Extract { text: String },
    /// Send a media file to the metadata service
    Analyze {
        file: PathBuf,
        #[arg(long, default_value = "image/jpeg")]
        mime: String,
    },
    /// Print the metadata service version
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(PipelineConfig::from_json(&raw)?)
        }
        None => Ok(PipelineConfig::from_env()?),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Scan { file, write } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let orchestrator = ScanOrchestrator::from_config(&config, PatternLibrary::builtin())?;
            let mut document = Document::parse(&html);
            let report = orchestrator.scan(&mut document);
            if let Some(out) = write {
                std::fs::write(out, document.to_html())?;
            }
            print_json(&serde_json::to_value(&report)?)
        }
        Command::Extract { text } => {
            let entities: Vec<_> = extract_entities(&text)
                .into_iter()
                .map(|e| {
                    let links = action_links(e.kind, &e.value);
                    json!({ "entity": e, "links": links })
                })
                .collect();
            print_json(&json!(entities))
        }
        Command::Analyze { file, mime } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let store = Arc::new(BlobStore::new());
            let blob_ref = store.register(bytes, &mime);

            let client = HttpMetadataClient::new(&config.metadata_endpoint, config.request_timeout())?;
            let selectors = config.selectors()?;
            let dispatcher = MediaAnalysisDispatcher::new(
                store,
                Arc::new(client),
                AnnotationRenderer::new(selectors.container)?,
                config.preview_limit,
                &config.placeholder_media_url,
            );

            let mut document = Document::new();
            let body = document.body();
            let img = document.create_element("img");
            document.set_attr(img, "src", &blob_ref)?;
            document.append_child(body, img)?;
            let document = Mutex::new(document);

            let outcome = dispatcher.analyze(&document, img, &blob_ref).await;
            match outcome.result {
                Ok(preview) => print_json(&json!({
                    "state": outcome.transitions.last(),
                    "preview": preview,
                })),
                Err(e) => bail!("analysis failed: {}", e),
            }
        }
        Command::Version => {
            let client = HttpMetadataClient::new(&config.metadata_endpoint, config.request_timeout())?;
            let version = client.version().await?;
            println!("{}", version);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
