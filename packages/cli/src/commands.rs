//! Command definitions for the `forge` binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use forge_core::{ForgeConfig, GenerateRequest, GenerationMode, JobEvent};
use forge_db::{DbConfig, JobRepository};
use forge_scheduler::{BackendRegistry, Scheduler};
use forge_storage::{Storage, StorageConfig};
use tracing::{info, warn};

/// Local image generation scheduler.
#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Queue image generation jobs and stream their progress")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Job database endpoint: `mem://`, or `rocksdb://path` / `file://path`
    /// in builds with the `rocksdb` feature.
    #[arg(long, env = "FORGE_DB", default_value = "mem://", global = true)]
    pub db: String,

    /// Directory for generated images; overrides FORGE_STORAGE_ROOT.
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Backend to run; overrides FORGE_BACKEND.
    #[arg(short, long, global = true)]
    pub backend: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one generation job and print its events as JSON lines.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// List usable backends and describe the active one.
    Backends,
}

/// Generation request fields. Omitted values take the configured defaults.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Text prompt.
    pub prompt: String,

    #[arg(short, long)]
    pub negative_prompt: Option<String>,

    /// txt2img, img2img, inpaint, outpaint or upscale.
    #[arg(long, value_parser = parse_mode, default_value = "txt2img")]
    pub mode: GenerationMode,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub steps: Option<u32>,

    #[arg(long)]
    pub cfg_scale: Option<f64>,

    /// Seed; negative picks one at random.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub seed: i64,

    #[arg(long)]
    pub sampler: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,
}

fn parse_mode(value: &str) -> Result<GenerationMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("unknown mode {value}"))
}

impl GenerateArgs {
    fn into_request(self, config: &ForgeConfig) -> GenerateRequest {
        let mut request = GenerateRequest::from_config(&config.generation).with_prompt(self.prompt);
        request.mode = self.mode;
        request.seed = self.seed;
        request.batch_size = self.batch_size;
        if let Some(negative) = self.negative_prompt {
            request.negative_prompt = negative;
        }
        if let Some(model) = self.model {
            request.model_id = model;
        }
        if let Some(width) = self.width {
            request.width = width;
        }
        if let Some(height) = self.height {
            request.height = height;
        }
        if let Some(steps) = self.steps {
            request.steps = steps;
        }
        if let Some(cfg_scale) = self.cfg_scale {
            request.cfg_scale = cfg_scale;
        }
        if let Some(sampler) = self.sampler {
            request.sampler = sampler;
        }
        request
    }
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ForgeConfig::from_env().context("reading FORGE_* configuration")?;
    if let Some(backend) = &cli.backend {
        config.backend.active = backend.clone();
    }

    let mut storage_config = StorageConfig::from_env()?;
    if let Some(output) = &cli.output {
        storage_config.backend = forge_storage::StorageBackendConfig::Filesystem {
            root: output.clone(),
        };
    }
    let storage = Storage::new(storage_config).context("opening artifact storage")?;

    check_endpoint(&cli.db)?;
    let db = forge_db::init(DbConfig::endpoint(&cli.db))
        .await
        .context("opening job database")?;

    let registry = BackendRegistry::discover(storage);
    let scheduler = Scheduler::start(config.clone(), Arc::new(JobRepository::new(db)), registry)
        .await
        .context("starting scheduler")?;

    let outcome = match cli.command {
        Commands::Generate(args) => generate(&scheduler, args.into_request(&config)).await,
        Commands::Backends => backends(&scheduler).await,
    };

    scheduler.stop().await?;
    outcome
}

/// Fail early on endpoints whose storage engine is not compiled in.
fn check_endpoint(endpoint: &str) -> anyhow::Result<()> {
    let persistent = ["rocksdb://", "file://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme));
    if persistent && !cfg!(feature = "rocksdb") {
        anyhow::bail!("{endpoint} needs a forge build with the `rocksdb` feature");
    }
    Ok(())
}

async fn generate(scheduler: &Scheduler, request: GenerateRequest) -> anyhow::Result<()> {
    let mut events = scheduler.subscribe();
    let job_id = scheduler.submit(request).await?;
    info!("Submitted job {}", job_id);

    let mut failure = None;
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, cancelling job {}", job_id);
                interrupted = true;
                scheduler.cancel(&job_id).await?;
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };
        if event.job_id() != &job_id {
            continue;
        }

        println!("{}", serde_json::to_string(&event)?);

        if let JobEvent::JobFailed { error, .. } = &event {
            failure = Some(error.clone());
        }
        if event.is_terminal() {
            break;
        }
    }

    scheduler.unsubscribe(events.id());

    match failure {
        Some(error) => anyhow::bail!("job {job_id} failed: {error}"),
        None => Ok(()),
    }
}

async fn backends(scheduler: &Scheduler) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({ "available": scheduler.available_backends() }))?
    );

    let report = scheduler.backend_report().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
