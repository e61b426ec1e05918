use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use music_choreographer_core::{
    seed_from_audio, ActivityDocument, AppConfig, BeatAnalysis, BuiltinCatalog, CatalogLoader,
    CatalogSource, CatalogView, ChoreoError, ExecutionMode, MusicInfo, Plan, PerformanceDirector,
    Planner, SimulatedActuator, TomlCatalog, BUILTIN_PROFILE,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const ROBOT_MODEL_ID: &str = "alpha-mini";

fn main() -> music_choreographer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Plan(args) => run_plan(&config, args),
        Commands::Perform {
            plan,
            mode,
            latency_ms,
            failure_rate,
            seed,
        } => run_perform(&config, &plan, mode, latency_ms, failure_rate, seed),
        Commands::Catalog { profile, catalog } => {
            run_catalog(&config, &profile, catalog.as_deref())
        }
    }
}

fn run_plan(config: &AppConfig, args: PlanArgs) -> music_choreographer_core::Result<()> {
    let catalog = load_catalog(config, &args.profile, args.catalog.as_deref())?;
    let features = match &args.features {
        Some(path) => BeatAnalysis::load(path)?,
        None => BeatAnalysis::default(),
    };
    let seed = match (args.seed, &args.audio) {
        (Some(seed), _) => seed,
        (None, Some(audio)) => seed_from_audio(&std::fs::read(audio)?),
        (None, None) => 0,
    };
    tracing::info!(
        duration = args.duration,
        beats = features.beats.len(),
        tempo = ?features.tempo_bpm(),
        seed,
        "planning"
    );

    let planner = Planner::new(&catalog, config.planner.clone());
    let plan = planner.plan(args.duration, &features.beats, &features.energies, seed)?;
    if let Err(err) = plan.validate(
        config.planner.continuity_threshold,
        config.planner.closing_tolerance,
    ) {
        tracing::warn!(error = %err, "plan failed validation");
    }

    let name = args.name.unwrap_or_else(|| default_name(args.audio.as_deref()));
    let url = args.url.unwrap_or_default();
    let info = MusicInfo {
        name,
        music_file_url: url,
        duration: args.duration,
    };
    let json = ActivityDocument::new(info, &plan, ROBOT_MODEL_ID).to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(path = %path.display(), segments = plan.len(), "plan written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_perform(
    config: &AppConfig,
    path: &Path,
    mode: ExecutionMode,
    latency_ms: u64,
    failure_rate: f64,
    seed: u64,
) -> music_choreographer_core::Result<()> {
    let plan = read_plan(path)?;
    let actuator = SimulatedActuator::new()
        .with_latency(Duration::from_millis(latency_ms))
        .with_failure_rate(failure_rate, seed);
    let director = PerformanceDirector::from_config(Arc::new(actuator), config);

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping performance");
                on_signal.cancel();
            }
        });
        director.perform(&plan, mode, cancel).await
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_catalog(config: &AppConfig, profile: &str, path: Option<&Path>) -> music_choreographer_core::Result<()> {
    let catalog = load_catalog(config, profile, path)?;
    for primitive in catalog.iter() {
        println!(
            "{:<11} {:<28} {:>6.2}s  {:?}",
            primitive.category, primitive.id, primitive.duration_seconds, primitive.intensity
        );
    }
    tracing::info!(profile = catalog.profile(), primitives = catalog.len(), "catalog listed");
    Ok(())
}

fn load_catalog(config: &AppConfig, profile: &str, path: Option<&Path>) -> music_choreographer_core::Result<CatalogView> {
    match path {
        Some(path) => load_from(TomlCatalog::load(path)?, config, profile),
        None => load_from(BuiltinCatalog, config, profile),
    }
}

fn load_from<S: CatalogSource>(source: S, config: &AppConfig, profile: &str) -> music_choreographer_core::Result<CatalogView> {
    CatalogLoader::with_config(source, &config.catalog)?.load(profile)
}

/// Accepts either an activity document or a bare serialized plan.
fn read_plan(path: &Path) -> music_choreographer_core::Result<Plan> {
    let text = std::fs::read_to_string(path)?;
    match ActivityDocument::from_json(&text).and_then(|doc| doc.to_plan()) {
        Ok(plan) => Ok(plan),
        Err(ChoreoError::Json(_)) => Plan::from_json(&text),
        Err(err) => Err(err),
    }
}

fn default_name(audio: Option<&Path>) -> String {
    audio
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Plans and performs robot choreography to music", long_about = None)]
struct Cli {
    /// TOML configuration file. Missing keys keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// Length of the music in seconds.
    #[arg(short, long)]
    duration: f64,
    /// JSON file with `beats` and `energies` arrays.
    #[arg(short, long)]
    features: Option<PathBuf>,
    /// Audio file whose content seeds the planner when no seed is given.
    #[arg(short, long)]
    audio: Option<PathBuf>,
    #[arg(short, long)]
    seed: Option<u64>,
    #[arg(short, long, default_value = BUILTIN_PROFILE)]
    profile: String,
    /// TOML catalog to use instead of the built-in one.
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    url: Option<String>,
    /// Where to write the activity document. Printed when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a choreography plan for a piece of music.
    Plan(PlanArgs),
    /// Play a plan on the simulated actuator and print the report.
    Perform {
        /// Activity document or plan JSON.
        #[arg(short, long)]
        plan: PathBuf,
        /// auto, synchronized or segments.
        #[arg(short, long, default_value = "auto")]
        mode: ExecutionMode,
        /// Simulated response time of every command.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        /// Probability that a simulated command fails.
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
        /// Seed for simulated failures.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// List the primitives available for a device profile.
    Catalog {
        #[arg(short, long, default_value = BUILTIN_PROFILE)]
        profile: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}
