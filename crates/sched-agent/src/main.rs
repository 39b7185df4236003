//! hetsched - AI-assisted heterogeneous-core scheduling simulator
//!
//! Samples host telemetry on a fixed cadence, runs the learned and the
//! rule-based policies for every logical unit, accounts simulated energy
//! under both and serves the results over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sched_agent::{
    api::{self, AppState},
    config::AgentConfig,
    consumer::PacketConsumer,
};
use sched_core::{
    collector::{create_source, SamplingLoopBuilder},
    engine::TickEngine,
    health::{components, HealthRegistry},
    observability::{SchedulerMetrics, StructuredLogger},
    predictor::ModelArtifact,
    stress::{self, StressHandle, StressLoadController, WorkerSpec},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "hetsched")]
#[command(
    author,
    version,
    about = "AI-assisted heterogeneous-core scheduling simulator",
    long_about = None
)]
struct Cli {
    /// Configuration file; HETSCHED_* environment variables take precedence
    #[arg(long, global = true, env = "HETSCHED_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling loop, packet consumer and API server (default)
    Run,

    /// Generate CPU load without running the scheduler
    Stress {
        /// Worker processes to spawn (default: configured or available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds to run; 0 runs until interrupted
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Saturate one CPU until signalled
    #[command(name = "stress-worker", hide = true)]
    StressWorker,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::StressWorker = command {
        stress::burn();
    }

    init_tracing(cli.log_format);
    let config = AgentConfig::load(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match command {
        Commands::Stress { workers, duration } => {
            runtime.block_on(run_stress(config, workers, duration))
        }
        _ => runtime.block_on(run(config)),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn run(config: AgentConfig) -> Result<()> {
    info!(instance = %config.instance_name, "Starting hetsched");
    let logger = StructuredLogger::new(&config.instance_name);

    // A missing or malformed model aborts before any task is spawned
    let artifact = ModelArtifact::load(&config.model_path, &config.scaler_path)
        .context("Failed to load decision model")?;
    let model_version = artifact.version().to_string();
    logger.log_model_loaded(
        &model_version,
        &config.model_path.display().to_string(),
        &config.scaler_path.display().to_string(),
    );

    let health_registry = HealthRegistry::new();
    for component in [
        components::SAMPLER,
        components::MODEL,
        components::STRESS,
        components::CONSUMER,
    ] {
        health_registry.register(component).await;
    }

    let metrics = SchedulerMetrics::new();
    metrics.set_model_version(&model_version);

    let engine = TickEngine::new(config.engine_config(), artifact)?;
    let source = create_source(config.telemetry_source, config.synthetic_seed)?;
    let (sampling_loop, packet_rx) = SamplingLoopBuilder::new()
        .source(source)
        .engine(engine)
        .interval(config.sample_interval())
        .read_timeout(config.metrics_timeout())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let stress = StressHandle::spawn(
        StressLoadController::new(WorkerSpec::current_exe()?, config.stress_config())
            .with_logger(logger.clone()),
    )?;

    let latest = Arc::new(RwLock::new(None));
    let consumer = PacketConsumer::new(
        packet_rx,
        latest.clone(),
        health_registry.clone(),
        logger.clone(),
        config.power_spike_watts,
    );
    let app_state = Arc::new(
        AppState::new(health_registry.clone(), metrics.clone(), stress.clone()).with_latest(latest),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let sampler_handle = tokio::spawn(sampling_loop.run(shutdown_tx.subscribe()));
    let consumer_handle = tokio::spawn(consumer.run());
    let mut api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;
    logger.log_startup(SCHEDULER_VERSION, &model_version, config.baseline_threshold);

    let mut api_finished = false;
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            "interrupted".to_string()
        }
        served = &mut api_handle => {
            api_finished = true;
            match served {
                Ok(Ok(())) => "api server exited".to_string(),
                Ok(Err(e)) => format!("api server failed: {:#}", e),
                Err(e) => format!("api task aborted: {}", e),
            }
        }
    };

    health_registry.set_ready(false).await;

    // Stress workers first so load disappears as soon as possible
    match stress.stop().await {
        Ok(report) if report.total() > 0 => {
            info!(graceful = report.graceful, forced = report.forced, "Stress workers stopped")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not stop stress workers"),
    }

    let _ = shutdown_tx.send(());
    let ticks = sampler_handle.await.unwrap_or_else(|e| {
        warn!(error = %e, "Sampling task aborted");
        0
    });
    let consumed = consumer_handle.await.unwrap_or(0);
    if !api_finished {
        if let Ok(Err(e)) = api_handle.await {
            warn!(error = %e, "API server error during shutdown");
        }
    }

    info!(ticks = ticks, consumed = consumed, "All tasks stopped");
    logger.log_shutdown(&reason, ticks);

    Ok(())
}

async fn run_stress(config: AgentConfig, workers: Option<usize>, duration: u64) -> Result<()> {
    let logger = StructuredLogger::new(&config.instance_name);
    let mut stress_config = config.stress_config();
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        stress_config.workers = workers;
    }

    let handle = StressHandle::spawn(
        StressLoadController::new(WorkerSpec::current_exe()?, stress_config).with_logger(logger),
    )?;
    let status = handle.start().await?;
    info!(
        workers = status.workers,
        duration_secs = duration,
        "Stress load running, interrupt to stop"
    );

    if duration == 0 {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for interrupt")?;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for interrupt")?;
            }
        }
    }

    let report = handle.stop().await?;
    info!(
        graceful = report.graceful,
        forced = report.forced,
        "Stress load finished"
    );
    Ok(())
}
