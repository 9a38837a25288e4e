//! IOU Ledger Simulator
//!
//! Runs parties, a notary and an in-memory network in one process.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iou_notary::NotaryConfig;
use iou_simulator::{Scenario, SimulationConfig, SimulationController};

/// IOU Ledger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Run IOU flows between simulated parties")]
struct Args {
    /// Number of simulated parties to create
    #[arg(short, long, default_value = "3")]
    parties: usize,

    /// Built-in scenario to run
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario to run, as a JSON file
    #[arg(long)]
    scenario_file: Option<std::path::PathBuf>,

    /// List built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Time to wait for a counterparty's reply
    #[arg(long, default_value = "2000")]
    exchange_timeout_ms: u64,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if args.list {
        for name in Scenario::NAMES {
            let scenario = Scenario::load(name)?;
            println!("{:<18} {}", scenario.name, scenario.description);
        }
        return Ok(());
    }

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(Scenario::from_json(&json)?)
        }
        (None, None) => None,
    };

    let mut config = SimulationConfig {
        parties: args.parties,
        speed: args.speed,
        seed: args.seed,
        notary: NotaryConfig::from_env(),
        ..SimulationConfig::default()
    };
    config.node.exchange_timeout = Duration::from_millis(args.exchange_timeout_ms);
    if let Some(scenario) = &scenario {
        config.parties = config.parties.max(scenario.parties);
    }

    info!("Starting IOU Ledger Simulator");
    info!(parties = config.parties, speed = config.speed, "Configuration");

    let mut controller = SimulationController::new(config);
    controller.initialize().await?;

    let started = std::time::Instant::now();
    if let Some(scenario) = scenario {
        controller.run_scenario(&scenario).await?;
    } else {
        info!("Running in continuous mode, press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await?;
    }

    // Print metrics
    let metrics = controller.metrics();
    let elapsed = started.elapsed().as_secs().max(1);
    info!("Simulation complete");
    info!("Total flows: {}", metrics.total_flows);
    info!("Successful: {}", metrics.successful_flows);
    info!("Failed: {}", metrics.failed_flows);
    for (code, count) in &metrics.failures_by_code {
        info!("  {}: {}", code, count);
    }
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    info!("Throughput: {:.2} flows/s", metrics.throughput(elapsed));

    Ok(())
}
