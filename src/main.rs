// src/main.rs
//
// Option chain analytics service: builds the derived chain snapshot and
// per-contract IV history on a schedule and serves them over a small API.

use chain_analyzer::analytics::{ChainBuilder, IvHistoryBuilder};
use chain_analyzer::config::{default_config_template, Config};
use chain_analyzer::pipeline::Scheduler;
use chain_analyzer::server::{ApiServer, ApiState};
use chain_analyzer::traits::SharedStage;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chain-analyzer")]
#[command(about = "Derived analytics for exchange-traded option chains")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<String>,

    /// Run the pipeline once and exit instead of scheduling
    #[arg(long)]
    once: bool,

    /// Override the API port from the config
    #[arg(long)]
    port: Option<u16>,

    /// Generate a default configuration file
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.generate_config {
        println!("{}", default_config_template());
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                eprintln!("Use --generate-config to create a template.");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let chain = Arc::new(ChainBuilder::new(
        config.chain_paths(),
        config.global.risk_free_rate,
    ));
    let iv_history = Arc::new(IvHistoryBuilder::new(
        config.iv_history_paths(),
        config.global.risk_free_rate,
    ));

    // The ordered stage list. Upstream fetch/normalize stages run out of
    // process and land their tables in the input directory; this binary
    // registers the two builder stages.
    let stages: Vec<SharedStage> = vec![chain.clone(), iv_history.clone()];
    let scheduler = Arc::new(Scheduler::new(
        stages,
        Duration::from_secs(config.global.update_interval_secs),
    ));

    if args.once {
        scheduler.run_once().await;
        let status = scheduler.status();
        println!("{} (last update {})", status.status, status.last_update);
        return;
    }

    scheduler.start();

    let port = args.port.or(config.global.api_port);
    if let Some(port) = port {
        let server = ApiServer::new(
            ApiState {
                scheduler: scheduler.clone(),
                chain,
                iv_history,
            },
            port,
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                eprintln!("API server error: {}", e);
            }
        });
        println!("API available at http://localhost:{}", port);
    }

    wait_for_shutdown().await;
    scheduler.stop().await;
}

async fn wait_for_shutdown() {
    println!("Pipeline running. Press Ctrl+C to exit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to listen for Ctrl+C: {}", e);
    }
    println!("\nShutting down...");
}
