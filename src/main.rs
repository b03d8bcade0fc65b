use clap::{Parser, Subcommand};
use log::{error, info, warn};
use pulse::configuration::config::Config;
use pulse::controller::Agent;
use pulse::traffic::types::TrafficRule;
use pulse::worker_management::run_worker_process;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pulse")]
#[command(version = "0.1.0")]
#[command(about = "Synthetic traffic oracle for network policy testing")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the traffic agent
    Run {
        config_file: PathBuf,
        /// JSON array of traffic rules to register before starting
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Run a single worker, spawned by the agent
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        spec: String,
        #[arg(long)]
        netns: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        // No runtime may exist before the worker enters its namespace
        Command::Worker { spec, netns } => {
            std::process::exit(run_worker_process(&spec, netns.as_deref()))
        }
        Command::Run { config_file, rules } => std::process::exit(run_agent(&config_file, rules.as_deref())),
    }
}

fn run_agent(config_file: &Path, rules: Option<&Path>) -> i32 {
    println!(
        "
==============================================================================
                 pulse: synthetic traffic oracle v0.1.0
==============================================================================
"
    );

    info!("Importing configuration");
    let config = match Config::from_file(config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            return 1;
        }
    };
    info!("Configuration imported successfully");

    let rules = match rules.map(load_rules).transpose() {
        Ok(rules) => rules.unwrap_or_default(),
        Err(e) => {
            error!("Unable to import traffic rules: {}", e);
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Unable to build the async runtime: {}", e);
            return 1;
        }
    };

    runtime.block_on(async move {
        let mut agent = match Agent::from_config(config).await {
            Ok(agent) => agent,
            Err(e) => {
                error!("Unable to create the agent: {}, exiting...", e);
                return 1;
            }
        };

        if !rules.is_empty() {
            match agent.register_traffic(&rules).await {
                Ok(report) if !report.rejected.is_empty() => {
                    warn!("{} rules rejected", report.rejected.len())
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Unable to register traffic: {}", e);
                    agent.shutdown().await;
                    return 1;
                }
            }
        }

        for (what, started) in [
            ("servers", agent.start_servers(None).await),
            ("clients", agent.start_clients(None).await),
        ] {
            match started {
                Ok(report) => {
                    info!("Started {} {}", report.started, what);
                    for failure in report.failed {
                        warn!("Failed to start {}", failure);
                    }
                }
                Err(e) => error!("Unable to start {}: {}", what, e),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for the shutdown signal: {}", e);
        }
        agent.shutdown().await;
        0
    })
}

fn load_rules(path: &Path) -> Result<Vec<TrafficRule>, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
}
