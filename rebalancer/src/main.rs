//! CLI entry point for the portfolio rebalancer.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use tokio::io::BufReader;

use portfolio_rebalancer::allocation::Allocation;
use portfolio_rebalancer::backend;
use portfolio_rebalancer::config::Config;
use portfolio_rebalancer::error::Result;
use portfolio_rebalancer::portfolio::{CreatePortfolioRequest, RebalanceRequest};
use portfolio_rebalancer::session;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Portfolio rebalancer: target allocations → queued BUY/SELL instructions")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or overwrite a user's target allocation
    Create {
        #[arg(long)]
        user: String,

        /// JSON object, e.g. '{"stocks": 60, "bonds": 40}'
        #[arg(long)]
        allocation: String,
    },

    /// Show a stored portfolio
    Show {
        #[arg(long)]
        user: String,
    },

    /// Report a current allocation and queue the rebalance instructions
    Rebalance {
        #[arg(long)]
        user: String,

        /// JSON object with the provider-reported allocation
        #[arg(long)]
        allocation: String,
    },

    /// List persisted rebalance transactions
    History {
        #[arg(long)]
        user: String,
    },

    /// Persist queued transactions until Ctrl-C.
    ///
    /// Holds the store and queue files exclusively, so other commands cannot
    /// run against the same files meanwhile; use `serve` for both at once.
    Consume,

    /// Answer JSON-line requests on stdin while persisting queued
    /// transactions, until EOF or Ctrl-C
    Serve,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(config: Config, command: Command) -> Result<()> {
    let store = backend::open_store(&config)?;
    let queue = backend::open_queue(&config);

    match command {
        Command::Create { user, allocation } => {
            let svc = backend::service(&config, store, queue);
            let portfolio = svc
                .create_portfolio(CreatePortfolioRequest {
                    user_id: user,
                    allocation: Allocation::from_json(&allocation)?,
                })
                .await?;
            print_json(&portfolio)
        }
        Command::Show { user } => {
            let svc = backend::service(&config, store, queue);
            print_json(&svc.get_portfolio(&user).await?)
        }
        Command::Rebalance { user, allocation } => {
            let svc = backend::service(&config, store, queue);
            let response = svc
                .rebalance(RebalanceRequest {
                    user_id: user,
                    new_allocation: Allocation::from_json(&allocation)?,
                })
                .await?;
            print_json(&response)
        }
        Command::History { user } => {
            let svc = backend::service(&config, store, queue);
            print_json(&svc.transactions(&user).await?)
        }
        Command::Consume => {
            let handle = backend::consumer(&config, store, queue).spawn();
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutdown requested");
            handle.shutdown().await;
            Ok(())
        }
        Command::Serve => {
            let handle = backend::consumer(&config, store.clone(), queue.clone()).spawn();
            let svc = backend::service(&config, store, queue);
            let stdin = BufReader::new(tokio::io::stdin());

            let result = tokio::select! {
                served = session::serve(&svc, stdin, tokio::io::stdout()) => {
                    served.map(|n| info!("Input closed after {n} requests"))
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for Ctrl-C: {e}");
                    }
                    info!("Shutdown requested");
                    Ok(())
                }
            };
            handle.shutdown().await;
            result
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let loaded = if cli.config.exists() {
        Config::load(&cli.config)
    } else {
        info!("{} not found, using defaults", cli.config.display());
        Ok(Config::default())
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(config, cli.command).await {
        eprintln!("Error: {e}");
        process::exit(if e.is_client_error() { 2 } else { 1 });
    }
}
