mod api_client;
mod auth;
mod config;
mod data;
mod error;
mod filter;
mod runner;
mod secrets;
mod transaction;
mod warehouse;

use clap::{Parser, Subcommand};
use config::Config;
use log::{error, info};

#[derive(Parser)]
#[command(about = "Load QuickBooks Online line items for one product into a warehouse table")]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, filter and load into the destination table
    Sync,
    /// Fetch and filter, then print the table without loading it
    Preview,
    /// Print the current contents of the destination table
    Show,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::init();

    match args.command {
        Command::Sync => match runner::run_pipeline(args.config).await {
            Ok(report) => info!("{}", report.message()),
            Err(err) => {
                error!("pipeline failed: {}", err);
                std::process::exit(1);
            }
        },
        Command::Preview => {
            if let Err(err) = runner::preview(args.config).await {
                error!("preview failed: {}", err);
                std::process::exit(1);
            }
        }
        Command::Show => {
            if let Err(err) = runner::show_table(args.config).await {
                error!("show failed: {}", err);
                std::process::exit(1);
            }
        }
    };
}
