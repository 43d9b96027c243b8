// Lexgate - Main Entry Point
//
// Operator CLI for the access control plane:
// - Plan catalog and token costs
// - Effective configuration
// - Prometheus metrics endpoint

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lexgate::config::Config;
use lexgate::subscription::{Feature, PlanTier, TOKEN_PACKAGES};
use lexgate::{logging, metrics_server};
use tracing::info;

/// Lexgate: account access and usage-quota control plane
#[derive(Parser, Debug)]
#[command(name = "lexgate")]
#[command(author = "Lexgate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Account access and usage-quota control plane", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the plan catalog, feature costs and token packages
    Plans,
    /// Load, validate and print the effective configuration
    Config {
        /// Only print where the configuration file is read from
        #[arg(long)]
        path: bool,
    },
    /// Serve the Prometheus metrics endpoint
    Metrics {
        /// Port to listen on (defaults to metrics.port)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("Failed to load configuration")?;
    logging::init(&config.logging, args.verbose)?;

    info!("🔐 Lexgate v0.1.0 starting...");

    match args.command {
        Some(Commands::Plans) => print_plans(),
        Some(Commands::Config { path }) => print_config(&config, path)?,
        Some(Commands::Metrics { port }) => {
            let port = port.unwrap_or(config.metrics.port);
            info!("Serving metrics on port {}", port);
            metrics_server::start_metrics_server(port).await?;
        }
        None => {
            info!("No command specified. Use \"lexgate --help\" for usage.");
        }
    }

    Ok(())
}

fn print_plans() {
    println!("Plans");
    println!("{:<10} {:>8} {:>8}  Features", "Tier", "$/month", "Tokens");
    for tier in PlanTier::ALL {
        let plan = tier.definition();
        let features: Vec<&str> = plan.included_features.iter().map(|f| f.as_str()).collect();
        println!(
            "{:<10} {:>8} {:>8}  {}",
            plan.name,
            plan.monthly_price_usd,
            plan.total_tokens,
            features.join(", ")
        );
    }

    println!();
    println!("Token costs");
    for feature in Feature::ALL {
        println!("{:<20} {:>4}", feature.as_str(), feature.cost());
    }

    println!();
    println!("Token packages");
    for package in TOKEN_PACKAGES {
        println!("{:<10} {:>6} tokens  ${}", package.id, package.tokens, package.price_usd);
    }
}

fn print_config(config: &Config, path_only: bool) -> Result<()> {
    if path_only {
        println!("{}", Config::config_path().display());
        return Ok(());
    }

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("# {}", Config::config_path().display());
    println!("{}", rendered);
    Ok(())
}
