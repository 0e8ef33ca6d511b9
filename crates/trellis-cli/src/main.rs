//! CLI binary for checking and inspecting Trellis delivery configurations.

mod config;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use trellis_ordering::{Capability, Phase};
use trellis_types::TrellisError;

use crate::config::load_config;

#[derive(Parser)]
#[command(name = "trellis", version, about = "Visitor ordering for tree-processing configurations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sorted visitor order for each selector
    Order {
        /// Path to the JSON delivery configuration
        config: PathBuf,

        /// Only print this selector
        #[arg(short, long)]
        selector: Option<String>,
    },

    /// Check a configuration for circular producer/consumer dependencies
    Check {
        /// Path to the JSON delivery configuration
        config: PathBuf,
    },

    /// Show visitor counts per selector and capability
    Info {
        /// Path to the JSON delivery configuration
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Order { config, selector } => {
            cmd_order(&config, selector.as_deref())?;
        }
        Commands::Check { config } => {
            cmd_check(&config)?;
        }
        Commands::Info { config } => {
            cmd_info(&config)?;
        }
    }

    Ok(())
}

fn cmd_order(path: &Path, only: Option<&str>) -> anyhow::Result<()> {
    let plan = load_config(path)?.build_plan()?;

    let selectors: Vec<&str> = match only {
        Some(selector) => vec![selector],
        None => plan.selectors(),
    };
    if selectors.is_empty() {
        println!("No visitors configured");
        return Ok(());
    }

    for selector in selectors {
        println!("{selector}");
        for phase in Phase::ALL {
            let labels: Vec<&str> = plan
                .table(phase)
                .get(selector)
                .iter()
                .map(|b| b.label())
                .collect();
            if labels.is_empty() {
                continue;
            }
            println!(
                "  {:<9} {}",
                format!("{phase}:"),
                labels.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    match config.build_plan() {
        Ok(plan) => {
            println!(
                "Configuration is valid ({} visitors, {} selectors)",
                plan.binding_count(),
                plan.selectors().len()
            );
            Ok(())
        }
        Err(err @ TrellisError::CircularDependency { .. }) => {
            println!("[ERROR] {err}");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let plan = config.build_plan()?;

    println!("Visitors: {}", plan.binding_count());
    println!("Selectors: {}", plan.selectors().len());

    let mut by_capability: BTreeMap<&str, usize> = BTreeMap::new();
    for phase in Phase::ALL {
        for (_, bindings) in plan.table(phase).iter() {
            for binding in bindings {
                *by_capability.entry(binding.capability().as_str()).or_default() += 1;
            }
        }
    }
    println!("\nCapabilities:");
    for capability in [
        Capability::ProducerOnly,
        Capability::Both,
        Capability::Neither,
        Capability::ConsumerOnly,
    ] {
        let count = by_capability.get(capability.as_str()).copied().unwrap_or(0);
        println!("  {:<18} {}", capability.as_str(), count);
    }

    println!("\nSelectors:");
    for selector in plan.selectors() {
        let counts: Vec<String> = Phase::ALL
            .iter()
            .map(|&phase| format!("{phase}={}", plan.table(phase).get(selector).len()))
            .collect();
        println!("  {} [{}]", selector, counts.join(" "));
    }

    Ok(())
}
