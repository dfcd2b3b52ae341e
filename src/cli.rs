//! CLI interface for learnpath

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogDocument};
use crate::config::{self, Config};

#[derive(Parser)]
#[command(name = "learnpath")]
#[command(about = "Learning module progression and recommendation service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "LEARNPATH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Catalog file to load at startup (overrides config)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Inspect catalog files
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Load a catalog file and report its structure
    Validate {
        /// JSON or TOML catalog file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the configuration file path
    Path,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            catalog,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if catalog.is_some() {
                config.catalog.path = catalog;
            }
            crate::server::start(config).await?;
        }
        Commands::Catalog {
            command: CatalogCommands::Validate { file },
        } => {
            validate_catalog(&file)?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = load_config(cli.config.as_deref())?;
                config::show_config(&config)?;
            }
            ConfigCommands::Init { force } => {
                let path = resolve_config_path(cli.config)?;
                if path.exists() && !force {
                    println!("Config already exists at {}", path.display());
                    println!("Use --force to overwrite.");
                } else {
                    Config::default().save_to(&path)?;
                    println!("✓ Wrote default config to {}", path.display());
                }
            }
            ConfigCommands::Path => {
                println!("{}", resolve_config_path(cli.config)?.display());
            }
        },
    }

    Ok(())
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => config::config_path(),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn validate_catalog(file: &Path) -> Result<()> {
    let document = CatalogDocument::load(file)?;
    let catalog = Catalog::from_definitions(document.modules)
        .with_context(|| format!("Catalog {} is invalid", file.display()))?;

    println!("✓ {} modules, no cycles", catalog.len());
    println!();
    println!("Topological order:");
    for (i, module) in catalog.topological_order().enumerate() {
        let prereqs = module.prerequisites();
        if prereqs.is_empty() {
            println!("  {:>3}. {}", i + 1, module.id());
        } else {
            let names: Vec<&str> = prereqs.iter().map(|p| p.as_str()).collect();
            println!("  {:>3}. {} (after {})", i + 1, module.id(), names.join(", "));
        }
    }

    if !catalog.warnings().is_empty() {
        println!();
        println!("Warnings:");
        for warning in catalog.warnings() {
            println!("  ⚠ {}", warning);
        }
    }
    Ok(())
}
