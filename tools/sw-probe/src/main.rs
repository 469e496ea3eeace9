//! Probe harness for the webchordr offline cache.
//!
//! Installs and activates one worker version against a live origin, then
//! routes requests through it and prints where each answer came from.
//!
//! ## Usage
//!
//! ```bash
//! # Print the default manifest for a build
//! sw-probe manifest --script /webchordr-4f2a.js --wasm /webchordr-4f2a_bg.wasm --sortable /sortable.js
//!
//! # Install, activate, then fetch some paths
//! sw-probe run --config sw.json / /catalog.json /song/42
//!
//! # Same, with a JSON report
//! sw-probe --log-format json run --config sw.json --report report.json /catalog.json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use webchordr_sw::{BundlePaths, PrecacheManifest};
use webchordr_sw_common::{init_logging, LogConfig, LogFormat};

mod probe;

#[derive(Parser)]
#[command(name = "sw-probe")]
#[command(about = "Drive a webchordr offline cache version against a live origin")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: Format,

    /// Debug logging for the cache crates
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the application's precache manifest as JSON
    Manifest {
        /// Compiled JavaScript bundle path
        #[arg(long)]
        script: String,
        /// WASM binary path
        #[arg(long)]
        wasm: String,
        /// Sortable helper script path
        #[arg(long)]
        sortable: String,
    },

    /// Install and activate a version, then fetch the given paths through it
    Run {
        /// Worker configuration JSON
        #[arg(short, long)]
        config: PathBuf,
        /// Write a JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Paths to request after activation
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format.into()))?;

    match cli.command {
        Commands::Manifest {
            script,
            wasm,
            sortable,
        } => {
            let manifest = PrecacheManifest::webchordr(&BundlePaths {
                script,
                wasm,
                sortable,
            });
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }

        Commands::Run {
            config,
            report,
            paths,
        } => {
            let config = probe::load_config(&config)?;
            let result = probe::run(config, &paths).await?;

            println!("Version {} active", result.version);
            println!("  Partitions: {}", result.partitions.join(", "));
            for fetch in &result.fetches {
                println!(
                    "  {:<8} {:>3} {:>8}B  {}",
                    fetch.source, fetch.status, fetch.bytes, fetch.path
                );
            }

            if let Some(report_path) = report {
                std::fs::write(&report_path, serde_json::to_string_pretty(&result)?)?;
                println!("Report written to: {}", report_path.display());
            }

            if result.fetches.iter().any(|f| f.source == "failed") {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
