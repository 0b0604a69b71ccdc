//! trieq CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trieq_app::report::{self, AnalyzeReport, ParamRow, ResponseRow};
use trieq_core::domain::config::{ConfigManager, EqConfig};

#[derive(Parser)]
#[command(name = "trieq")]
#[command(about = "Three-band equalizer with response and spectrum analysis", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (defaults to the per-user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Parameter override, e.g. --set "Peak Gain=6" (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE", global = true)]
    overrides: Vec<String>,

    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every parameter with its current value and range
    Params,
    /// Print the analytic response of the filter chain
    Response {
        /// Number of log-spaced frequencies
        #[arg(short, long, default_value_t = 31)]
        points: usize,
    },
    /// Run test tones through the equalizer and report spectrum peaks
    Analyze {
        /// Tone frequencies in Hz
        #[arg(short, long, num_args = 1.., default_values_t = [1000.0])]
        tones: Vec<f32>,
        /// Amplitude of each tone
        #[arg(short, long, default_value_t = 0.25)]
        amplitude: f32,
        /// Length of the signal in seconds
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("trieq starting");

    if let Commands::InitConfig { force } = cli.command {
        return init_config(cli.config, force).await;
    }

    let mut config = load_config(cli.config.as_ref()).await?;
    config.parameters = report::apply_overrides(&config.parameters, &cli.overrides)?;

    match cli.command {
        Commands::Params => print_params(&report::param_catalog(&config.parameters), cli.json),
        Commands::Response { points } => {
            let rows = report::response_table(
                &config.parameters,
                f64::from(config.engine.sample_rate),
                points,
            )?;
            print_response(&rows, cli.json)
        }
        Commands::Analyze {
            tones,
            amplitude,
            seconds,
        } => {
            let analysis = report::analyze_tones(&config, &tones, amplitude, seconds)?;
            print_analysis(&analysis, cli.json)
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EqConfig> {
    match path {
        Some(path) => EqConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
            Ok(manager.load().await)
        }
    }
}

async fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => ConfigManager::new(ConfigManager::default_config_dir()?)
            .config_path()
            .to_path_buf(),
    };

    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    EqConfig::factory_default()
        .save_to_file(&path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn print_params(rows: &[ParamRow], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    println!("{:<14} {:>12} {:>10} {:>10} {:>6}", "Parameter", "Value", "Min", "Max", "Step");
    for row in rows {
        println!(
            "{:<14} {:>12} {:>10} {:>10} {:>6}",
            row.id,
            row.display,
            row.min_label.as_deref().unwrap_or("-"),
            row.max_label.as_deref().unwrap_or("-"),
            row.step
        );
    }
    Ok(())
}

fn print_response(rows: &[ResponseRow], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    println!("{:>12} {:>10}", "Freq (Hz)", "Gain (dB)");
    for row in rows {
        println!("{:>12.1} {:>10.2}", row.frequency_hz, row.magnitude_db);
    }
    Ok(())
}

fn print_analysis(analysis: &AnalyzeReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(analysis)?);
        return Ok(());
    }

    println!(
        "Processed {} blocks (FIFO: {} stored, {} displaced, {} rejected)",
        analysis.blocks_processed, analysis.fifo_stored, analysis.fifo_displaced, analysis.fifo_rejected
    );
    if analysis.peaks.is_empty() {
        println!("No peaks above the analyzer floor");
        return Ok(());
    }
    println!("{:>12} {:>10}", "Peak (Hz)", "Level (dB)");
    for peak in &analysis.peaks {
        println!("{:>12.1} {:>10.2}", peak.frequency_hz, peak.level_db);
    }
    Ok(())
}
