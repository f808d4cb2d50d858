use anyhow::Result;
use clap::{Parser, Subcommand};
use limitup_engine::{
    commands::{
        export_market_data,
        scan::{self, ScanOptions},
    },
    strategy::DEFAULT_SIGNAL_FUNCTIONS,
};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "../data/market-data.bin";

#[derive(Parser)]
#[command(name = "limitup-engine")]
#[command(about = "Limit-up breakout signal detector for intraday bar streams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay every symbol's bars through the detector and report actionable signals
    Scan {
        /// Path to the market data snapshot (bincode) or JSON bar document
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Destination for the JSON run report
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Comma separated symbols to scan (defaults to every symbol in the data)
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Bars before this date or timestamp only serve as lookback
        #[arg(long, value_parser = scan::parse_sdt)]
        sdt: Option<chrono::NaiveDateTime>,
        /// Worker threads (defaults to the CPU count)
        #[arg(long)]
        workers: Option<usize>,
        /// Signal functions to run, in evaluation order
        #[arg(long = "function", value_delimiter = ',')]
        functions: Vec<String>,
        /// Function parameter override such as breakoutWindowDays=10 (repeatable)
        #[arg(long = "param", value_parser = scan::parse_parameter)]
        params: Vec<(String, f64)>,
        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Convert a JSON bar document into a market data snapshot
    ExportMarketData {
        /// JSON bar document (or an existing snapshot to rewrite)
        #[arg(short, long = "input", value_name = "PATH")]
        input: PathBuf,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting limitup-engine. Signals are research output, not trading advice.");

    match command {
        Commands::Scan {
            data_file,
            output,
            symbols,
            sdt,
            workers,
            functions,
            params,
            quiet,
        } => {
            let functions = if functions.is_empty() {
                DEFAULT_SIGNAL_FUNCTIONS
                    .iter()
                    .map(|id| id.to_string())
                    .collect()
            } else {
                functions
            };
            let options = ScanOptions {
                data_file: resolve_market_data_path(data_file),
                output,
                symbols,
                sdt,
                workers,
                functions,
                parameters: params.into_iter().collect::<HashMap<_, _>>(),
                show_progress: !quiet,
            };
            scan::run(&options)?;
        }
        Commands::ExportMarketData { input, output } => {
            let output_path = resolve_market_data_path(output);
            export_market_data::run(&input, &output_path)?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
