use crate::bar_utils::normalize_symbol;
use crate::commands::market_data_snapshot::ensure_market_data_file;
use crate::config::DetectorConfig;
use crate::data_context::MarketData;
use crate::run_status::RunStatus;
use crate::runner::{RunReport, RunnerOptions, SignalRunner};
use crate::state_store::SymbolStateStore;
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct ScanOptions {
    pub data_file: PathBuf,
    pub output: Option<PathBuf>,
    pub symbols: Vec<String>,
    pub sdt: Option<NaiveDateTime>,
    pub workers: Option<usize>,
    pub functions: Vec<String>,
    pub parameters: HashMap<String, f64>,
    pub show_progress: bool,
}

pub fn run(options: &ScanOptions) -> Result<RunReport> {
    ensure_market_data_file(&options.data_file)?;
    info!(
        "Using market data from {}",
        options.data_file.display()
    );

    let status = RunStatus::new();
    let mut market_data = MarketData::load_from_file(&options.data_file, &status)?;
    let allowed: HashSet<String> = options
        .symbols
        .iter()
        .filter_map(|symbol| normalize_symbol(symbol))
        .collect();
    if !allowed.is_empty() {
        market_data = market_data.restrict_to_symbols(&allowed)?;
        info!("Restricted scan to {} symbols", market_data.symbols().len());
    }

    let config = DetectorConfig::from_settings_map(market_data.settings())
        .context("Invalid detector settings in market data")?;
    let runner = SignalRunner::new(
        &options.functions,
        &options.parameters,
        &config,
        SymbolStateStore::new(),
    )?
    .with_status(status);

    let report = runner.run(
        &market_data,
        &RunnerOptions {
            sdt: options.sdt,
            workers: options.workers,
            show_progress: options.show_progress,
        },
    )?;

    let failed: Vec<&str> = report
        .failed_symbols()
        .map(|run| run.symbol.as_str())
        .collect();
    if !failed.is_empty() {
        warn!("{} symbols aborted: {}", failed.len(), failed.join(", "));
    }
    info!(
        "Scan finished: {} actionable signals, {} trades, {} entry details",
        report.signal_count(),
        report.trades.len(),
        report.details.len()
    );

    if let Some(path) = options.output.as_ref() {
        write_report(&report, path)?;
        info!("Report written to {}", path.display());
    }
    Ok(report)
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Unable to create report at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report).context("Failed to serialize report")?;
    writer.flush().context("Failed to flush report to disk")?;
    Ok(())
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD` or `YYYY-MM-DD HH:MM[:SS]`; dates start at midnight.
pub fn parse_sdt(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    for format in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date.and_time(chrono::NaiveTime::MIN));
        }
    }
    Err(anyhow!("Invalid start timestamp: {}", raw))
}

/// Parses `name=value` pairs such as `breakoutWindowDays=10`.
pub fn parse_parameter(raw: &str) -> Result<(String, f64)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Parameter must be name=value (value: {})", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Parameter name is empty (value: {})", raw));
    }
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Parameter {} must be a number", name))?;
    if !value.is_finite() {
        return Err(anyhow!("Parameter {} must be finite", name));
    }
    Ok((name.to_string(), value))
}
