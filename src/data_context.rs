use crate::bar_utils::{group_bars_by_symbol, normalize_symbol};
use crate::models::Bar;
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_ALLOWED_SETTINGS: [&str; 11] = [
    "BARS_PER_DAY",
    "BREAKOUT_WINDOW_DAYS",
    "BUY_WINDOW_END",
    "BUY_WINDOW_START",
    "FREQ_LABEL",
    "LIMIT_BANDS",
    "MIN_GAP_RATIO",
    "SELL_WINDOW_END",
    "SELL_WINDOW_START",
    "SESSION_CLOSE",
    "SESSION_OPEN",
];

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    bars: Vec<Bar>,
    #[serde(default)]
    settings: HashMap<String, String>,
}

/// Plain JSON interchange form: `{"settings": {...}, "bars": [...]}`.
#[derive(Serialize, Deserialize)]
struct MarketDataJson {
    #[serde(default)]
    settings: HashMap<String, String>,
    bars: Vec<Bar>,
}

fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    settings
        .iter()
        .filter(|(key, _)| SNAPSHOT_ALLOWED_SETTINGS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}

/// Bar streams for every symbol of a scan plus the detector settings that
/// travelled with them.
pub struct MarketData {
    bars_by_symbol: Arc<HashMap<String, Vec<Bar>>>,
    symbols: Arc<Vec<String>>,
    settings: Arc<HashMap<String, String>>,
}

impl MarketData {
    pub fn from_bars(bars: Vec<Bar>, settings: HashMap<String, String>) -> Result<Self> {
        let bars = bars
            .into_iter()
            .map(|mut bar| {
                bar.symbol = normalize_symbol(&bar.symbol)
                    .ok_or_else(|| anyhow!("Bar at {} has an empty symbol", bar.dt))?;
                Ok(bar)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_components(group_bars_by_symbol(bars), settings)
    }

    /// Reads a bincode snapshot, or JSON when the file ends in `.json`.
    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!("Loading market data from {}", path.display()));
        let file = File::open(path)
            .with_context(|| format!("Failed to open market data at {}", path.display()))?;
        let reader = BufReader::new(file);

        if is_json(path) {
            let parsed: MarketDataJson =
                serde_json::from_reader(reader).context("Market data JSON decode failed")?;
            info!("Loaded {} bars from {}", parsed.bars.len(), path.display());
            return Self::from_bars(parsed.bars, parsed.settings);
        }

        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;
        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }
        info!(
            "Loaded snapshot generated at {} with {} bars",
            snapshot.generated_at,
            snapshot.bars.len()
        );
        Self::from_bars(snapshot.bars, snapshot.settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let bars = self
            .symbols
            .iter()
            .flat_map(|symbol| self.bars_by_symbol[symbol].iter().cloned())
            .collect();
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            bars,
            settings: scrub_snapshot_settings(self.settings.as_ref()),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    fn from_components(
        bars_by_symbol: HashMap<String, Vec<Bar>>,
        settings: HashMap<String, String>,
    ) -> Result<Self> {
        if bars_by_symbol.is_empty() {
            return Err(anyhow!("Market data has no usable symbols or bars"));
        }
        let mut symbols: Vec<String> = bars_by_symbol.keys().cloned().collect();
        symbols.sort();

        Ok(Self {
            bars_by_symbol: Arc::new(bars_by_symbol),
            symbols: Arc::new(symbols),
            settings: Arc::new(settings),
        })
    }

    /// Symbols in lexical order.
    pub fn symbols(&self) -> &[String] {
        self.symbols.as_slice()
    }

    pub fn bars(&self, symbol: &str) -> Option<&[Bar]> {
        self.bars_by_symbol.get(symbol).map(Vec::as_slice)
    }

    pub fn bar_count(&self) -> usize {
        self.bars_by_symbol.values().map(Vec::len).sum()
    }

    pub fn bars_by_symbol_arc(&self) -> Arc<HashMap<String, Vec<Bar>>> {
        Arc::clone(&self.bars_by_symbol)
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        self.settings.as_ref()
    }

    pub fn restrict_to_symbols(self, allowed_symbols: &HashSet<String>) -> Result<Self> {
        if allowed_symbols.is_empty() {
            return Ok(self);
        }
        let MarketData {
            bars_by_symbol,
            settings,
            ..
        } = self;

        let filtered: HashMap<String, Vec<Bar>> = bars_by_symbol
            .iter()
            .filter(|(symbol, _)| allowed_symbols.contains(*symbol))
            .map(|(symbol, bars)| (symbol.clone(), bars.clone()))
            .collect();
        if filtered.is_empty() {
            let mut requested: Vec<&String> = allowed_symbols.iter().collect();
            requested.sort();
            return Err(anyhow!(
                "None of the requested symbols have bars: {:?}",
                requested
            ));
        }

        Self::from_components(filtered, settings.as_ref().clone())
    }
}
