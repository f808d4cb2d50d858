//! Batch driver: replays every symbol's bar stream through a set of signal
//! functions on a worker pool that shares one `SymbolStateStore`.

use crate::bar_utils::ensure_strictly_increasing;
use crate::config::DetectorConfig;
use crate::data_context::MarketData;
use crate::error::DetectorResult;
use crate::models::{Bar, GeneratedSignal, SignalDetailRecord};
use crate::run_status::RunStatus;
use crate::signals::{emit_signal, NamedSignal};
use crate::state_store::SymbolStateStore;
use crate::strategy::{create_signal_function, SignalFunction};
use anyhow::Result;
use chrono::NaiveDateTime;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Bars before this instant only serve as lookback.
    pub sdt: Option<NaiveDateTime>,
    /// Worker threads; defaults to the CPU count.
    pub workers: Option<usize>,
    pub show_progress: bool,
}

/// Outcome of one symbol's replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRun {
    pub symbol: String,
    pub bars_evaluated: usize,
    pub signals: Vec<NamedSignal>,
    pub error: Option<String>,
}

/// How many symbols emitted `signal` on the bar labelled `dt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossSectionCount {
    pub dt: NaiveDateTime,
    pub signal: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub functions: Vec<String>,
    pub symbols: Vec<SymbolRun>,
    pub cross_section: Vec<CrossSectionCount>,
    pub trades: Vec<GeneratedSignal>,
    pub details: Vec<SignalDetailRecord>,
}

impl RunReport {
    pub fn failed_symbols(&self) -> impl Iterator<Item = &SymbolRun> {
        self.symbols.iter().filter(|run| run.error.is_some())
    }

    pub fn signal_count(&self) -> usize {
        self.symbols.iter().map(|run| run.signals.len()).sum()
    }
}

pub struct SignalRunner {
    functions: Arc<Vec<Box<dyn SignalFunction>>>,
    store: SymbolStateStore,
    status: RunStatus,
}

impl SignalRunner {
    /// Functions run in the order given; with the defaults the entry function
    /// sees each bar before the exit function.
    pub fn new(
        template_ids: &[String],
        parameters: &HashMap<String, f64>,
        config: &DetectorConfig,
        store: SymbolStateStore,
    ) -> Result<Self> {
        if template_ids.is_empty() {
            return Err(anyhow::anyhow!("No signal functions configured"));
        }
        let functions = template_ids
            .iter()
            .map(|id| create_signal_function(id, parameters, config, &store))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_functions(functions, store))
    }

    pub fn from_functions(functions: Vec<Box<dyn SignalFunction>>, store: SymbolStateStore) -> Self {
        Self {
            functions: Arc::new(functions),
            store,
            status: RunStatus::new(),
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn function_keys(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.key().to_string()).collect()
    }

    pub fn lookback_bars(&self) -> usize {
        self.functions
            .iter()
            .map(|f| f.lookback_bars())
            .max()
            .unwrap_or(0)
    }

    /// Replay one symbol on the calling thread.
    pub fn run_symbol(
        &self,
        symbol: &str,
        bars: &[Bar],
        sdt: Option<NaiveDateTime>,
    ) -> DetectorResult<Vec<NamedSignal>> {
        replay_symbol(&self.functions, &self.store, symbol, bars, sdt, self.lookback_bars())
            .map(|(signals, _)| signals)
    }

    pub fn run(&self, data: &MarketData, options: &RunnerOptions) -> Result<RunReport> {
        let symbols = data.symbols().to_vec();
        let total = symbols.len();
        self.status.set_total(total);
        self.status
            .set_phase(format!("Scanning {} symbols", total));
        info!(
            "Running {} over {} symbols ({} bars)...",
            self.function_keys().join(", "),
            total,
            data.bar_count()
        );

        let mut runs = if total == 0 {
            Vec::new()
        } else {
            self.run_pool(data, &symbols, options)?
        };
        runs.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        self.status.set_phase("Aggregating");
        let cross_section = cross_section_counts(&runs);
        let trades = runs
            .iter()
            .flat_map(|run| run.signals.iter())
            .filter_map(NamedSignal::to_generated_signal)
            .collect();

        let report = RunReport {
            functions: self.function_keys(),
            symbols: runs,
            cross_section,
            trades,
            details: self.store.details.snapshot(),
        };
        self.status.set_phase("Completed");
        Ok(report)
    }

    fn run_pool(
        &self,
        data: &MarketData,
        symbols: &[String],
        options: &RunnerOptions,
    ) -> Result<Vec<SymbolRun>> {
        let total = symbols.len();
        let requested = options.workers.unwrap_or_else(num_cpus::get);
        let num_workers = std::cmp::min(total, std::cmp::max(1, requested));
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<String>, Receiver<String>) = bounded(total);
        let (result_tx, result_rx): (Sender<SymbolRun>, Receiver<SymbolRun>) = bounded(total);
        let lookback = self.lookback_bars();

        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let bars_by_symbol = data.bars_by_symbol_arc();
            let functions = Arc::clone(&self.functions);
            let store = self.store.clone();
            let status = self.status.clone();
            let sdt = options.sdt;

            let handle = thread::spawn(move || {
                while let Ok(symbol) = rx.recv() {
                    let start_time = Instant::now();
                    let bars = bars_by_symbol
                        .get(&symbol)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let run = match replay_symbol(&functions, &store, &symbol, bars, sdt, lookback)
                    {
                        Ok((signals, bars_evaluated)) => SymbolRun {
                            symbol,
                            bars_evaluated,
                            signals,
                            error: None,
                        },
                        Err(e) => {
                            warn!("Aborting {}: {}", symbol, e);
                            SymbolRun {
                                symbol,
                                bars_evaluated: 0,
                                signals: Vec::new(),
                                error: Some(e.to_string()),
                            }
                        }
                    };
                    log::debug!(
                        "Worker finished {} in {:.1}s with {} signals",
                        run.symbol,
                        start_time.elapsed().as_secs_f64(),
                        run.signals.len()
                    );
                    status.record_symbol(run.signals.len(), run.error.is_some());

                    if result_tx.send(run).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        for symbol in symbols {
            tx.send(symbol.clone())?;
        }
        drop(tx);
        drop(result_tx);

        let pb = if options.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut runs = Vec::with_capacity(total);
        let mut failed = 0;
        while runs.len() < total {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(run) => {
                    if run.error.is_some() {
                        failed += 1;
                    }
                    runs.push(run);
                    pb.set_position(runs.len() as u64);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if failed > 0 {
            warn!("Scan completed with {} aborted symbols", failed);
            pb.finish_with_message("Scan completed with errors");
        } else {
            pb.finish_with_message("Scan completed");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("Signal worker panicked");
            }
        }
        Ok(runs)
    }
}

/// Evaluate every function on every bar from `sdt` on, in order, keeping the
/// actionable results. Returns the signals and the number of bars evaluated.
fn replay_symbol(
    functions: &[Box<dyn SignalFunction>],
    store: &SymbolStateStore,
    symbol: &str,
    bars: &[Bar],
    sdt: Option<NaiveDateTime>,
    lookback: usize,
) -> DetectorResult<(Vec<NamedSignal>, usize)> {
    ensure_strictly_increasing(symbol, bars)?;
    store.reset_symbol(symbol);

    let start = sdt.map_or(0, |sdt| bars.partition_point(|bar| bar.dt < sdt));
    let mut signals = Vec::new();
    for index in start..bars.len() {
        let history = &bars[index.saturating_sub(lookback)..=index];
        for function in functions {
            match emit_signal(function.as_ref(), symbol, history) {
                Ok(signal) if signal.is_actionable() => signals.push(signal),
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    log::debug!("{} at {}: {}", symbol, bars[index].dt, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok((signals, bars.len() - start))
}

/// Per-timestamp, per-signal symbol counts over all actionable signals.
pub fn cross_section_counts(runs: &[SymbolRun]) -> Vec<CrossSectionCount> {
    let merged = runs
        .par_iter()
        .fold(
            BTreeMap::new,
            |mut acc: BTreeMap<(NaiveDateTime, String), usize>, run| {
                for signal in &run.signals {
                    *acc.entry((signal.dt, signal.signal_string())).or_insert(0) += 1;
                }
                acc
            },
        )
        .reduce(BTreeMap::new, |mut left, right| {
            for (key, count) in right {
                *left.entry(key).or_insert(0) += count;
            }
            left
        });

    merged
        .into_iter()
        .map(|((dt, signal), count)| CrossSectionCount { dt, signal, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SignalKey, SignalValue};
    use chrono::NaiveDate;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
    }

    fn signal(symbol: &str, minute: u32, value: SignalValue) -> NamedSignal {
        NamedSignal {
            key: "5min_T0935#1500_FluctuateBreakout".to_string(),
            value,
            dt: at(minute),
            symbol: symbol.to_string(),
            action: crate::models::SignalAction::Buy,
        }
    }

    fn run(symbol: &str, signals: Vec<NamedSignal>) -> SymbolRun {
        SymbolRun {
            symbol: symbol.to_string(),
            bars_evaluated: 1,
            signals,
            error: None,
        }
    }

    #[test]
    fn cross_section_counts_symbols_per_bar() {
        let runs = vec![
            run("A", vec![signal("A", 0, SignalValue::Yes)]),
            run("B", vec![signal("B", 0, SignalValue::Yes), signal("B", 5, SignalValue::Yes)]),
            run("C", Vec::new()),
        ];
        let counts = cross_section_counts(&runs);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].dt, at(0));
        assert_eq!(counts[0].count, 2);
        assert_eq!(
            counts[0].signal,
            "5min_T0935#1500_FluctuateBreakout_Yes_Any_Any_0"
        );
        assert_eq!(counts[1].count, 1);
    }

    struct Every(SignalKey);

    impl SignalFunction for Every {
        fn key(&self) -> &SignalKey {
            &self.0
        }

        fn evaluate(&self, _symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue> {
            Ok(SignalValue::from_bool(bars.len() <= 2))
        }

        fn lookback_bars(&self) -> usize {
            1
        }
    }

    fn bars(symbol: &str, minutes: &[u32]) -> Vec<Bar> {
        minutes
            .iter()
            .map(|&m| Bar {
                symbol: symbol.to_string(),
                dt: at(m),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                amount: 1.0,
            })
            .collect()
    }

    #[test]
    fn replay_respects_sdt_and_bounded_lookback() {
        let runner = SignalRunner::from_functions(
            vec![Box::new(Every(SignalKey::new("5min", "X", "Every")))],
            SymbolStateStore::new(),
        );
        let stream = bars("A", &[0, 5, 10, 15]);

        // lookback of one bar means every history slice holds at most two bars
        let signals = runner.run_symbol("A", &stream, None).unwrap();
        assert_eq!(signals.len(), 4);

        let signals = runner.run_symbol("A", &stream, Some(at(10))).unwrap();
        let dts: Vec<NaiveDateTime> = signals.iter().map(|s| s.dt).collect();
        assert_eq!(dts, vec![at(10), at(15)]);
    }

    #[test]
    fn out_of_order_stream_is_rejected() {
        let runner = SignalRunner::from_functions(
            vec![Box::new(Every(SignalKey::new("5min", "X", "Every")))],
            SymbolStateStore::new(),
        );
        let stream = bars("A", &[0, 10, 5]);
        assert!(runner.run_symbol("A", &stream, None).is_err());
    }
}
