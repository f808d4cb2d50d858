use std::sync::{Arc, Mutex};

/// Shared progress of a scan, readable while workers are still running.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_symbols: usize,
    completed_symbols: usize,
    failed_symbols: usize,
    signals_emitted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_symbols: usize,
    pub completed_symbols: usize,
    pub failed_symbols: usize,
    pub signals_emitted: usize,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_total(&self, total_symbols: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_symbols = total_symbols;
            data.completed_symbols = 0;
            data.failed_symbols = 0;
            data.signals_emitted = 0;
        }
    }

    pub fn record_symbol(&self, signals: usize, failed: bool) {
        if let Ok(mut data) = self.inner.lock() {
            data.completed_symbols += 1;
            data.signals_emitted += signals;
            if failed {
                data.failed_symbols += 1;
            }
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_symbols: data.total_symbols,
                completed_symbols: data.completed_symbols,
                failed_symbols: data.failed_symbols,
                signals_emitted: data.signals_emitted,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_symbols: 0,
                completed_symbols: 0,
                failed_symbols: 0,
                signals_emitted: 0,
            }
        }
    }
}
