use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a fixed intraday interval, labelled by its close time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub dt: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.dt.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.dt.time()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Tradable signal handed to the downstream position framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSignal {
    pub dt: NaiveDateTime,
    pub symbol: String,
    pub action: SignalAction,
    pub source: String,
}

/// Diagnostic snapshot captured when a breakout entry fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDetailRecord {
    pub key: String,
    pub code: String,
    pub avg_daily_amount: f64,
    pub open_gain: f64,
    pub limit_dt: NaiveDateTime,
    pub fluctuation_days: usize,
}

impl SignalDetailRecord {
    pub fn key_for(date: NaiveDate, symbol: &str) -> String {
        format!("{}#{}", date.format("%Y%m%d"), symbol)
    }
}
