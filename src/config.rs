use crate::error::{DetectorError, DetectorResult};
use crate::param_utils::{get_param_f64_clamped, get_param_hhmm, get_param_usize, hhmm_to_time};
use anyhow::{anyhow, Result};
use chrono::{NaiveTime, Timelike};
use std::collections::HashMap;

/// Ten years of calendar days.
pub const MAX_BREAKOUT_WINDOW_DAYS: i64 = 3_650;
/// One bar per minute around the clock.
pub const MAX_BARS_PER_DAY: usize = 1_440;

/// Time-of-day range over session labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// `start < t <= end`, the close-of-day sell range.
    pub fn contains_left_open(&self, t: NaiveTime) -> bool {
        self.start < t && t <= self.end
    }

    /// `start <= t < end`, the close-of-day buy range.
    pub fn contains_right_open(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn label(&self) -> String {
        format!("T{}#{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parameters of the limit-up breakout detector. Defaults model 5 minute bars
/// over a 4 hour continuous session.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub freq_label: String,
    pub bars_per_day: usize,
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
    pub sell_window: TimeWindow,
    pub buy_window: TimeWindow,
    pub breakout_window_days: i64,
    pub min_gap_ratio: f64,
    pub limit_bands: Vec<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            freq_label: "5min".to_string(),
            bars_per_day: 48,
            session_open: time(9, 35),
            session_close: time(15, 0),
            sell_window: TimeWindow::new(time(14, 55), time(15, 0)),
            buy_window: TimeWindow::new(time(14, 45), time(14, 50)),
            breakout_window_days: 20,
            min_gap_ratio: 0.01,
            limit_bands: vec![0.10, 0.20, 0.30],
        }
    }
}

impl DetectorConfig {
    /// Overlay settings carried alongside the market data (all keys optional).
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = optional_setting(settings, "FREQ_LABEL") {
            config.freq_label = raw.to_string();
        }
        if let Some(value) = optional_setting_usize(settings, "BARS_PER_DAY", 1)? {
            config.bars_per_day = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "SESSION_OPEN")? {
            config.session_open = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "SESSION_CLOSE")? {
            config.session_close = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "SELL_WINDOW_START")? {
            config.sell_window.start = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "SELL_WINDOW_END")? {
            config.sell_window.end = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "BUY_WINDOW_START")? {
            config.buy_window.start = value;
        }
        if let Some(value) = optional_setting_hhmm(settings, "BUY_WINDOW_END")? {
            config.buy_window.end = value;
        }
        if let Some(value) = optional_setting_usize(settings, "BREAKOUT_WINDOW_DAYS", 1)? {
            config.breakout_window_days = value as i64;
        }
        if let Some(raw) = optional_setting(settings, "MIN_GAP_RATIO") {
            config.min_gap_ratio = parse_f64("MIN_GAP_RATIO", raw)?;
        }
        if let Some(raw) = optional_setting(settings, "LIMIT_BANDS") {
            config.limit_bands = parse_limit_bands(raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply per-function numeric parameters on top of this config.
    pub fn with_parameters(&self, parameters: &HashMap<String, f64>) -> Self {
        let mut config = self.clone();
        config.bars_per_day = get_param_usize(parameters, "barsPerDay", config.bars_per_day);
        if let Some(t) = get_param_hhmm(parameters, "sessionOpen") {
            config.session_open = t;
        }
        if let Some(t) = get_param_hhmm(parameters, "sessionClose") {
            config.session_close = t;
        }
        if let Some(t) = get_param_hhmm(parameters, "sellWindowStart") {
            config.sell_window.start = t;
        }
        if let Some(t) = get_param_hhmm(parameters, "sellWindowEnd") {
            config.sell_window.end = t;
        }
        if let Some(t) = get_param_hhmm(parameters, "buyWindowStart") {
            config.buy_window.start = t;
        }
        if let Some(t) = get_param_hhmm(parameters, "buyWindowEnd") {
            config.buy_window.end = t;
        }
        config.breakout_window_days = get_param_usize(
            parameters,
            "breakoutWindowDays",
            config.breakout_window_days as usize,
        ) as i64;
        config.min_gap_ratio =
            get_param_f64_clamped(parameters, "minGapRatio", config.min_gap_ratio, 0.0, 1.0);
        config
    }

    pub fn validate(&self) -> DetectorResult<()> {
        if self.bars_per_day == 0 || self.bars_per_day > MAX_BARS_PER_DAY {
            return Err(DetectorError::InvalidConfig(format!(
                "bars_per_day must be in 1..={} (value: {})",
                MAX_BARS_PER_DAY, self.bars_per_day
            )));
        }
        if self.session_open >= self.session_close {
            return Err(DetectorError::InvalidConfig(format!(
                "session open {} must precede session close {}",
                format_hhmm(self.session_open),
                format_hhmm(self.session_close)
            )));
        }
        for (name, window) in [("sell", self.sell_window), ("buy", self.buy_window)] {
            if window.start >= window.end {
                return Err(DetectorError::InvalidConfig(format!(
                    "{} window start {} must precede its end {}",
                    name,
                    format_hhmm(window.start),
                    format_hhmm(window.end)
                )));
            }
        }
        if !(1..=MAX_BREAKOUT_WINDOW_DAYS).contains(&self.breakout_window_days) {
            return Err(DetectorError::InvalidConfig(format!(
                "breakout_window_days must be in 1..={} (value: {})",
                MAX_BREAKOUT_WINDOW_DAYS, self.breakout_window_days
            )));
        }
        if !self.min_gap_ratio.is_finite() || self.min_gap_ratio < 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "min_gap_ratio must be a non-negative number (value: {})",
                self.min_gap_ratio
            )));
        }
        if self.limit_bands.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "limit_bands must contain at least one band".to_string(),
            ));
        }
        if let Some(band) = self
            .limit_bands
            .iter()
            .find(|band| !band.is_finite() || **band <= 0.0)
        {
            return Err(DetectorError::InvalidConfig(format!(
                "limit band {} must be a positive ratio",
                band
            )));
        }
        Ok(())
    }

    /// Bars a signal function may look back over: the breakout window plus the
    /// limit day and the day before it.
    pub fn lookback_bars(&self) -> usize {
        let days = usize::try_from(self.breakout_window_days.max(0)).unwrap_or(usize::MAX);
        self.bars_per_day.saturating_mul(days.saturating_add(2))
    }

    /// Limit bands in whole percent, the unit the classifier compares in.
    pub fn limit_band_percent(&self) -> Vec<i64> {
        self.limit_bands
            .iter()
            .map(|band| (band * 100.0).round() as i64)
            .collect()
    }

    pub fn session_label(&self) -> String {
        TimeWindow::new(self.session_open, self.session_close).label()
    }
}

pub fn format_hhmm(t: NaiveTime) -> String {
    format!("{:02}{:02}", t.hour(), t.minute())
}

pub fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    let trimmed = raw.trim().replace(':', "");
    if trimmed.len() != 4 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Session label must be HHMM (value: {})", raw));
    }
    let value: u32 = trimmed
        .parse()
        .map_err(|_| anyhow!("Session label must be HHMM (value: {})", raw))?;
    hhmm_to_time(value).ok_or_else(|| anyhow!("Session label out of range (value: {})", raw))
}

pub fn parse_limit_bands(raw: &str) -> Result<Vec<f64>> {
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = parse_f64("LIMIT_BANDS", entry)?;
        if value <= 0.0 {
            return Err(anyhow!(
                "LIMIT_BANDS must contain only positive ratios (value: {})",
                raw
            ));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "LIMIT_BANDS must contain at least one number (value: {})",
            raw
        ));
    }

    Ok(values)
}

fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_hhmm(
    settings: &HashMap<String, String>,
    key: &str,
) -> Result<Option<NaiveTime>> {
    optional_setting(settings, key)
        .map(|raw| parse_hhmm(raw).map_err(|e| anyhow!("Setting {}: {}", key, e)))
        .transpose()
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = parse_f64(key, raw)?;
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}

fn parse_f64(key: &str, raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    Ok(value)
}
