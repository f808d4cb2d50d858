//! Day-boundary windowing over a symbol's bar history.
//!
//! Every function here treats the last element of `history` as the bar being
//! evaluated and only looks backward from it.

use crate::config::DetectorConfig;
use crate::error::{DetectorError, DetectorResult};
use crate::models::Bar;
use log::warn;

/// Contiguous bars of one trading day, ending at the evaluated bar.
#[derive(Debug, Clone, Copy)]
pub struct DayWindow<'a> {
    pub bars: &'a [Bar],
    /// Last bar of the previous trading day, when the history reaches back that far.
    pub prior_close_bar: Option<&'a Bar>,
    pub expected: usize,
}

impl<'a> DayWindow<'a> {
    pub fn empty(expected: usize) -> Self {
        Self {
            bars: &[],
            prior_close_bar: None,
            expected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_complete(&self) -> bool {
        self.bars.len() == self.expected
    }

    pub fn first(&self) -> Option<&'a Bar> {
        self.bars.first()
    }
}

/// The session immediately before the evaluated session-open bar.
#[derive(Debug, Clone, Copy)]
pub struct PriorSession<'a> {
    pub open_bar: &'a Bar,
    pub close_bar: &'a Bar,
}

/// Collect the evaluated bar's trading day. Returns an empty window unless the
/// evaluated bar carries the session-close label.
pub fn extract_day_bars<'a>(
    history: &'a [Bar],
    config: &DetectorConfig,
) -> DetectorResult<DayWindow<'a>> {
    let expected = config.bars_per_day;
    let Some(current) = history.last() else {
        return Ok(DayWindow::empty(expected));
    };
    if current.time() != config.session_close {
        return Ok(DayWindow::empty(expected));
    }

    let date = current.date();
    let start = history
        .iter()
        .rposition(|bar| bar.date() != date)
        .map_or(0, |idx| idx + 1);
    let bars = &history[start..];

    if bars.len() > expected {
        return Err(DetectorError::integrity(
            &current.symbol,
            current.dt,
            format!(
                "trading day holds {} bars, expected at most {}",
                bars.len(),
                expected
            ),
        ));
    }

    let window = DayWindow {
        bars,
        prior_close_bar: start.checked_sub(1).map(|idx| &history[idx]),
        expected,
    };
    if !window.is_complete() {
        warn!(
            "Data gap for {} on {}: {} of {} bars present",
            current.symbol,
            date,
            window.len(),
            expected
        );
    }
    Ok(window)
}

/// Locate the previous trading day's session-open and last bars for an
/// evaluated session-open bar.
pub fn prior_session<'a>(
    history: &'a [Bar],
    config: &DetectorConfig,
) -> DetectorResult<PriorSession<'a>> {
    let Some(current) = history.last() else {
        return Err(DetectorError::EmptyHistory("prior session lookup".to_string()));
    };
    let missing = || DetectorError::MissingPriorDay {
        symbol: current.symbol.clone(),
        dt: current.dt,
    };

    let close_idx = history.len().checked_sub(2).ok_or_else(missing)?;
    let close_bar = &history[close_idx];
    if close_bar.date() >= current.date() {
        return Err(missing());
    }
    if close_bar.time() != config.session_close {
        warn!(
            "Prior session for {} ends at {} instead of the session close",
            current.symbol, close_bar.dt
        );
    }

    let prior_date = close_bar.date();
    let open_bar = history[..=close_idx]
        .iter()
        .rev()
        .take_while(|bar| bar.date() == prior_date)
        .find(|bar| bar.time() == config.session_open)
        .ok_or_else(missing)?;

    Ok(PriorSession {
        open_bar,
        close_bar,
    })
}
