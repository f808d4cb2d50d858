//! Approximate daily limit-up detection.
//!
//! A day counts as limit-up when its last bar closes at the day high, above the
//! prior close, with a gain that rounds to one of the configured exchange
//! bands (10% main board, 20% ChiNext/STAR, 30% Beijing by default). ST
//! stocks and exchange-specific price ticks are not modelled.

use crate::bar_window::DayWindow;
use crate::error::{DetectorError, DetectorResult};
use crate::models::Bar;

// Absorbs float noise from the price division so that a 10.95 close on a
// 10.00 prior close rounds up like its decimal value does.
const ROUNDING_SLACK: f64 = 1e-9;

/// Gain ratio rounded half-up to whole percent.
pub fn rounded_gain_percent(ratio: f64) -> i64 {
    (ratio * 100.0 + ROUNDING_SLACK.copysign(ratio)).round() as i64
}

/// `day_bars` must end at the session-close bar of the day being classified.
pub fn is_limit_up(
    day_bars: &[Bar],
    prior_day_last_bar: &Bar,
    band_percent: &[i64],
) -> DetectorResult<bool> {
    let Some(current) = day_bars.last() else {
        return Ok(false);
    };
    let day_high = day_bars
        .iter()
        .map(|bar| bar.high)
        .fold(f64::NEG_INFINITY, f64::max);

    let prior_close = prior_day_last_bar.close;
    if !prior_close.is_finite() || prior_close <= 0.0 {
        return Err(DetectorError::integrity(
            &current.symbol,
            current.dt,
            format!("prior close {} is not a positive price", prior_close),
        ));
    }
    if !current.close.is_finite() {
        return Err(DetectorError::integrity(
            &current.symbol,
            current.dt,
            "close is not a finite price",
        ));
    }

    if current.close != day_high || current.close <= prior_close {
        return Ok(false);
    }

    let ratio = (current.close - prior_close) / prior_close;
    Ok(band_percent.contains(&rounded_gain_percent(ratio)))
}

/// Classify a window produced by [`crate::bar_window::extract_day_bars`].
/// Empty windows and windows without a prior day are never limit-up.
pub fn window_is_limit_up(window: &DayWindow<'_>, band_percent: &[i64]) -> DetectorResult<bool> {
    match window.prior_close_bar {
        Some(prior) if !window.is_empty() => is_limit_up(window.bars, prior, band_percent),
        _ => Ok(false),
    }
}
