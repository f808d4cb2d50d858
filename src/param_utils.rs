use chrono::NaiveTime;
use std::collections::HashMap;

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a session label given as a number (`1455.0` for 14:55).
/// Returns `None` when the key is absent or the value is not a valid `HHMM`.
pub fn get_param_hhmm(params: &HashMap<String, f64>, key: &str) -> Option<NaiveTime> {
    let raw = finite_param(params, key)?;
    if raw < 0.0 || raw.fract() != 0.0 {
        return None;
    }
    hhmm_to_time(raw as u32)
}

pub fn hhmm_to_time(hhmm: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hhmm / 100, hhmm % 100, 0)
}

/// Get a finite parameter value, returns None if not found or not finite
pub fn finite_param(params: &HashMap<String, f64>, key: &str) -> Option<f64> {
    params.get(key).copied().filter(|v| v.is_finite())
}
