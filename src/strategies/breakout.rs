use crate::bar_window::{extract_day_bars, prior_session};
use crate::config::DetectorConfig;
use crate::error::{DetectorError, DetectorResult};
use crate::limit_up::window_is_limit_up;
use crate::models::{Bar, SignalAction, SignalDetailRecord};
use crate::signals::{SignalKey, SignalValue};
use crate::state_store::SymbolStateStore;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Entry half of the limit-up breakout pattern.
///
/// A limit-up close marks the symbol. On a later session open, a gap of at
/// least `min_gap_ratio` above the previous day (above its open when it closed
/// bearish, above its close when it closed bullish) opens a position, provided
/// the mark is no older than `breakout_window_days` calendar days.
pub struct FluctuateBreakoutSignal {
    key: SignalKey,
    config: DetectorConfig,
    band_percent: Vec<i64>,
    store: SymbolStateStore,
}

impl FluctuateBreakoutSignal {
    pub fn new(config: DetectorConfig, store: SymbolStateStore) -> Self {
        let key = SignalKey::new(
            config.freq_label.clone(),
            config.session_label(),
            "FluctuateBreakout",
        );
        Self {
            key,
            band_percent: config.limit_band_percent(),
            config,
            store,
        }
    }

    fn mark_limit_day(&self, symbol: &str, first: &Bar) {
        if self.store.up_limit.set_if_absent(symbol, first.dt) {
            info!("[mark] {} limit-up on {}", symbol, first.date());
        }
    }

    fn advance_mark(&self, symbol: &str, previous: NaiveDateTime, first: &Bar) {
        if self
            .store
            .up_limit
            .replace_if(symbol, first.dt, |mark| *mark == previous)
        {
            debug!(
                "[mark] {} consecutive limit-up, mark moved {} -> {}",
                symbol,
                previous.date(),
                first.date()
            );
        }
    }

    fn breakout_from_mark(
        &self,
        symbol: &str,
        bars: &[Bar],
        mark: NaiveDateTime,
    ) -> DetectorResult<bool> {
        let Some(current) = bars.last() else {
            return Ok(false);
        };
        if current.time() != self.config.session_open {
            return Ok(false);
        }

        let prior = match prior_session(bars, &self.config) {
            Ok(prior) => prior,
            Err(DetectorError::MissingPriorDay { .. }) => {
                debug!("{} at {}: no prior session in history", symbol, current.dt);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let mark_date = mark.date();
        if mark_date >= prior.open_bar.date() {
            return Ok(false);
        }
        // a window end past the calendar's range cannot be exceeded
        let window_end = Duration::try_days(self.config.breakout_window_days)
            .and_then(|span| mark_date.checked_add_signed(span));
        if window_end.is_some_and(|end| current.date() > end) {
            debug!(
                "{} at {}: limit-up mark from {} is outside the breakout window",
                symbol, current.dt, mark_date
            );
            return Ok(false);
        }

        let prior_open = positive_price(current, "prior session open", prior.open_bar.open)?;
        let prior_close = positive_price(current, "prior session close", prior.close_bar.close)?;
        let open = positive_price(current, "session open", current.open)?;

        let reference = match prior_close.partial_cmp(&prior_open) {
            Some(Ordering::Less) => prior_open,
            Some(Ordering::Greater) => prior_close,
            _ => return Ok(false),
        };
        if open <= reference || (open - reference) / reference < self.config.min_gap_ratio {
            return Ok(false);
        }

        if !self.store.holding.set_if_absent(symbol, current.dt) {
            return Ok(false);
        }
        let record = detail_record(symbol, bars, mark, prior_close);
        let open_gain = record.open_gain;
        self.store.details.record(record);
        info!(
            "[buy] {} at {}: gap {:.2}% after limit-up on {}",
            symbol,
            current.dt,
            open_gain * 100.0,
            mark_date
        );
        Ok(true)
    }
}

impl super::SignalFunction for FluctuateBreakoutSignal {
    fn key(&self) -> &SignalKey {
        &self.key
    }

    fn evaluate(&self, symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue> {
        if bars.is_empty() || self.store.holding.get(symbol).is_some() {
            return Ok(SignalValue::No);
        }

        let window = extract_day_bars(bars, &self.config)?;
        let limit_up = window_is_limit_up(&window, &self.band_percent)?;

        let Some(mark) = self.store.up_limit.get(symbol) else {
            if let (true, Some(first)) = (limit_up, window.first()) {
                self.mark_limit_day(symbol, first);
            }
            return Ok(SignalValue::No);
        };

        if limit_up {
            let (Some(first), Some(prior)) = (window.first(), window.prior_close_bar) else {
                return Ok(SignalValue::No);
            };
            match prior.date().cmp(&mark.date()) {
                Ordering::Equal => {
                    self.advance_mark(symbol, mark, first);
                    return Ok(SignalValue::No);
                }
                Ordering::Less => return Ok(SignalValue::No),
                Ordering::Greater => {}
            }
        }

        self.breakout_from_mark(symbol, bars, mark)
            .map(SignalValue::from_bool)
    }

    fn action_on_fire(&self) -> SignalAction {
        SignalAction::Buy
    }

    fn lookback_bars(&self) -> usize {
        self.config.lookback_bars()
    }
}

fn positive_price(current: &Bar, label: &str, value: f64) -> DetectorResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DetectorError::integrity(
            &current.symbol,
            current.dt,
            format!("{} {} is not a positive price", label, value),
        ))
    }
}

/// Turnover and gap figures for an entry on the last bar of `bars`.
fn detail_record(
    symbol: &str,
    bars: &[Bar],
    mark: NaiveDateTime,
    prior_close: f64,
) -> SignalDetailRecord {
    let current = &bars[bars.len() - 1];
    let today = current.date();
    let mark_date = mark.date();

    let mut daily_amount: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for bar in bars[..bars.len() - 1]
        .iter()
        .rev()
        .take_while(|bar| bar.date() > mark_date)
        .filter(|bar| bar.date() < today)
    {
        *daily_amount.entry(bar.date()).or_insert(0.0) += bar.amount;
    }

    let fluctuation_days = daily_amount.len();
    let avg_daily_amount = if fluctuation_days == 0 {
        0.0
    } else {
        daily_amount.values().sum::<f64>() / fluctuation_days as f64
    };

    SignalDetailRecord {
        key: SignalDetailRecord::key_for(today, symbol),
        code: symbol.to_string(),
        avg_daily_amount,
        open_gain: (current.open - prior_close) / prior_close,
        limit_dt: mark,
        fluctuation_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SignalFunction;

    const SYMBOL: &str = "600552.SH";

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
    }

    /// 48 five-minute bars moving in a straight line from `open` to `close`.
    fn session(day: u32, open: f64, close: f64) -> Vec<Bar> {
        let start = date(day).and_hms_opt(9, 35, 0).unwrap();
        let mut previous = open;
        (0..48)
            .map(|i| {
                let offset = if i < 24 { i * 5 } else { 90 + i * 5 };
                let price = if i == 47 {
                    close
                } else {
                    open + (close - open) * (i + 1) as f64 / 48.0
                };
                let bar = Bar {
                    symbol: SYMBOL.to_string(),
                    dt: start + Duration::minutes(offset as i64),
                    open: previous,
                    high: previous.max(price),
                    low: previous.min(price),
                    close: price,
                    volume: 100.0,
                    amount: 1_000.0,
                };
                previous = price;
                bar
            })
            .collect()
    }

    fn stream(days: &[(u32, f64, f64)]) -> Vec<Bar> {
        days.iter()
            .flat_map(|(day, open, close)| session(*day, *open, *close))
            .collect()
    }

    fn replay(function: &FluctuateBreakoutSignal, bars: &[Bar]) -> Vec<NaiveDateTime> {
        (0..bars.len())
            .filter(|&i| function.evaluate(SYMBOL, &bars[..=i]).unwrap() == SignalValue::Yes)
            .map(|i| bars[i].dt)
            .collect()
    }

    fn detector() -> (FluctuateBreakoutSignal, SymbolStateStore) {
        let store = SymbolStateStore::new();
        (
            FluctuateBreakoutSignal::new(DetectorConfig::default(), store.clone()),
            store,
        )
    }

    fn open_of(day: u32) -> NaiveDateTime {
        date(day).and_hms_opt(9, 35, 0).unwrap()
    }

    #[test]
    fn gap_above_bearish_prior_open_enters() {
        let (function, store) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 11.2, 10.8),
            (5, 11.4, 11.5),
        ]);

        assert_eq!(replay(&function, &bars), vec![open_of(5)]);
        assert_eq!(store.holding.get(SYMBOL), Some(open_of(5)));
        assert_eq!(store.up_limit.get(SYMBOL), Some(open_of(3)));

        let record = store.details.get("20240905#600552.SH").unwrap();
        assert_eq!(record.fluctuation_days, 1);
        assert_eq!(record.limit_dt, open_of(3));
        assert!((record.avg_daily_amount - 48_000.0).abs() < 1e-9);
        assert!((record.open_gain - (11.4 - 10.8) / 10.8).abs() < 1e-12);
    }

    #[test]
    fn gap_above_bullish_prior_close_enters() {
        let (function, _) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 10.9, 11.3),
            (5, 11.5, 11.6),
        ]);
        assert_eq!(replay(&function, &bars), vec![open_of(5)]);
    }

    #[test]
    fn small_gap_does_not_enter() {
        let (function, store) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 11.2, 10.8),
            (5, 11.25, 11.3),
        ]);
        assert!(replay(&function, &bars).is_empty());
        assert!(store.holding.get(SYMBOL).is_none());
        assert_eq!(store.up_limit.get(SYMBOL), Some(open_of(3)));
    }

    #[test]
    fn breakout_window_is_inclusive_of_its_last_day() {
        for (breakout_day, expected) in [(23u32, true), (24u32, false)] {
            let (function, store) = detector();
            let mut days = vec![(2, 9.9, 10.0), (3, 10.0, 11.0)];
            days.extend((4..breakout_day).map(|d| (d, 10.9, 10.8)));
            days.push((breakout_day, 11.2, 11.3));
            let fired = replay(&function, &stream(&days));
            assert_eq!(fired == vec![open_of(breakout_day)], expected);
            // a stale mark stays in place
            assert_eq!(store.up_limit.get(SYMBOL), Some(open_of(3)));
        }
    }

    #[test]
    fn window_end_beyond_the_calendar_never_expires() {
        for days in [200_000_000, i64::MAX] {
            let store = SymbolStateStore::new();
            let config = DetectorConfig {
                breakout_window_days: days,
                ..DetectorConfig::default()
            };
            let function = FluctuateBreakoutSignal::new(config, store.clone());
            let bars = stream(&[
                (2, 9.9, 10.0),
                (3, 10.0, 11.0),
                (4, 11.2, 10.8),
                (5, 11.4, 11.5),
            ]);
            assert_eq!(replay(&function, &bars), vec![open_of(5)], "{}", days);
        }
    }

    #[test]
    fn later_non_consecutive_limit_up_keeps_the_original_mark() {
        let (function, store) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 11.0, 11.0),
            (5, 11.0, 12.1),
        ]);
        assert!(replay(&function, &bars).is_empty());
        assert_eq!(store.up_limit.get(SYMBOL), Some(open_of(3)));

        // the breakout check keeps running against the day 3 mark
        let mut bars = bars;
        bars.extend(session(6, 12.4, 12.5));
        let fired: Vec<NaiveDateTime> = (bars.len() - 48..bars.len())
            .filter(|&i| function.evaluate(SYMBOL, &bars[..=i]).unwrap() == SignalValue::Yes)
            .map(|i| bars[i].dt)
            .collect();
        assert_eq!(fired, vec![open_of(6)]);
        let record = store.details.get("20240906#600552.SH").unwrap();
        assert_eq!(record.limit_dt, open_of(3));
    }

    #[test]
    fn consecutive_limit_ups_move_the_mark_forward() {
        let (function, store) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 11.0, 12.1),
            (5, 12.4, 12.5),
        ]);
        // a gap on the day right after the newest mark is not a breakout
        assert!(replay(&function, &bars).is_empty());
        assert_eq!(store.up_limit.get(SYMBOL), Some(open_of(4)));
    }

    #[test]
    fn open_position_suppresses_further_entries() {
        let (function, store) = detector();
        let bars = stream(&[
            (2, 9.9, 10.0),
            (3, 10.0, 11.0),
            (4, 11.2, 10.8),
            (5, 11.4, 11.2),
            (6, 11.5, 11.6),
        ]);
        assert_eq!(replay(&function, &bars), vec![open_of(5)]);
        assert_eq!(store.details.len(), 1);
    }

    #[test]
    fn non_positive_prior_open_is_an_integrity_error() {
        let (function, store) = detector();
        store.up_limit.set(SYMBOL, open_of(3));
        let mut bars = stream(&[(3, 10.0, 11.0), (4, 11.2, 10.8), (5, 11.4, 11.5)]);
        bars[48].open = 0.0;
        let err = function.evaluate(SYMBOL, &bars[..=96]).unwrap_err();
        assert!(matches!(err, DetectorError::DataIntegrity { .. }));
    }
}
