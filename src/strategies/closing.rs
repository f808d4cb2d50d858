use crate::bar_window::extract_day_bars;
use crate::config::{DetectorConfig, TimeWindow};
use crate::error::DetectorResult;
use crate::limit_up::window_is_limit_up;
use crate::models::{Bar, SignalAction};
use crate::signals::{SignalKey, SignalValue};
use crate::state_store::SymbolStateStore;
use log::info;

/// Exit half of the limit-up breakout pattern: releases a position inside the
/// close-of-day window on any day after the entry day.
pub struct ClosingSellSignal {
    key: SignalKey,
    config: DetectorConfig,
    band_percent: Vec<i64>,
    store: SymbolStateStore,
}

impl ClosingSellSignal {
    pub fn new(config: DetectorConfig, store: SymbolStateStore) -> Self {
        let key = SignalKey::new(
            config.freq_label.clone(),
            config.sell_window.label(),
            "ClosingSell",
        );
        Self {
            key,
            band_percent: config.limit_band_percent(),
            config,
            store,
        }
    }
}

impl super::SignalFunction for ClosingSellSignal {
    fn key(&self) -> &SignalKey {
        &self.key
    }

    fn evaluate(&self, symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue> {
        let Some(current) = bars.last() else {
            return Ok(SignalValue::No);
        };
        if !self.config.sell_window.contains_left_open(current.time()) {
            return Ok(SignalValue::No);
        }

        // Classify before touching state so an integrity error leaves the position intact.
        let window = extract_day_bars(bars, &self.config)?;
        let limit_up = window_is_limit_up(&window, &self.band_percent)?;

        let today = current.date();
        let Some(entry) = self
            .store
            .holding
            .clear_if(symbol, |entry| today > entry.date())
        else {
            return Ok(SignalValue::No);
        };
        self.store.up_limit.clear(symbol);
        info!(
            "[sell] {} at {}: released position opened {}",
            symbol, current.dt, entry
        );

        if let (true, Some(first)) = (limit_up, window.first()) {
            self.store.up_limit.set(symbol, first.dt);
            info!("[mark] {} limit-up on exit day {}", symbol, today);
        }
        Ok(SignalValue::Yes)
    }

    fn action_on_fire(&self) -> SignalAction {
        SignalAction::Sell
    }

    fn lookback_bars(&self) -> usize {
        self.config.bars_per_day + 1
    }
}

/// Fires on every bar inside the late-session buy window.
pub struct ClosingBuySignal {
    key: SignalKey,
    window: TimeWindow,
}

impl ClosingBuySignal {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            key: SignalKey::new(
                config.freq_label.clone(),
                config.buy_window.label(),
                "ClosingBuy",
            ),
            window: config.buy_window,
        }
    }
}

impl super::SignalFunction for ClosingBuySignal {
    fn key(&self) -> &SignalKey {
        &self.key
    }

    fn evaluate(&self, _symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue> {
        Ok(SignalValue::from_bool(bars.last().map_or(false, |bar| {
            self.window.contains_right_open(bar.time())
        })))
    }

    fn lookback_bars(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SignalFunction;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    const SYMBOL: &str = "300750.SZ";

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn flat_day(day: u32, price: f64, last_close: f64) -> Vec<Bar> {
        (0..48)
            .map(|i| {
                let offset = if i < 24 { i * 5 } else { 90 + i * 5 };
                let close = if i == 47 { last_close } else { price };
                Bar {
                    symbol: SYMBOL.to_string(),
                    dt: at(day, 9, 35) + Duration::minutes(offset),
                    open: price,
                    high: price.max(close),
                    low: price.min(close),
                    close,
                    volume: 10.0,
                    amount: 10.0 * close,
                }
            })
            .collect()
    }

    fn sell_fires(function: &ClosingSellSignal, bars: &[Bar]) -> Vec<NaiveDateTime> {
        (0..bars.len())
            .filter(|&i| function.evaluate(SYMBOL, &bars[..=i]).unwrap() == SignalValue::Yes)
            .map(|i| bars[i].dt)
            .collect()
    }

    #[test]
    fn sell_waits_for_a_later_day_and_clears_both_registries() {
        let store = SymbolStateStore::new();
        let function = ClosingSellSignal::new(DetectorConfig::default(), store.clone());
        store.holding.set(SYMBOL, at(5, 9, 35));
        store.up_limit.set(SYMBOL, at(3, 9, 35));

        let mut bars = flat_day(5, 11.0, 11.0);
        assert!(sell_fires(&function, &bars).is_empty());
        assert_eq!(store.holding.get(SYMBOL), Some(at(5, 9, 35)));

        bars.extend(flat_day(6, 11.0, 10.9));
        assert_eq!(sell_fires(&function, &bars[48..]), vec![at(6, 15, 0)]);
        assert!(store.holding.get(SYMBOL).is_none());
        assert!(store.up_limit.get(SYMBOL).is_none());
    }

    #[test]
    fn limit_up_exit_day_is_marked_again() {
        let store = SymbolStateStore::new();
        let function = ClosingSellSignal::new(DetectorConfig::default(), store.clone());
        store.holding.set(SYMBOL, at(5, 9, 35));
        store.up_limit.set(SYMBOL, at(3, 9, 35));

        let mut bars = flat_day(5, 10.0, 10.0);
        bars.extend(flat_day(6, 10.0, 11.0));
        assert_eq!(
            function.evaluate(SYMBOL, &bars).unwrap(),
            SignalValue::Yes
        );
        assert!(store.holding.get(SYMBOL).is_none());
        assert_eq!(store.up_limit.get(SYMBOL), Some(at(6, 9, 35)));
    }

    #[test]
    fn sell_window_is_open_at_its_start() {
        let store = SymbolStateStore::new();
        let function = ClosingSellSignal::new(DetectorConfig::default(), store.clone());
        store.holding.set(SYMBOL, at(5, 9, 35));

        let bars = flat_day(6, 11.0, 11.0);
        let at_1455 = bars.iter().position(|bar| bar.dt == at(6, 14, 55)).unwrap();
        assert_eq!(
            function.evaluate(SYMBOL, &bars[..=at_1455]).unwrap(),
            SignalValue::No
        );
        assert_eq!(
            function.evaluate(SYMBOL, &bars[..=at_1455 + 1]).unwrap(),
            SignalValue::Yes
        );
    }

    #[test]
    fn no_position_means_no_sell() {
        let store = SymbolStateStore::new();
        let function = ClosingSellSignal::new(DetectorConfig::default(), store.clone());
        store.up_limit.set(SYMBOL, at(3, 9, 35));
        assert!(sell_fires(&function, &flat_day(6, 11.0, 11.0)).is_empty());
        assert_eq!(store.up_limit.get(SYMBOL), Some(at(3, 9, 35)));
    }

    #[test]
    fn buy_window_is_right_open() {
        let function = ClosingBuySignal::new(DetectorConfig::default());
        let bars = flat_day(6, 11.0, 11.0);
        let fired: Vec<NaiveDateTime> = bars
            .iter()
            .enumerate()
            .filter(|(i, _)| function.evaluate(SYMBOL, &bars[..=*i]).unwrap() == SignalValue::Yes)
            .map(|(_, bar)| bar.dt)
            .collect();
        assert_eq!(fired, vec![at(6, 14, 45)]);
        assert_eq!(function.key().to_string(), "5min_T1445#1450_ClosingBuy");
    }
}
