use crate::error::{DetectorError, DetectorResult};
use crate::models::Bar;
use std::collections::HashMap;

/// Groups owned bars by symbol. Streams keep arrival order so that
/// out-of-order feeds still fail validation.
pub fn group_bars_by_symbol(bars: Vec<Bar>) -> HashMap<String, Vec<Bar>> {
    let mut grouped: HashMap<String, Vec<Bar>> = HashMap::new();
    for bar in bars {
        grouped.entry(bar.symbol.clone()).or_default().push(bar);
    }
    grouped
}

/// Trims whitespace and uppercases, e.g. ` 600552.sh` -> `600552.SH`.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Every bar must belong to `symbol` and carry a strictly later timestamp than
/// the one before it.
pub fn ensure_strictly_increasing(symbol: &str, bars: &[Bar]) -> DetectorResult<()> {
    if let Some(foreign) = bars.iter().find(|bar| bar.symbol != symbol) {
        return Err(DetectorError::integrity(
            symbol,
            foreign.dt,
            format!("bar for {} in the {} stream", foreign.symbol, symbol),
        ));
    }
    for pair in bars.windows(2) {
        if pair[1].dt <= pair[0].dt {
            return Err(DetectorError::integrity(
                symbol,
                pair[1].dt,
                format!("timestamp does not advance past {}", pair[0].dt),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bar(symbol: &str, minutes: i64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            dt: NaiveDate::from_ymd_opt(2024, 9, 2)
                .unwrap()
                .and_hms_opt(9, 35, 0)
                .unwrap()
                + Duration::minutes(minutes),
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
            volume: 1.0,
            amount: 10.0,
        }
    }

    #[test]
    fn groups_keep_arrival_order() {
        let bars = vec![bar("AAA", 0), bar("ZZZ", 0), bar("AAA", 10), bar("AAA", 5)];

        let grouped = group_bars_by_symbol(bars);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["ZZZ"].len(), 1);
        let aaa = &grouped["AAA"];
        let minutes: Vec<i64> = aaa
            .iter()
            .map(|b| (b.dt - aaa[0].dt).num_minutes())
            .collect();
        assert_eq!(minutes, vec![0, 10, 5]);
        assert!(ensure_strictly_increasing("AAA", aaa).is_err());
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let ok = [bar("AAA", 0), bar("AAA", 5)];
        assert!(ensure_strictly_increasing("AAA", &ok).is_ok());

        let repeated = [bar("AAA", 0), bar("AAA", 5), bar("AAA", 5)];
        assert!(ensure_strictly_increasing("AAA", &repeated).is_err());

        let mixed = [bar("AAA", 0), bar("BBB", 5)];
        assert!(ensure_strictly_increasing("AAA", &mixed).is_err());
    }

    #[test]
    fn normalizes_symbols() {
        assert_eq!(normalize_symbol(" 600552.sh "), Some("600552.SH".to_string()));
        assert_eq!(normalize_symbol("  "), None);
    }
}
