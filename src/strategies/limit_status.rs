use crate::config::DetectorConfig;
use crate::error::DetectorResult;
use crate::models::Bar;
use crate::param_utils::get_param_usize;
use crate::signals::{SignalKey, SignalValue};
use std::collections::HashMap;

/// Limit-up / limit-down state of the bar `di` positions back, judged against
/// the bar before it: closing at the high above the previous close is
/// `LimitUp`, closing at the low below it is `LimitDown`.
pub struct LimitStatusSignal {
    key: SignalKey,
    di: usize,
}

impl LimitStatusSignal {
    pub fn new(config: &DetectorConfig, parameters: &HashMap<String, f64>) -> Self {
        let di = get_param_usize(parameters, "di", 1).max(1);
        Self {
            key: SignalKey::new(config.freq_label.clone(), format!("D{}", di), "LimitStatus"),
            di,
        }
    }
}

impl super::SignalFunction for LimitStatusSignal {
    fn key(&self) -> &SignalKey {
        &self.key
    }

    fn evaluate(&self, _symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue> {
        if bars.len() < self.di + 1 {
            return Ok(SignalValue::Other);
        }
        let bar = &bars[bars.len() - self.di];
        let previous = &bars[bars.len() - self.di - 1];

        let value = if bar.close == bar.high && bar.high >= previous.close {
            SignalValue::LimitUp
        } else if bar.close == bar.low && bar.low <= previous.close {
            SignalValue::LimitDown
        } else {
            SignalValue::Other
        };
        Ok(value)
    }

    fn lookback_bars(&self) -> usize {
        self.di + 1
    }
}
