use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};
use crate::models::{Bar, GeneratedSignal, SignalAction};
use crate::strategy::SignalFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalValue {
    Yes,
    No,
    LimitUp,
    LimitDown,
    Other,
}

impl SignalValue {
    pub fn from_bool(fired: bool) -> Self {
        if fired {
            SignalValue::Yes
        } else {
            SignalValue::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalValue::Yes => "Yes",
            SignalValue::No => "No",
            SignalValue::LimitUp => "LimitUp",
            SignalValue::LimitDown => "LimitDown",
            SignalValue::Other => "Other",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalValue::No | SignalValue::Other)
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal name in `{freq}_{params}_{name}` form, e.g. `5min_T1455#1500_ClosingSell`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalKey {
    pub freq: String,
    pub params: String,
    pub name: String,
}

impl SignalKey {
    pub fn new(freq: impl Into<String>, params: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            freq: freq.into(),
            params: params.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.freq, self.params, self.name)
    }
}

/// One evaluated signal for one bar of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSignal {
    pub key: String,
    pub value: SignalValue,
    pub dt: NaiveDateTime,
    pub symbol: String,
    pub action: SignalAction,
}

impl NamedSignal {
    pub fn is_actionable(&self) -> bool {
        self.value.is_actionable()
    }

    /// Full signal string as consumed by event matchers, e.g.
    /// `5min_T0935#1500_FluctuateBreakout_Yes_Any_Any_0`.
    pub fn signal_string(&self) -> String {
        format!("{}_{}_Any_Any_0", self.key, self.value)
    }

    /// Builds a `GeneratedSignal` when the value implies a trade.
    pub fn to_generated_signal(&self) -> Option<GeneratedSignal> {
        if !self.is_actionable() || self.action == SignalAction::Hold {
            return None;
        }
        Some(GeneratedSignal {
            dt: self.dt,
            symbol: self.symbol.clone(),
            action: self.action,
            source: self.key.clone(),
        })
    }
}

/// Evaluate `function` on the last bar of `bars` and wrap the result.
pub fn emit_signal(
    function: &dyn SignalFunction,
    symbol: &str,
    bars: &[Bar],
) -> DetectorResult<NamedSignal> {
    let Some(current) = bars.last() else {
        return Err(DetectorError::EmptyHistory(format!(
            "{} evaluated on an empty history for {}",
            function.key(),
            symbol
        )));
    };
    let value = function.evaluate(symbol, bars)?;
    let action = if value.is_actionable() {
        function.action_on_fire()
    } else {
        SignalAction::Hold
    };
    Ok(NamedSignal {
        key: function.key().to_string(),
        value,
        dt: current.dt,
        symbol: symbol.to_string(),
        action,
    })
}
