use crate::config::DetectorConfig;
use crate::error::DetectorResult;
use crate::models::{Bar, SignalAction};
use crate::signals::{SignalKey, SignalValue};
use crate::state_store::SymbolStateStore;
use anyhow::Result;
use std::collections::HashMap;

/// A per-bar signal evaluated over a symbol's history, last bar first.
pub trait SignalFunction: Send + Sync {
    fn key(&self) -> &SignalKey;
    fn evaluate(&self, symbol: &str, bars: &[Bar]) -> DetectorResult<SignalValue>;
    /// Trade implied when the signal fires.
    fn action_on_fire(&self) -> SignalAction {
        SignalAction::Hold
    }
    /// Bars of history the function reads behind the evaluated bar.
    fn lookback_bars(&self) -> usize;
}

#[path = "strategies/breakout.rs"]
pub mod breakout;

pub use breakout::FluctuateBreakoutSignal;

#[path = "strategies/closing.rs"]
pub mod closing;

pub use closing::{ClosingBuySignal, ClosingSellSignal};

#[path = "strategies/limit_status.rs"]
pub mod limit_status;

pub use limit_status::LimitStatusSignal;

/// Entry and exit halves of the limit-up breakout pattern.
pub const DEFAULT_SIGNAL_FUNCTIONS: [&str; 2] = ["fluctuate_breakout", "closing_sell"];

pub fn create_signal_function(
    template_id: &str,
    parameters: &HashMap<String, f64>,
    base: &DetectorConfig,
    store: &SymbolStateStore,
) -> Result<Box<dyn SignalFunction>> {
    let config = base.with_parameters(parameters);
    config.validate()?;

    match template_id {
        "fluctuate_breakout" => Ok(Box::new(FluctuateBreakoutSignal::new(
            config,
            store.clone(),
        ))),
        "closing_sell" => Ok(Box::new(ClosingSellSignal::new(config, store.clone()))),
        "closing_buy" => Ok(Box::new(ClosingBuySignal::new(config))),
        "limit_status" => Ok(Box::new(LimitStatusSignal::new(&config, parameters))),
        _ => Err(anyhow::anyhow!(
            "Unknown signal function: {}",
            template_id
        )),
    }
}
