use crate::commands::market_data_snapshot::ensure_market_data_file;
use crate::data_context::MarketData;
use crate::run_status::RunStatus;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(input_path: &Path, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {} from {}",
        output_path.display(),
        input_path.display()
    );
    ensure_market_data_file(input_path)?;

    let status = RunStatus::new();
    let market_data = MarketData::load_from_file(input_path, &status)?;
    info!(
        "Loaded {} bars across {} symbols",
        market_data.bar_count(),
        market_data.symbols().len()
    );

    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );

    Ok(())
}
