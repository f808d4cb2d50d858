use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data not found at {}. Convert a JSON bar document with `export-market-data` or pass --data-file.",
        path.display()
    ))
}
