use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use flynx::Value;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize JSON output")?;
    println!("{payload}");
    Ok(())
}

/// Load a source-name to value map for the simulator.
pub fn load_values(path: &Path) -> Result<HashMap<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read values file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parse values file {}", path.display()))
}
