use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use flynx::{SaveSession, SimProvider, StructureManager, Value};

use crate::common;

#[derive(Serialize)]
struct Report {
    output: String,
    completed: bool,
}

pub fn run(config: &Path, output: &Path, values: Option<&Path>, json: bool) -> Result<()> {
    if !config.is_file() {
        bail!("configuration {} does not exist", config.display());
    }
    if output.exists() {
        bail!("output {} already exists", output.display());
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            bail!("output directory {} does not exist", parent.display());
        }
    }

    let provider = SimProvider::new();
    if let Some(values) = values {
        for (pv_name, value) in common::load_values(values)? {
            provider.set_value(&pv_name, value);
        }
    }

    let mut manager = StructureManager::new();
    let structure = manager
        .get_or_create(config)
        .with_context(|| format!("parse configuration {}", config.display()))?;

    // without a driven trigger the simulated scan reports done at once
    let trigger = structure.trigger();
    if !provider.has_value(&trigger.pv_name) {
        warn!(pv = %trigger.pv_name, done = trigger.done_value,
            "trigger has no simulated value, marking scan done");
        provider.set_value(&trigger.pv_name, Value::Int(trigger.done_value));
    }

    let completed = SaveSession::run(output, config, &mut manager, &provider)
        .with_context(|| format!("save {}", output.display()))?;
    info!(output = %output.display(), completed, "save done");

    if json {
        common::print_json(&Report {
            output: output.display().to_string(),
            completed,
        })?;
    } else {
        println!("{}", output.display());
    }
    Ok(())
}
