use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use flynx::{Document, Schema};

use crate::common;

#[derive(Serialize)]
struct Report<'a> {
    config: String,
    valid: bool,
    violations: Vec<Violation<'a>>,
}

#[derive(Serialize)]
struct Violation<'a> {
    path: &'a str,
    message: &'a str,
}

pub fn run(config: &Path, json: bool) -> Result<()> {
    let doc = Document::from_file(config)
        .with_context(|| format!("load configuration {}", config.display()))?;
    let schema = Schema::packaged().context("load packaged schema")?;
    let violations = schema.validate(&doc);

    if json {
        let report = Report {
            config: config.display().to_string(),
            valid: violations.is_empty(),
            violations: violations
                .iter()
                .map(|v| Violation {
                    path: &v.path,
                    message: &v.message,
                })
                .collect(),
        };
        common::print_json(&report)?;
    } else {
        for violation in &violations {
            println!("{violation}");
        }
    }

    if !violations.is_empty() {
        bail!(
            "{} failed validation with {} violation(s)",
            config.display(),
            violations.len()
        );
    }
    info!(config = %config.display(), "configuration is valid");
    Ok(())
}
