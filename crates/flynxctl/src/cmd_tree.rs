use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use flynx::{SpecKind, Structure};

use crate::common;

#[derive(Serialize)]
struct Node<'a> {
    path: &'a str,
    kind: &'static str,
    detail: String,
}

fn kind_name(kind: SpecKind) -> &'static str {
    match kind {
        SpecKind::Group => "group",
        SpecKind::Field => "field",
        SpecKind::Pv => "PV",
        SpecKind::Link => "link",
    }
}

fn detail(structure: &Structure, path: &str, kind: SpecKind) -> String {
    match kind {
        SpecKind::Group => structure
            .group(path)
            .map(|group| group.nx_class.clone())
            .unwrap_or_default(),
        SpecKind::Pv => structure
            .pv(path)
            .map(|pv| pv.pv_name.clone())
            .unwrap_or_default(),
        SpecKind::Field => "static".to_string(),
        SpecKind::Link => structure
            .links()
            .find(|link| link.path == path)
            .map(|link| format!("-> {}", link.source_path))
            .unwrap_or_default(),
    }
}

pub fn run(config: &Path, json: bool) -> Result<()> {
    let structure = Structure::from_file(config)
        .with_context(|| format!("parse configuration {}", config.display()))?;

    let nodes: Vec<Node<'_>> = structure
        .all_paths()
        .into_iter()
        .map(|(path, kind)| Node {
            path,
            kind: kind_name(kind),
            detail: detail(&structure, path, kind),
        })
        .collect();

    if json {
        common::print_json(&nodes)?;
    } else {
        for node in &nodes {
            println!("{:<6} {}  {}", node.kind, node.path, node.detail);
        }
    }
    Ok(())
}
