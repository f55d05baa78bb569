//! Cached ownership of the active [`Structure`].

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::structure::{ConfigError, Structure};

/// Owns the one active structure and reuses it across saves.
///
/// `get_or_create` returns the active structure whenever one exists, even
/// when asked for a different configuration file; the caller decides
/// staleness and calls [`StructureManager::reset`] to force a re-parse.
#[derive(Default)]
pub struct StructureManager {
    active: Option<Arc<Structure>>,
}

impl StructureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active structure, parsing `config_file` only when none exists.
    pub fn get_or_create(&mut self, config_file: &Path) -> Result<Arc<Structure>, ConfigError> {
        if let Some(active) = &self.active {
            return Ok(Arc::clone(active));
        }
        info!(config = %config_file.display(), "parsing structure configuration");
        let structure = Arc::new(Structure::from_file(config_file)?);
        self.active = Some(Arc::clone(&structure));
        Ok(structure)
    }

    /// Drop the active structure so the next `get_or_create` re-parses.
    pub fn reset(&mut self) {
        self.active = None;
    }

    /// The active structure, if one has been created.
    pub fn active(&self) -> Option<Arc<Structure>> {
        self.active.as_ref().map(Arc::clone)
    }
}
