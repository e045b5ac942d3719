//! Prompt loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded catalog, and renders the Handlebars-templated ones.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// Override directory (e.g. `.turbowrap/prompts/`)
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader with an optional override directory
    pub fn new(override_dir: Option<impl AsRef<Path>>) -> Self {
        let override_dir = override_dir
            .map(|d| d.as_ref().to_path_buf())
            .filter(|d| d.exists());
        Self {
            hbs: Handlebars::new(),
            override_dir,
        }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            override_dir: None,
        }
    }

    /// Load a raw template by name
    ///
    /// Checks the override directory for `{name}.pmt` first, then the
    /// embedded catalog.
    pub fn load(&self, name: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!("Loading prompt from override: {:?}", path);
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!("Using embedded prompt: {}", name);
            return Ok(content.to_string());
        }

        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Load and render a Handlebars template with the given context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        let template = self.load(name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render prompt '{}': {}", name, e))
    }
}
