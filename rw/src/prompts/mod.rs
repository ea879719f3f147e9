//! Prompt Template System
//!
//! Template loading chain:
//! 1. `{prompts-dir}/{name}.hbs` (user override)
//! 2. Embedded fallback in code
//!
//! Templates use Handlebars syntax. Output is not HTML-escaped.

pub mod embedded;

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors loading or rendering a template
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template not found: {0}")]
    NotFound(String),

    #[error("Failed to read prompt {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: Box<handlebars::RenderError>,
    },
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory
    override_dir: Option<PathBuf>,
}

impl Default for PromptLoader {
    fn default() -> Self {
        Self::embedded_only()
    }
}

impl PromptLoader {
    /// Create a loader that checks `dir` before falling back to embedded prompts
    pub fn new(dir: Option<&Path>) -> Self {
        debug!(?dir, "PromptLoader::new: called");
        let mut loader = Self::embedded_only();
        loader.override_dir = dir.filter(|d| d.exists()).map(Path::to_path_buf);
        loader
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self {
            hbs,
            override_dir: None,
        }
    }

    /// Load a template by name, preferring the override directory
    fn load_template(&self, name: &str) -> Result<String, PromptError> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.hbs", name));
            if path.exists() {
                debug!(path = %path.display(), "load_template: using override");
                return std::fs::read_to_string(&path).map_err(|source| PromptError::Io { path, source });
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String, PromptError> {
        let template = self.load_template(name)?;
        debug!(%name, template_len = %template.len(), "render: called");
        self.hbs
            .render_template(&template, context)
            .map_err(|source| PromptError::Render {
                name: name.to_string(),
                source: Box::new(source),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_render_embedded_without_escaping() {
        let loader = PromptLoader::embedded_only();
        let ctx = serde_json::json!({
            "iteration": 2,
            "max_iterations": 5,
            "prompt": "emit <html> & friends",
            "completion_phrase": "DONE",
        });

        let out = loader.render("iteration-system", &ctx).unwrap();

        assert!(out.contains("iteration 2 of at most 5"));
        assert!(out.contains("emit <html> & friends"));
        assert!(out.contains("<promise>DONE</promise>"));
    }

    #[test]
    fn test_task_user_sections_are_optional() {
        let loader = PromptLoader::embedded_only();
        let out = loader
            .render("task-user", &serde_json::json!({ "task": "write X" }))
            .unwrap();

        assert!(out.starts_with("write X"));
        assert!(!out.contains("## Progress so far"));
        assert!(!out.contains("[This is iteration"));
    }

    #[test]
    fn test_override_dir_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("mode-system.hbs"), "custom {{who}}").unwrap();
        let loader = PromptLoader::new(Some(dir.path()));

        let out = loader.render("mode-system", &serde_json::json!({ "who": "decider" })).unwrap();
        assert_eq!(out, "custom decider");

        // Names without an override still come from the embedded set
        assert!(loader.render("plan-system", &serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(matches!(
            loader.render("nonexistent-template", &serde_json::json!({})),
            Err(PromptError::NotFound(_))
        ));
    }
}
