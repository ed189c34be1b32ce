//! Manifest template rendering.

use std::collections::BTreeMap;

use handlebars::Handlebars;

/// Why a manifest could not be turned into a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The template is invalid or references an undefined variable.
    #[error("template error: {0}")]
    Template(String),

    /// The rendered text is not a resource definition.
    #[error("rendered output is not a resource: {0}")]
    Malformed(String),
}

/// Renders manifest templates with an instance's variables.
///
/// Rendering is a pure function of its inputs.
pub trait ManifestRenderer: Send + Sync {
    /// Substitute `vars` into `template`.
    fn render(&self, template: &str, vars: &BTreeMap<String, String>)
        -> Result<String, RenderError>;
}

/// [`ManifestRenderer`] backed by handlebars.
///
/// Runs in strict mode, so a reference to an undefined variable is an error
/// rather than an empty string. Output is not HTML-escaped.
#[derive(Debug)]
pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    /// Create a strict, non-escaping renderer.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestRenderer for HandlebarsRenderer {
    fn render(
        &self,
        template: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, RenderError> {
        self.registry
            .render_template(template, vars)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}
