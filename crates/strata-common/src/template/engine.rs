//! Template engine for configuration-file rendering
//!
//! Uses minijinja with Jinja-default delimiters and:
//! - Strict undefined handling (a missing field is an error, not "")
//! - `trim_blocks` + `lstrip_blocks` so block tags never leave stray lines
//! - Trailing newline preserved so rendered files end with `\n`

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use super::error::TemplateError;

/// Strings a substitution produces when it silently substituted nothing.
///
/// `<nil>` is what Go-style templates emit, `none` is minijinja's rendering of
/// a missing optional and `undefined` its lenient-mode undefined. A rendered
/// file equal to any of these is treated as unusable output.
pub const NO_VALUE_MARKERS: &[&str] = &["<nil>", "none", "undefined"];

/// Template engine for configuration text
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render a named template string with the given context
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if:
    /// - Template syntax is invalid
    /// - A referenced variable is undefined
    /// - A filter operation fails
    pub fn render<S: Serialize>(
        &self,
        name: &str,
        template: &str,
        ctx: S,
    ) -> Result<String, TemplateError> {
        self.env
            .render_named_str(name, template, ctx)
            .map_err(TemplateError::from)
    }

    /// Check that a template parses without rendering it
    pub fn validate_syntax(
        &self,
        name: &'static str,
        template: &'static str,
    ) -> Result<(), TemplateError> {
        self.env
            .template_from_named_str(name, template)
            .map(|_| ())
            .map_err(TemplateError::from)
    }

    /// Whether rendered output is unusable: empty, whitespace only, or a
    /// no-value marker
    pub fn is_no_output(rendered: &str) -> bool {
        let trimmed = rendered.trim();
        trimmed.is_empty() || NO_VALUE_MARKERS.contains(&trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_variable() {
        let engine = TemplateEngine::new();
        let result = engine
            .render("t", "user {{ name }}", json!({ "name": "test" }))
            .expect("simple variable should render successfully");
        assert_eq!(result, "user test");
    }

    #[test]
    fn test_undefined_strict() {
        let engine = TemplateEngine::new();
        let result = engine.render("t", "{{ missing }}", json!({}));
        assert!(matches!(result, Err(TemplateError::Undefined(_))));
    }

    #[test]
    fn test_nested_undefined_strict() {
        let engine = TemplateEngine::new();
        let result = engine.render("t", "{{ user.password }}", json!({ "user": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_loop_emits_one_line_per_item() {
        let engine = TemplateEngine::new();
        let template = "head\n{% for u in users %}\nline {{ u }}\n{% endfor %}\ntail\n";
        let result = engine
            .render("t", template, json!({ "users": ["a", "b"] }))
            .expect("loop should render successfully");
        assert_eq!(result, "head\nline a\nline b\ntail\n");

        let result = engine
            .render("t", template, json!({ "users": [] }))
            .expect("empty loop should render successfully");
        assert_eq!(result, "head\ntail\n");
    }

    #[test]
    fn test_trailing_newline_kept() {
        let engine = TemplateEngine::new();
        let result = engine
            .render("t", "save \"\"\n", json!({}))
            .expect("static template should render");
        assert_eq!(result, "save \"\"\n");
    }

    #[test]
    fn test_syntax_error_detected() {
        let engine = TemplateEngine::new();
        let result = engine.validate_syntax("broken", "{% for u in users %}no end");
        assert!(matches!(result, Err(TemplateError::Syntax(_))));

        assert!(engine.validate_syntax("ok", "{{ a }}").is_ok());
    }

    #[test]
    fn test_no_output_markers() {
        assert!(TemplateEngine::is_no_output(""));
        assert!(TemplateEngine::is_no_output("  \n"));
        assert!(TemplateEngine::is_no_output("<nil>"));
        assert!(TemplateEngine::is_no_output("none\n"));
        assert!(!TemplateEngine::is_no_output("appendonly yes\n"));
    }
}
