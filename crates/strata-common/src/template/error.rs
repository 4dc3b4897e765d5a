//! Template error types

use std::fmt;

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// Template syntax is invalid
    Syntax(String),
    /// Required variable is undefined
    Undefined(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::Syntax(msg) => write!(f, "template syntax error: {}", msg),
            Self::Undefined(var) => write!(f, "undefined variable: {}", var),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => Self::Syntax(err.to_string()),
            minijinja::ErrorKind::UndefinedError => Self::Undefined(
                err.detail()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            ),
            _ => Self::Render(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TemplateError::Undefined("user.password".to_string());
        assert!(err.to_string().contains("undefined variable"));
        assert!(err.to_string().contains("user.password"));
    }

    #[test]
    fn test_syntax_error_display() {
        let err = TemplateError::Syntax("unclosed block".to_string());
        assert!(err.to_string().contains("syntax error"));
    }
}
