//! Text templating for engine configuration files
//!
//! Wraps minijinja with the settings every Strata template relies on:
//! strict undefined handling so a missing value fails loudly instead of
//! rendering as an empty string, and block trimming so `{% for %}` loops emit
//! exactly one line per item.

mod engine;
mod error;

pub use engine::{TemplateEngine, NO_VALUE_MARKERS};
pub use error::TemplateError;
