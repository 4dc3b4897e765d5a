//! CLI commands

use serde_json::{Map, Value};
use strata_common::engine::ExportedValue;

pub mod deploy;
pub mod plan;
pub mod render_acl;

/// Exports as a JSON object, secret values redacted unless `show_secrets`
pub fn exports_json(exports: &[ExportedValue], show_secrets: bool) -> Value {
    let mut map = Map::new();
    for export in exports {
        map.insert(export.key.clone(), export.display_value(show_secrets));
    }
    Value::Object(map)
}
