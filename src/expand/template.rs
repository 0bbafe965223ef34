// src/expand/template.rs

use serde_json::Value;

use crate::config::commands::CommandSpec;
use crate::expand::LaunchError;

/// Copy `templates`, replacing `placeholder` by `value` in every string field.
pub fn instantiate(
    templates: &[CommandSpec],
    placeholder: &str,
    value: &str,
) -> Result<Vec<CommandSpec>, LaunchError> {
    let mut json = serde_json::to_value(templates)
        .map_err(|e| LaunchError::new(format!("serializing command templates: {e}")))?;
    substitute(&mut json, placeholder, value);
    serde_json::from_value(json)
        .map_err(|e| LaunchError::new(format!("instantiating command templates: {e}")))
}

fn substitute(json: &mut Value, placeholder: &str, value: &str) {
    match json {
        Value::String(s) => {
            if s.contains(placeholder) {
                *s = s.replace(placeholder, value);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute(item, placeholder, value);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, placeholder, value);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
