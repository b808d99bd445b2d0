//! Step input resolution

use serde_json::Value;
use std::collections::HashMap;

use waypoint_common::{Error, InputValue, Result};

/// Variables available to a run
pub type Inputs = HashMap<String, Value>;

/// Resolve a literal or variable reference to the text handed to a driver.
///
/// String variables are used as-is; other JSON values use their JSON text.
/// An undefined variable is an error, never an empty string.
pub fn resolve_input(input: &InputValue, inputs: &Inputs) -> Result<String> {
    match input {
        InputValue::Literal(literal) => Ok(literal.to_string()),
        InputValue::Variable { var, transform } => {
            let raw = match inputs.get(var) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => return Err(Error::UndefinedVariable(var.clone())),
                Some(other) => other.to_string(),
            };
            Ok(transform.apply(&raw))
        }
    }
}

/// Load run inputs from a JSON object file
pub fn load_inputs(path: &std::path::Path) -> Result<Inputs> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(Error::InvalidWorkflow(format!(
            "inputs file {} must contain a JSON object",
            path.display()
        ))),
    }
}
