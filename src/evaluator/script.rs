//! Translation of a script envelope into edits.

use super::EvalError;
use crate::model::{EditParameter, INVALID_CODE};
use serde_json::{Map, Value as JsonValue};

/// Translate a `{success, error, data}` envelope into edits.
///
/// Missing names and values become empty strings and missing codes become
/// [`INVALID_CODE`]; such edits are rejected later, one by one. A value of
/// the wrong type anywhere aborts the whole list.
pub fn edits_from_envelope(envelope: &JsonValue) -> Result<Vec<EditParameter>, EvalError> {
    let envelope = envelope
        .as_object()
        .ok_or_else(|| EvalError::InvalidEnvelope("result is not a map".to_string()))?;

    match envelope.get("success") {
        Some(JsonValue::Bool(true)) => {}
        Some(JsonValue::Bool(false)) => {
            let error = envelope
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(EvalError::ScriptFailed(error));
        }
        _ => {
            return Err(EvalError::InvalidEnvelope(
                "missing success flag".to_string(),
            ))
        }
    }

    let items = match envelope.get("data") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items,
        Some(_) => {
            return Err(EvalError::InvalidEnvelope(
                "main() must return an array".to_string(),
            ))
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let map = item.as_object().ok_or_else(|| EvalError::InvalidEdit {
                index,
                reason: "not a map".to_string(),
            })?;

            Ok(EditParameter {
                name: string_field(map, "name", index)?,
                value: string_field(map, "value", index)?,
                location: code_field(map, "location", index)?,
                action: code_field(map, "action", index)?,
            })
        })
        .collect()
}

fn string_field(
    map: &Map<String, JsonValue>,
    field: &str,
    index: usize,
) -> Result<String, EvalError> {
    match map.get(field) {
        None | Some(JsonValue::Null) => Ok(String::new()),
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(EvalError::InvalidEdit {
            index,
            reason: format!("{} must be a string, got {}", field, other),
        }),
    }
}

fn code_field(map: &Map<String, JsonValue>, field: &str, index: usize) -> Result<i64, EvalError> {
    match map.get(field) {
        None | Some(JsonValue::Null) => Ok(INVALID_CODE),
        Some(value) => value.as_i64().ok_or_else(|| EvalError::InvalidEdit {
            index,
            reason: format!("{} must be an integer, got {}", field, value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_for_missing_fields() {
        let envelope = json!({ "success": true, "error": "", "data": [{ "name": "a" }] });
        let edits = edits_from_envelope(&envelope).unwrap();

        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].name, "a");
        assert_eq!(edits[0].value, "");
        assert_eq!(edits[0].location, INVALID_CODE);
        assert_eq!(edits[0].action, INVALID_CODE);
    }

    #[test]
    fn test_failure_envelope() {
        let envelope = json!({ "success": false, "error": "boom", "data": null });
        match edits_from_envelope(&envelope) {
            Err(EvalError::ScriptFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_null_data_is_empty() {
        let envelope = json!({ "success": true, "error": "", "data": null });
        assert!(edits_from_envelope(&envelope).unwrap().is_empty());
    }

    #[test]
    fn test_shape_errors_abort_list() {
        let not_array = json!({ "success": true, "data": "nope" });
        assert!(matches!(
            edits_from_envelope(&not_array),
            Err(EvalError::InvalidEnvelope(_))
        ));

        let bad_value = json!({ "success": true, "data": [
            { "name": "ok", "value": "1", "location": 0, "action": 1 },
            { "name": "ts", "value": 12345, "location": 0, "action": 1 }
        ]});
        assert!(matches!(
            edits_from_envelope(&bad_value),
            Err(EvalError::InvalidEdit { index: 1, .. })
        ));

        let bad_code = json!({ "success": true, "data": [{ "name": "a", "location": "URL" }] });
        assert!(matches!(
            edits_from_envelope(&bad_code),
            Err(EvalError::InvalidEdit { index: 0, .. })
        ));

        let non_map = json!({ "success": true, "data": [1] });
        assert!(matches!(
            edits_from_envelope(&non_map),
            Err(EvalError::InvalidEdit { index: 0, .. })
        ));
    }
}
