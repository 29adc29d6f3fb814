use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::errors::{CampError, ErrorInfo};

fn serde_error(code: &str, err: impl ToString) -> CampError {
    CampError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));
            for (key, mut child) in entries {
                sort_keys(&mut child);
                map.insert(key, child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// JSON tree of `value` with every object's keys in sorted order.
pub(crate) fn canonical_value<T: Serialize>(value: &T) -> Result<Value, CampError> {
    let mut tree = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    sort_keys(&mut tree);
    Ok(tree)
}

/// Compact canonical JSON: sorted keys, no whitespace.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CampError> {
    serde_json::to_vec(&canonical_value(value)?).map_err(|err| serde_error("json_write", err))
}

/// Canonical JSON with two-space indentation and a trailing newline, for files
/// meant to be read by people.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, CampError> {
    let mut bytes = serde_json::to_vec_pretty(&canonical_value(value)?)
        .map_err(|err| serde_error("json_write", err))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, CampError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

/// Serializes a value into YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, CampError> {
    serde_yaml::to_string(value).map_err(|err| serde_error("yaml_serialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, CampError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml_deserialize", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_bytes_sort_nested_keys() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [ {"y": 1, "x": 2} ]});
        let bytes = to_canonical_json_bytes(&value).expect("encode");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }
}
