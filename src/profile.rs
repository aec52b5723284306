//
// Structured JSON profile patching
//
// Group profiles and participation profiles are opaque JSON blobs mutated
// under a row lock. A patch is merged recursively: object leaves recurse,
// scalar leaves overwrite, and the special leaf shape
// `{"@func": <op>, "@value": <arg>}` applies an arithmetic operator to the
// prior value instead of replacing it. Missing prior values count as 0.
//
use serde_json::{Map, Value};

use crate::error::Error;

const FUNC_KEY: &str = "@func";
const VALUE_KEY: &str = "@value";

/// Applies `patch` to `prior`, returning the updated profile.
pub fn merge(prior: Value, patch: &Value) -> Result<Value, Error> {
    match patch {
        Value::Object(fields) => {
            if let Some(op) = fields.get(FUNC_KEY).and_then(Value::as_str) {
                let arg = fields.get(VALUE_KEY).unwrap_or(&Value::Null);
                return apply_func(op, &prior, arg);
            }

            let mut result = match prior {
                Value::Object(prior_fields) => prior_fields,
                // A non-object prior is discarded wholesale, the patch decides the shape.
                _ => Map::new(),
            };

            for (key, value) in fields {
                let prior_value = result.remove(key).unwrap_or(Value::Null);
                result.insert(key.clone(), merge(prior_value, value)?);
            }

            Ok(Value::Object(result))
        }
        _ => Ok(patch.clone()),
    }
}

fn apply_func(op: &str, prior: &Value, arg: &Value) -> Result<Value, Error> {
    match op {
        "++" => arithmetic(prior, arg, |a, b| a + b, |a, b| a + b),
        "--" => arithmetic(prior, arg, |a, b| a - b, |a, b| a - b),
        unknown => Err(Error::bad_input(format!("Unknown profile operator: '{unknown}'"))),
    }
}

fn arithmetic(
    prior: &Value,
    arg: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    let arg_num = match arg {
        Value::Number(n) => n,
        _ => return Err(Error::bad_input("Profile operator argument is not a number")),
    };

    // Absent (or null) prior values count as zero.
    let prior_num = match prior {
        Value::Null => &serde_json::Number::from(0),
        Value::Number(n) => n,
        _ => return Err(Error::bad_input("Profile operator applied to a non-numeric value")),
    };

    if let (Some(a), Some(b)) = (prior_num.as_i64(), arg_num.as_i64()) {
        return Ok(Value::from(int_op(a, b)));
    }

    match (prior_num.as_f64(), arg_num.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::from(float_op(a, b))),
        _ => Err(Error::bad_input("Profile operator argument is not a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_overwrite() {
        let merged = merge(json!({"a": 1, "b": "x"}), &json!({"b": "y", "c": true})).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": "y", "c": true}));
    }

    #[test]
    fn objects_recurse() {
        let prior = json!({"stats": {"wins": 3, "losses": 1}, "tag": "red"});
        let merged = merge(prior, &json!({"stats": {"wins": 4}})).unwrap();
        assert_eq!(merged, json!({"stats": {"wins": 4, "losses": 1}, "tag": "red"}));
    }

    #[test]
    fn increment_adds_to_prior() {
        let merged = merge(json!({"value": 1}), &json!({"value": {"@func": "++", "@value": 1}})).unwrap();
        assert_eq!(merged, json!({"value": 2}));
    }

    #[test]
    fn decrement_subtracts_from_prior() {
        let merged = merge(json!({"value": 100}), &json!({"value": {"@func": "--", "@value": 1}})).unwrap();
        assert_eq!(merged, json!({"value": 99}));
    }

    #[test]
    fn repeated_increments_accumulate() {
        let mut profile = json!({"value": 1});
        for _ in 0..10 {
            profile = merge(profile, &json!({"value": {"@func": "++", "@value": 1}})).unwrap();
        }
        assert_eq!(profile, json!({"value": 11}));
    }

    #[test]
    fn missing_prior_counts_as_zero() {
        let merged = merge(json!({}), &json!({"counter": {"@func": "++", "@value": 5}})).unwrap();
        assert_eq!(merged, json!({"counter": 5}));
    }

    #[test]
    fn nested_operators_apply() {
        let prior = json!({"stats": {"kills": 7}});
        let merged = merge(prior, &json!({"stats": {"kills": {"@func": "++", "@value": 3}}})).unwrap();
        assert_eq!(merged, json!({"stats": {"kills": 10}}));
    }

    #[test]
    fn float_arithmetic_is_preserved() {
        let merged = merge(json!({"ratio": 1.5}), &json!({"ratio": {"@func": "++", "@value": 0.25}})).unwrap();
        assert_eq!(merged, json!({"ratio": 1.75}));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let err = merge(json!({"value": 1}), &json!({"value": {"@func": "**", "@value": 2}})).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn operator_over_non_number_is_an_error() {
        let err = merge(json!({"value": "seven"}), &json!({"value": {"@func": "++", "@value": 1}})).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn non_object_patch_replaces() {
        let merged = merge(json!({"a": 1}), &json!(42)).unwrap();
        assert_eq!(merged, json!(42));
    }

    #[test]
    fn patch_over_scalar_prior_builds_object() {
        let merged = merge(json!("legacy"), &json!({"a": 1})).unwrap();
        assert_eq!(merged, json!({"a": 1}));
    }
}
