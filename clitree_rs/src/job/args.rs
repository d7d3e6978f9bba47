//! Argument binding.
//!
//! Callers supply string values keyed by field name. Binding checks each value
//! against its field's [`FieldType`] and fills gaps from field defaults. A value
//! that does not fit its type is an error, never silently coerced.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::duration::{DurationError, parse_duration};
use crate::model::{Field, FieldType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("unknown argument '{name}'")]
    UnknownField { name: String },
    #[error("argument '{name}' expects a number, got '{value}'")]
    InvalidNumber { name: String, value: String },
    #[error("argument '{name}' expects true or false, got '{value}'")]
    InvalidBoolean { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    raw: String,
    value: ArgValue,
}

/// Typed view over a job's arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: HashMap<String, Bound>,
}

/// Bind supplied values against `fields`.
///
/// Missing values fall back to the field default; an empty default leaves
/// Boolean/Number fields unset.
pub fn bind(fields: &[Field], supplied: &HashMap<String, String>) -> Result<BoundArgs, BindError> {
    if let Some(name) = supplied
        .keys()
        .find(|name| !fields.iter().any(|f| &f.name == *name))
    {
        return Err(BindError::UnknownField { name: name.clone() });
    }

    let mut values = HashMap::new();
    for field in fields {
        let raw = supplied
            .get(&field.name)
            .map(String::as_str)
            .unwrap_or(field.default.as_str());
        if let Some(value) = decode(field, raw)? {
            values.insert(
                field.name.clone(),
                Bound {
                    raw: raw.to_string(),
                    value,
                },
            );
        }
    }
    Ok(BoundArgs { values })
}

fn decode(field: &Field, raw: &str) -> Result<Option<ArgValue>, BindError> {
    let trimmed = raw.trim();
    match field.field_type {
        FieldType::Text => Ok(Some(ArgValue::Text(raw.to_string()))),
        FieldType::Boolean if trimmed.is_empty() => Ok(None),
        FieldType::Boolean => parse_bool(trimmed).map(|b| Some(ArgValue::Bool(b))).ok_or_else(
            || BindError::InvalidBoolean {
                name: field.name.clone(),
                value: raw.to_string(),
            },
        ),
        FieldType::Number if trimmed.is_empty() => Ok(None),
        FieldType::Number => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| Some(ArgValue::Number(n)))
            .ok_or_else(|| BindError::InvalidNumber {
                name: field.name.clone(),
                value: raw.to_string(),
            }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name).map(|b| &b.value)
    }

    /// The string the value was decoded from.
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|b| b.raw.as_str())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral numbers only; `2.5` yields `None`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let n = self.get_f64(name)?;
        (n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64).then_some(n as i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ArgValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Decode a Text field as a duration. Empty text is `None`.
    pub fn duration(&self, name: &str) -> Result<Option<Duration>, DurationError> {
        match self.get_str(name).map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_duration(text).map(Some),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: FieldType, default: &str) -> Field {
        Field {
            name: name.into(),
            default: default.into(),
            description: String::new(),
            field_type,
        }
    }

    fn run_fields() -> Vec<Field> {
        vec![
            field("attempts", FieldType::Number, "5"),
            field("debug", FieldType::Boolean, "false"),
            field("price", FieldType::Number, ""),
            field("max-duration", FieldType::Text, "0s"),
        ]
    }

    fn supplied(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_values() {
        let args = bind(&run_fields(), &HashMap::new()).unwrap();
        assert_eq!(args.get_i64("attempts"), Some(5));
        assert_eq!(args.get_bool("debug"), Some(false));
        assert_eq!(args.get_f64("price"), None);
        assert_eq!(args.duration("max-duration").unwrap(), Some(Duration::ZERO));
    }

    #[test]
    fn supplied_values_are_typed() {
        let args = bind(
            &run_fields(),
            &supplied(&[
                ("attempts", "3"),
                ("debug", "TRUE"),
                ("price", "2.5"),
                ("max-duration", "1m"),
            ]),
        )
        .unwrap();
        assert_eq!(args.get_i64("attempts"), Some(3));
        assert_eq!(args.get_bool("debug"), Some(true));
        assert_eq!(args.get_f64("price"), Some(2.5));
        assert_eq!(args.get_i64("price"), None);
        assert_eq!(args.raw("price"), Some("2.5"));
        assert_eq!(
            args.duration("max-duration").unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn type_mismatches_are_errors() {
        let err = bind(&run_fields(), &supplied(&[("attempts", "many")])).unwrap_err();
        assert_eq!(
            err,
            BindError::InvalidNumber {
                name: "attempts".into(),
                value: "many".into()
            }
        );
        let err = bind(&run_fields(), &supplied(&[("debug", "maybe")])).unwrap_err();
        assert!(matches!(err, BindError::InvalidBoolean { .. }));
        let err = bind(&run_fields(), &supplied(&[("price", "NaN")])).unwrap_err();
        assert!(matches!(err, BindError::InvalidNumber { .. }));
    }

    #[test]
    fn undeclared_names_are_rejected() {
        let err = bind(&run_fields(), &supplied(&[("colour", "red")])).unwrap_err();
        assert_eq!(
            err,
            BindError::UnknownField {
                name: "colour".into()
            }
        );
    }

    #[test]
    fn invalid_defaults_surface_as_errors() {
        let fields = vec![field("broken", FieldType::Number, "abc")];
        assert!(bind(&fields, &HashMap::new()).is_err());
    }
}
