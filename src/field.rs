//! Declarative parameter fields for experiments.
//!
//! Experiments declare their tunable parameters as a static table of
//! [`FieldDescriptor`]s (name plus a typed constraint). At run start the
//! engine resolves the descriptor table together with the values supplied by
//! the presentation layer into an immutable [`ResolvedParams`] set. Validation
//! is eager: a wrong type or out-of-range value rejects the run before any
//! side effect occurs, never lazily during `steps`.

use crate::error::{RunError, RunResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// =============================================================================
// Field values
// =============================================================================

/// A concrete parameter value.
///
/// Integer values are accepted where a float is expected; no other implicit
/// conversion is performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value (also used for select-field choices).
    Str(String),
}

impl FieldValue {
    /// Numeric view of the value, promoting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Str(v) => write!(f, "{v}"),
        }
    }
}

// =============================================================================
// Field descriptors
// =============================================================================

/// Typed constraint for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldKind {
    /// Floating-point field with optional inclusive bounds.
    Float {
        /// Default value.
        default: f64,
        /// Minimum allowed value (inclusive).
        min: Option<f64>,
        /// Maximum allowed value (inclusive).
        max: Option<f64>,
    },
    /// Integer field with optional inclusive bounds.
    Int {
        /// Default value.
        default: i64,
        /// Minimum allowed value (inclusive).
        min: Option<i64>,
        /// Maximum allowed value (inclusive).
        max: Option<i64>,
    },
    /// Discrete choice field; the value must match one choice exactly.
    Select {
        /// Valid choices.
        choices: Vec<String>,
        /// Index of the default choice.
        default_index: usize,
    },
    /// Free-text field.
    Str {
        /// Default value.
        default: String,
        /// Whether an empty string is accepted.
        allow_blank: bool,
    },
    /// Boolean field.
    Bool {
        /// Default value.
        default: bool,
    },
}

/// Declarative description of one experiment parameter.
///
/// Immutable after the experiment type is defined; instantiated into a
/// concrete [`FieldValue`] per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Unique field identifier (e.g. `"nplc"`).
    pub name: String,
    /// Typed constraint.
    pub kind: FieldKind,
    /// Human-readable description for UI tooltips.
    pub description: Option<String>,
    /// Physical unit displayed next to the widget (e.g. `"ms"`).
    pub unit: Option<String>,
}

impl FieldDescriptor {
    /// Create a float field with optional bounds.
    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Float {
                default,
                min: None,
                max: None,
            },
            description: None,
            unit: None,
        }
    }

    /// Create an integer field with optional bounds.
    pub fn int(name: impl Into<String>, default: i64) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Int {
                default,
                min: None,
                max: None,
            },
            description: None,
            unit: None,
        }
    }

    /// Create a select field. `default_index` is clamped into the choice list.
    pub fn select(name: impl Into<String>, choices: Vec<String>, default_index: usize) -> Self {
        let default_index = default_index.min(choices.len().saturating_sub(1));
        Self {
            name: name.into(),
            kind: FieldKind::Select {
                choices,
                default_index,
            },
            description: None,
            unit: None,
        }
    }

    /// Create a string field.
    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Str {
                default: default.into(),
                allow_blank: false,
            },
            description: None,
            unit: None,
        }
    }

    /// Create a boolean field.
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Bool { default },
            description: None,
            unit: None,
        }
    }

    /// Set inclusive numeric bounds. Only meaningful for float/int fields.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        match &mut self.kind {
            FieldKind::Float {
                min: lo, max: hi, ..
            } => {
                *lo = Some(min);
                *hi = Some(max);
            }
            FieldKind::Int {
                min: lo, max: hi, ..
            } => {
                *lo = Some(min as i64);
                *hi = Some(max as i64);
            }
            _ => {}
        }
        self
    }

    /// Allow an empty string value. Only meaningful for string fields.
    pub fn allow_blank(mut self) -> Self {
        if let FieldKind::Str { allow_blank, .. } = &mut self.kind {
            *allow_blank = true;
        }
        self
    }

    /// Set the field description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the field unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// The value used when the presentation layer supplies none.
    pub fn default_value(&self) -> FieldValue {
        match &self.kind {
            FieldKind::Float { default, .. } => FieldValue::Float(*default),
            FieldKind::Int { default, .. } => FieldValue::Int(*default),
            FieldKind::Select {
                choices,
                default_index,
            } => FieldValue::Str(choices.get(*default_index).cloned().unwrap_or_default()),
            FieldKind::Str { default, .. } => FieldValue::Str(default.clone()),
            FieldKind::Bool { default } => FieldValue::Bool(*default),
        }
    }

    /// Validate a supplied value against this descriptor.
    pub fn validate(&self, value: &FieldValue) -> RunResult<()> {
        let reject = |reason: String| -> RunResult<()> {
            Err(RunError::Validation {
                field: self.name.clone(),
                reason,
            })
        };

        match &self.kind {
            FieldKind::Float { min, max, .. } => {
                let Some(v) = value.as_f64() else {
                    return reject(format!("expected float, got {}", value.type_name()));
                };
                if let Some(lo) = min {
                    if v < *lo {
                        return reject(format!("{v} is below minimum {lo}"));
                    }
                }
                if let Some(hi) = max {
                    if v > *hi {
                        return reject(format!("{v} is above maximum {hi}"));
                    }
                }
                Ok(())
            }
            FieldKind::Int { min, max, .. } => {
                let Some(v) = value.as_i64() else {
                    return reject(format!("expected int, got {}", value.type_name()));
                };
                if let Some(lo) = min {
                    if v < *lo {
                        return reject(format!("{v} is below minimum {lo}"));
                    }
                }
                if let Some(hi) = max {
                    if v > *hi {
                        return reject(format!("{v} is above maximum {hi}"));
                    }
                }
                Ok(())
            }
            FieldKind::Select { choices, .. } => {
                let Some(v) = value.as_str() else {
                    return reject(format!("expected choice, got {}", value.type_name()));
                };
                if choices.iter().any(|c| c == v) {
                    Ok(())
                } else {
                    reject(format!("'{v}' is not one of {choices:?}"))
                }
            }
            FieldKind::Str { allow_blank, .. } => {
                let Some(v) = value.as_str() else {
                    return reject(format!("expected string, got {}", value.type_name()));
                };
                if v.is_empty() && !allow_blank {
                    reject("value must not be blank".into())
                } else {
                    Ok(())
                }
            }
            FieldKind::Bool { .. } => {
                if value.as_bool().is_some() {
                    Ok(())
                } else {
                    reject(format!("expected bool, got {}", value.type_name()))
                }
            }
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Immutable parameter set for one run: defaults overlaid with the validated
/// values the presentation layer supplied.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedParams {
    values: HashMap<String, FieldValue>,
}

impl ResolvedParams {
    /// Look up a value by field name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Numeric value of a float/int field.
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    /// Integer value of an int field.
    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    /// String value of a string/select field.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Boolean value of a bool field.
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(FieldValue::as_bool)
    }

    /// Iterate over all resolved `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }

    /// Number of resolved fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the experiment declared no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON rendering, used in the run manifest sidecar.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}

/// Resolve a descriptor table against supplied values.
///
/// Every declared field resolves to its default unless a supplied value
/// overrides it; supplied values are validated against their descriptor.
/// Values for names no descriptor declares are ignored with a warning, the
/// same way the GUI layer tolerates stale widget state after an experiment
/// switch.
///
/// # Errors
///
/// Returns [`RunError::Validation`] on the first wrong-typed or out-of-range
/// value.
pub fn resolve(
    fields: &[FieldDescriptor],
    supplied: &HashMap<String, FieldValue>,
) -> RunResult<ResolvedParams> {
    let mut values = HashMap::with_capacity(fields.len());

    for descriptor in fields {
        let value = match supplied.get(&descriptor.name) {
            Some(value) => {
                descriptor.validate(value)?;
                value.clone()
            }
            None => descriptor.default_value(),
        };
        values.insert(descriptor.name.clone(), value);
    }

    for name in supplied.keys() {
        if !values.contains_key(name) {
            warn!(field = %name, "ignoring value for undeclared field");
        }
    }

    Ok(ResolvedParams { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::float("duration", 60.0).with_range(0.0, 3600.0),
            FieldDescriptor::select(
                "range",
                vec!["auto".into(), "1E+3".into(), "1E+6".into()],
                0,
            ),
            FieldDescriptor::int("samples", 10).with_range(1.0, 1000.0),
            FieldDescriptor::boolean("autozero", true),
        ]
    }

    #[test]
    fn defaults_used_when_not_supplied() {
        let params = resolve(&fields(), &HashMap::new()).unwrap();
        assert_eq!(params.f64("duration"), Some(60.0));
        assert_eq!(params.str("range"), Some("auto"));
        assert_eq!(params.i64("samples"), Some(10));
        assert_eq!(params.bool("autozero"), Some(true));
    }

    #[test]
    fn supplied_values_override_defaults() {
        let mut supplied = HashMap::new();
        supplied.insert("duration".to_string(), FieldValue::Float(120.0));
        supplied.insert("range".to_string(), FieldValue::Str("1E+6".into()));
        let params = resolve(&fields(), &supplied).unwrap();
        assert_eq!(params.f64("duration"), Some(120.0));
        assert_eq!(params.str("range"), Some("1E+6"));
    }

    #[test]
    fn out_of_range_value_rejected() {
        let mut supplied = HashMap::new();
        supplied.insert("duration".to_string(), FieldValue::Float(7200.0));
        let err = resolve(&fields(), &supplied).unwrap_err();
        assert!(matches!(err, RunError::Validation { field, .. } if field == "duration"));
    }

    #[test]
    fn wrong_type_rejected() {
        let mut supplied = HashMap::new();
        supplied.insert("samples".to_string(), FieldValue::Str("ten".into()));
        assert!(resolve(&fields(), &supplied).is_err());
    }

    #[test]
    fn invalid_choice_rejected() {
        let mut supplied = HashMap::new();
        supplied.insert("range".to_string(), FieldValue::Str("1E+12".into()));
        assert!(resolve(&fields(), &supplied).is_err());
    }

    #[test]
    fn int_accepted_for_float_field() {
        let mut supplied = HashMap::new();
        supplied.insert("duration".to_string(), FieldValue::Int(30));
        let params = resolve(&fields(), &supplied).unwrap();
        assert_eq!(params.f64("duration"), Some(30.0));
    }

    #[test]
    fn blank_string_policy() {
        let strict = vec![FieldDescriptor::string("label", "run")];
        let mut supplied = HashMap::new();
        supplied.insert("label".to_string(), FieldValue::Str(String::new()));
        assert!(resolve(&strict, &supplied).is_err());

        let lenient = vec![FieldDescriptor::string("label", "run").allow_blank()];
        assert!(resolve(&lenient, &supplied).is_ok());
    }

    #[test]
    fn undeclared_supplied_value_ignored() {
        let mut supplied = HashMap::new();
        supplied.insert("typo".to_string(), FieldValue::Float(1.0));
        let params = resolve(&fields(), &supplied).unwrap();
        assert!(params.get("typo").is_none());
        assert_eq!(params.len(), 4);
    }
}
