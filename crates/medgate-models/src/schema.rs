//! Tabular input schema and form-field validation

use medgate_core::{FieldValue, ValidationError};
use std::collections::HashMap;
use std::fmt::Write as _;

/// How a form value is coerced to a number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any finite number
    Numeric,
    /// 0/1, also accepting yes/no, true/false, y/n
    Binary,
}

/// One named input feature
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub name: &'static str,
    /// Alternative form names accepted for this feature
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
}

const fn numeric(name: &'static str, aliases: &'static [&'static str]) -> FeatureSpec {
    FeatureSpec {
        name,
        aliases,
        kind: FieldKind::Numeric,
    }
}

const fn binary(name: &'static str, aliases: &'static [&'static str]) -> FeatureSpec {
    FeatureSpec {
        name,
        aliases,
        kind: FieldKind::Binary,
    }
}

/// UCI heart disease features, in training order
pub const HEART_FEATURES: &[FeatureSpec] = &[
    numeric("age", &[]),
    binary("sex", &[]),
    numeric("cp", &["chest_pain_type", "chest_pain"]),
    numeric("trestbps", &["resting_bp", "resting_blood_pressure"]),
    numeric("chol", &["cholesterol", "serum_cholesterol"]),
    binary("fbs", &["fasting_blood_sugar"]),
    numeric("restecg", &["resting_ecg"]),
    numeric("thalach", &["max_heart_rate"]),
    binary("exang", &["exercise_angina"]),
    numeric("oldpeak", &["st_depression"]),
    numeric("slope", &["st_slope"]),
    numeric("ca", &["major_vessels"]),
    numeric("thal", &["thalassemia"]),
];

/// Fixed set of named numeric fields a tabular model is fed
#[derive(Debug, Clone)]
pub struct TabularSchema {
    features: &'static [FeatureSpec],
}

impl TabularSchema {
    pub const fn new(features: &'static [FeatureSpec]) -> Self {
        Self { features }
    }

    pub const fn heart_disease() -> Self {
        Self::new(HEART_FEATURES)
    }

    pub fn features(&self) -> &[FeatureSpec] {
        self.features
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    /// Validate raw form fields into an ordered feature set.
    ///
    /// Keys are matched case-insensitively against each feature's name and
    /// aliases. Unknown keys are ignored. A blank value counts as missing.
    pub fn validate(
        &self,
        fields: &HashMap<String, FieldValue>,
    ) -> Result<TabularFeatures, ValidationError> {
        let normalized: HashMap<String, &FieldValue> = fields
            .iter()
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v))
            .collect();

        let mut values = Vec::with_capacity(self.features.len());
        for spec in self.features {
            let raw = std::iter::once(spec.name)
                .chain(spec.aliases.iter().copied())
                .find_map(|key| normalized.get(key).copied())
                .ok_or_else(|| ValidationError::MissingField(spec.name.to_string()))?;

            values.push((spec.name, coerce(spec, raw)?));
        }

        Ok(TabularFeatures { values })
    }
}

impl Default for TabularSchema {
    fn default() -> Self {
        Self::heart_disease()
    }
}

fn coerce(spec: &FeatureSpec, raw: &FieldValue) -> Result<f64, ValidationError> {
    let value = match raw {
        FieldValue::Number(n) => *n,
        FieldValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(ValidationError::MissingField(spec.name.to_string()));
            }

            match (spec.kind, parse_flag(text)) {
                (FieldKind::Binary, Some(flag)) => flag,
                _ => text.parse::<f64>().map_err(|_| ValidationError::NotNumeric {
                    field: spec.name.to_string(),
                    value: text.to_string(),
                })?,
            }
        }
    };

    if !value.is_finite() {
        return Err(ValidationError::NonFinite(spec.name.to_string()));
    }
    Ok(value)
}

fn parse_flag(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" => Some(1.0),
        "no" | "n" | "false" => Some(0.0),
        _ => None,
    }
}

/// Validated feature values in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct TabularFeatures {
    values: Vec<(&'static str, f64)>,
}

impl TabularFeatures {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `name=value` pairs joined by `, `, also the canonical digest input
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (idx, (name, value)) in self.values.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}={}", name, value);
        }
        out
    }
}
