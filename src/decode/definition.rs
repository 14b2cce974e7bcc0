//! Static decoder descriptions: channel roles, options and annotation classes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a decoder consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Raw logic channels of the capture window
    Logic,
    /// Annotations of the decoder directly below in the stack
    Annotations,
}

/// A channel role such as `clk` or `rxtx`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
}

/// Allowed values of an option
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValues {
    Any,
    Choices(&'static [&'static str]),
    /// Inclusive integer range
    Range(i64, i64),
    Steps(&'static [f64]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDefault {
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl OptionDefault {
    fn value(self) -> OptionValue {
        match self {
            OptionDefault::Int(v) => OptionValue::Int(v),
            OptionDefault::Float(v) => OptionValue::Float(v),
            OptionDefault::Str(v) => OptionValue::Str(v.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionSpec {
    pub id: &'static str,
    pub desc: &'static str,
    pub default: OptionDefault,
    pub values: OptionValues,
}

/// An option value as written in session files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::Str(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationClass {
    pub id: &'static str,
    pub desc: &'static str,
}

/// Display row grouping annotation classes by index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRow {
    pub id: &'static str,
    pub desc: &'static str,
    pub classes: &'static [usize],
}

/// Everything the stack needs to know about a decoder before creating it
#[derive(Debug)]
pub struct DecoderDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub longname: &'static str,
    pub desc: &'static str,
    pub input: InputKind,
    pub channels: &'static [ChannelSpec],
    pub optional_channels: &'static [ChannelSpec],
    pub options: &'static [OptionSpec],
    pub annotations: &'static [AnnotationClass],
    pub rows: &'static [AnnotationRow],
}

impl DecoderDefinition {
    /// Required or optional channel role with this id
    pub fn channel_role(&self, id: &str) -> Option<&'static ChannelSpec> {
        self.channels
            .iter()
            .chain(self.optional_channels.iter())
            .find(|c| c.id == id)
    }

    pub fn class_index(&self, class: &str) -> Option<usize> {
        self.annotations.iter().position(|a| a.id == class)
    }

    /// Row an annotation class is shown on. Classes outside every declared
    /// row get a row of their own after the declared ones.
    pub fn row_of(&self, class_index: usize) -> usize {
        self.rows
            .iter()
            .position(|row| row.classes.contains(&class_index))
            .unwrap_or(self.rows.len() + class_index)
    }

    /// Merge `given` over the option defaults, rejecting unknown keys,
    /// wrong types and values outside the allowed set.
    pub fn resolve_options(&self, given: &BTreeMap<String, OptionValue>) -> Result<DecoderOptions, String> {
        if let Some(unknown) = given.keys().find(|k| !self.options.iter().any(|o| o.id == k.as_str())) {
            return Err(format!("unknown option '{}'", unknown));
        }

        let mut values = BTreeMap::new();
        for spec in self.options {
            let value = match given.get(spec.id) {
                Some(value) => check_option(spec, value)?,
                None => spec.default.value(),
            };
            values.insert(spec.id, value);
        }
        Ok(DecoderOptions { values })
    }
}

fn check_option(spec: &OptionSpec, value: &OptionValue) -> Result<OptionValue, String> {
    let coerced = match (spec.default, value) {
        (OptionDefault::Int(_), OptionValue::Int(v)) => OptionValue::Int(*v),
        (OptionDefault::Int(_), OptionValue::Float(v)) if v.fract() == 0.0 => OptionValue::Int(*v as i64),
        (OptionDefault::Float(_), OptionValue::Int(v)) => OptionValue::Float(*v as f64),
        (OptionDefault::Float(_), OptionValue::Float(v)) => OptionValue::Float(*v),
        (OptionDefault::Str(_), OptionValue::Str(v)) => OptionValue::Str(v.clone()),
        _ => return Err(format!("option '{}' has the wrong type: {}", spec.id, value)),
    };

    let allowed = match (&spec.values, &coerced) {
        (OptionValues::Any, _) => true,
        (OptionValues::Choices(choices), OptionValue::Str(v)) => choices.contains(&v.as_str()),
        (OptionValues::Range(min, max), OptionValue::Int(v)) => (*min..=*max).contains(v),
        (OptionValues::Steps(steps), OptionValue::Float(v)) => steps.iter().any(|s| (s - v).abs() < 1e-9),
        _ => false,
    };
    if !allowed {
        return Err(format!("option '{}' does not allow {}", spec.id, value));
    }
    Ok(coerced)
}

/// Resolved option set of one decoder instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecoderOptions {
    values: BTreeMap<&'static str, OptionValue>,
}

impl DecoderOptions {
    pub fn get(&self, id: &str) -> Option<&OptionValue> {
        self.values.get(id)
    }

    pub fn int(&self, id: &str) -> i64 {
        match self.values.get(id) {
            Some(OptionValue::Int(v)) => *v,
            Some(OptionValue::Float(v)) => *v as i64,
            _ => 0,
        }
    }

    pub fn float(&self, id: &str) -> f64 {
        match self.values.get(id) {
            Some(OptionValue::Int(v)) => *v as f64,
            Some(OptionValue::Float(v)) => *v,
            _ => 0.0,
        }
    }

    pub fn str(&self, id: &str) -> &str {
        match self.values.get(id) {
            Some(OptionValue::Str(v)) => v,
            _ => "",
        }
    }

    /// `yes`/`no` option
    pub fn flag(&self, id: &str) -> bool {
        self.str(id) == "yes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DEF: DecoderDefinition = DecoderDefinition {
        id: "probe",
        name: "Probe",
        longname: "Test probe",
        desc: "Options test",
        input: InputKind::Logic,
        channels: &[ChannelSpec { id: "d", name: "D", desc: "Data" }],
        optional_channels: &[ChannelSpec { id: "en", name: "EN", desc: "Enable" }],
        options: &[
            OptionSpec {
                id: "bits",
                desc: "Bits",
                default: OptionDefault::Int(8),
                values: OptionValues::Range(4, 16),
            },
            OptionSpec {
                id: "stop",
                desc: "Stop bits",
                default: OptionDefault::Float(1.0),
                values: OptionValues::Steps(&[1.0, 1.5, 2.0]),
            },
            OptionSpec {
                id: "format",
                desc: "Format",
                default: OptionDefault::Str("hex"),
                values: OptionValues::Choices(&["hex", "dec"]),
            },
        ],
        annotations: &[
            AnnotationClass { id: "data", desc: "Data" },
            AnnotationClass { id: "warn", desc: "Warnings" },
            AnnotationClass { id: "extra", desc: "Extra" },
        ],
        rows: &[
            AnnotationRow { id: "data", desc: "Data", classes: &[0] },
            AnnotationRow { id: "warnings", desc: "Warnings", classes: &[1] },
        ],
    };

    fn given(pairs: &[(&str, OptionValue)]) -> BTreeMap<String, OptionValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_defaults_fill_missing_options() {
        let options = DEF.resolve_options(&BTreeMap::new()).unwrap();
        assert_eq!(options.int("bits"), 8);
        assert_eq!(options.float("stop"), 1.0);
        assert_eq!(options.str("format"), "hex");
    }

    #[test]
    fn test_given_values_are_checked() {
        let options = DEF
            .resolve_options(&given(&[("bits", 12.into()), ("stop", 2.into())]))
            .unwrap();
        assert_eq!(options.int("bits"), 12);
        assert_eq!(options.get("stop"), Some(&OptionValue::Float(2.0)));

        assert!(DEF.resolve_options(&given(&[("bits", 3.into())])).is_err());
        assert!(DEF.resolve_options(&given(&[("stop", 1.25.into())])).is_err());
        assert!(DEF.resolve_options(&given(&[("format", "oct".into())])).is_err());
        assert!(DEF.resolve_options(&given(&[("format", 1.into())])).is_err());
        assert!(DEF.resolve_options(&given(&[("baud", 1.into())])).is_err());
    }

    #[test]
    fn test_rows_and_roles() {
        assert_eq!(DEF.row_of(0), 0);
        assert_eq!(DEF.row_of(1), 1);
        assert_eq!(DEF.row_of(2), 4);
        assert!(DEF.channel_role("en").is_some());
        assert!(DEF.channel_role("clk").is_none());
    }

    #[test]
    fn test_option_value_json() {
        let parsed: BTreeMap<String, OptionValue> =
            serde_json::from_str(r#"{"baudrate": 9600, "stop": 1.5, "format": "ascii"}"#).unwrap();
        assert_eq!(parsed["baudrate"], OptionValue::Int(9600));
        assert_eq!(parsed["stop"], OptionValue::Float(1.5));
        assert_eq!(parsed["format"], OptionValue::Str("ascii".into()));
    }
}
