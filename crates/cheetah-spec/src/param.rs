use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single concrete parameter value.
///
/// Serialized untagged so that `10`, `2.5`, `true` and `"mesh"` read back as the
/// same variant they were written from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Free-form text.
    Text(String),
}

impl Scalar {
    /// False for NaN and infinite floats, which have no JSON encoding.
    pub fn is_finite(&self) -> bool {
        match self {
            Scalar::Float(value) => value.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// How a parameter participates in its sweep group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind<'a> {
    /// Independent value list.
    Discrete,
    /// Zipped together with every other parameter carrying the same label.
    Linked(&'a str),
}

/// Named parameter with its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name referenced by templates as `{name}`.
    pub name: String,
    /// Link label; parameters sharing a label vary together in product groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Ordered candidate values.
    pub values: Vec<Scalar>,
}

impl Parameter {
    /// Creates a discrete parameter.
    pub fn new<V: Into<Scalar>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            name: name.into(),
            link: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks the parameter as linked under `label`.
    pub fn linked(mut self, label: impl Into<String>) -> Self {
        self.link = Some(label.into());
        self
    }

    /// Returns the participation kind of this parameter.
    pub fn kind(&self) -> ParameterKind<'_> {
        match &self.link {
            Some(label) => ParameterKind::Linked(label),
            None => ParameterKind::Discrete,
        }
    }
}

/// Combination rule applied to the parameters of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SweepMode {
    /// Every parameter varies together; value lists must have equal length.
    #[default]
    Zip,
    /// Cartesian product of discrete parameters and link sets.
    Product,
}

/// Ordered set of parameters combined under one [`SweepMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGroup {
    /// Group label used in diagnostics.
    #[serde(default)]
    pub name: String,
    /// Combination rule.
    #[serde(default)]
    pub mode: SweepMode,
    /// Parameters in declaration order.
    pub parameters: Vec<Parameter>,
}

impl SweepGroup {
    /// Group whose parameters are zipped row by row.
    pub fn zip(name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            mode: SweepMode::Zip,
            parameters,
        }
    }

    /// Group whose parameters are combined as a Cartesian product.
    pub fn product(name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            mode: SweepMode::Product,
            parameters,
        }
    }
}

/// Concrete values bound to every swept parameter, in declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunBindings(IndexMap<String, Scalar>);

impl RunBindings {
    /// Empty binding set, used for experiments without sweeps.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub(crate) fn insert(&mut self, name: String, value: Scalar) {
        self.0.insert(name, value);
    }

    /// Looks up a bound value.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    /// Iterates bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every entry of `rule` is bound to an equal value.
    pub fn matches<'a>(&self, rule: impl IntoIterator<Item = (&'a String, &'a Scalar)>) -> bool {
        rule.into_iter()
            .all(|(name, value)| self.0.get(name.as_str()) == Some(value))
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for RunBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_reparse_to_same_variant() {
        let values = vec![
            Scalar::Int(10),
            Scalar::Float(2.5),
            Scalar::Float(2.0),
            Scalar::Bool(true),
            Scalar::Text("mesh".into()),
        ];
        let json = serde_json::to_string(&values).expect("encode");
        let parsed: Vec<Scalar> = serde_json::from_str(&json).expect("decode");
        assert_eq!(parsed, values);
    }

    #[test]
    fn yaml_values_pick_natural_variants() {
        let parsed: Parameter =
            serde_yaml::from_str("name: size\nvalues: [10, 0.5, fast, true]").expect("yaml");
        assert_eq!(
            parsed.values,
            vec![
                Scalar::Int(10),
                Scalar::Float(0.5),
                Scalar::Text("fast".into()),
                Scalar::Bool(true)
            ]
        );
        assert_eq!(parsed.kind(), ParameterKind::Discrete);
    }

    #[test]
    fn bindings_match_exclusion_rules() {
        let bindings: RunBindings = [("size", Scalar::Int(10)), ("mode", Scalar::from("fast"))]
            .into_iter()
            .collect();
        let rule: std::collections::BTreeMap<String, Scalar> =
            [("size".to_string(), Scalar::Int(10))].into_iter().collect();
        assert!(bindings.matches(&rule));
        let other: std::collections::BTreeMap<String, Scalar> =
            [("size".to_string(), Scalar::Int(20))].into_iter().collect();
        assert!(!bindings.matches(&other));
    }
}
