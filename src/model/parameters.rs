use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single launch parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Date(NaiveDate),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Long(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Parameter {
    value: ParameterValue,
    identifying: bool,
}

/// Launch parameters for a job execution.
///
/// Identifying parameters define the job instance identity: two launches with
/// the same job name and identifying parameters belong to the same instance.
/// Non-identifying parameters (restart timestamps, back-references) ride
/// along on the execution without creating a new instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    params: BTreeMap<String, Parameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name.into(), ParameterValue::String(value.into()), true);
        self
    }

    pub fn with_long(mut self, name: impl Into<String>, value: i64) -> Self {
        self.insert(name.into(), ParameterValue::Long(value), true);
        self
    }

    pub fn with_date(mut self, name: impl Into<String>, value: NaiveDate) -> Self {
        self.insert(name.into(), ParameterValue::Date(value), true);
        self
    }

    /// Add a parameter that does not participate in instance identity.
    pub fn with_non_identifying(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.insert(name.into(), value, false);
        self
    }

    fn insert(&mut self, name: String, value: ParameterValue, identifying: bool) {
        self.params.insert(name, Parameter { value, identifying });
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.params.get(name).map(|p| &p.value)
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParameterValue::Long(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParameterValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Stable identity key built from the identifying parameters only.
    /// BTreeMap ordering makes the key deterministic.
    pub fn identity_key(&self) -> String {
        let parts: Vec<String> = self
            .params
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(name, p)| format!("{name}={}", p.value))
            .collect();
        parts.join(",")
    }
}
