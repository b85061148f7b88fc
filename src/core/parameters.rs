use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single launch parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}", value),
            ParameterValue::I64(value) => write!(f, "{}", value),
            ParameterValue::F64(value) => write!(f, "{}", value),
            ParameterValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

/// Named key-value set that uniquely identifies a job run.
///
/// Two launches with the same job name and equal parameters address the same
/// execution record in the repository. Keys are kept sorted so the identity
/// string is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    values: BTreeMap<String, ParameterValue>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ParameterValue::I64(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    /// Canonical `key=value` form used as the run identity.
    pub fn identity(&self) -> String {
        let pairs: Vec<String> = self
            .values
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        pairs.join(",")
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.identity())
    }
}

/// Builder for [`JobParameters`].
#[derive(Default)]
pub struct JobParametersBuilder {
    values: BTreeMap<String, ParameterValue>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.values
            .insert(key.to_string(), ParameterValue::String(value.to_string()));
        self
    }

    pub fn i64(mut self, key: &str, value: i64) -> Self {
        self.values
            .insert(key.to_string(), ParameterValue::I64(value));
        self
    }

    pub fn f64(mut self, key: &str, value: f64) -> Self {
        self.values
            .insert(key.to_string(), ParameterValue::F64(value));
        self
    }

    pub fn bool(mut self, key: &str, value: bool) -> Self {
        self.values
            .insert(key.to_string(), ParameterValue::Bool(value));
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            values: self.values,
        }
    }
}

/// Policy that derives the parameters of the next run from the last known
/// parameters, so successive launches get a fresh run identity.
pub trait JobParametersIncrementer {
    fn next(&self, last: Option<&JobParameters>) -> JobParameters;
}

/// Injects an auto-incrementing `run.id` parameter, keeping every other
/// parameter of the previous run.
#[derive(Default)]
pub struct RunIdIncrementer;

impl RunIdIncrementer {
    pub const RUN_ID_KEY: &'static str = "run.id";
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, last: Option<&JobParameters>) -> JobParameters {
        let mut values = last.map(|p| p.values.clone()).unwrap_or_default();
        let next_id = match values.get(Self::RUN_ID_KEY) {
            Some(ParameterValue::I64(id)) => id + 1,
            _ => 1,
        };
        values.insert(Self::RUN_ID_KEY.to_string(), ParameterValue::I64(next_id));
        JobParameters { values }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        JobParameters, JobParametersBuilder, JobParametersIncrementer, RunIdIncrementer,
    };

    #[test]
    fn identity_is_deterministic() {
        let first = JobParametersBuilder::new()
            .string("input", "customer.csv")
            .i64("age", 20)
            .build();
        let second = JobParametersBuilder::new()
            .i64("age", 20)
            .string("input", "customer.csv")
            .build();
        assert_eq!(first.identity(), second.identity());
        assert_eq!(first.identity(), "age=20,input=customer.csv");
    }

    #[test]
    fn run_id_starts_at_one() {
        let incrementer = RunIdIncrementer;
        let params = incrementer.next(None);
        assert_eq!(params.get_i64(RunIdIncrementer::RUN_ID_KEY), Some(1));
    }

    #[test]
    fn run_id_advances_and_keeps_other_parameters() {
        let incrementer = RunIdIncrementer;
        let last = JobParametersBuilder::new()
            .string("input", "customer.csv")
            .i64(RunIdIncrementer::RUN_ID_KEY, 7)
            .build();
        let next = incrementer.next(Some(&last));
        assert_eq!(next.get_i64(RunIdIncrementer::RUN_ID_KEY), Some(8));
        assert_eq!(next.get_string("input"), Some("customer.csv"));
        assert_ne!(next.identity(), last.identity());
    }

    #[test]
    fn empty_parameters_have_empty_identity() {
        assert_eq!(JobParameters::new().identity(), "");
    }
}
