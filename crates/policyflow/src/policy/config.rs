//! Typed access to a job's JSON configuration blob.

use serde_json::{Map, Value};

use crate::error::{PolicyError, Result};
use crate::time::Lag;

pub(crate) struct PolicyConfig<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> PolicyConfig<'a> {
    pub(crate) fn new(config: Option<&'a Value>) -> Result<Self> {
        match config {
            Some(Value::Object(fields)) => Ok(Self { fields }),
            Some(_) => Err(PolicyError::config("policy configuration must be a JSON object")),
            None => Err(PolicyError::config("policy configuration is missing")),
        }
    }

    fn missing(key: &str) -> PolicyError {
        PolicyError::config(format!("could not find \"{key}\" in config for job"))
    }

    pub(crate) fn get_i32(&self, key: &str) -> Result<i32> {
        let value = self.fields.get(key).ok_or_else(|| Self::missing(key))?;
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| PolicyError::config(format!("\"{key}\" must be a 32-bit integer")))
    }

    pub(crate) fn get_str(&self, key: &str) -> Result<&'a str> {
        let value = self.fields.get(key).ok_or_else(|| Self::missing(key))?;
        value
            .as_str()
            .ok_or_else(|| PolicyError::config(format!("\"{key}\" must be a string")))
    }

    pub(crate) fn get_lag(&self, key: &str) -> Result<Lag> {
        self.get_optional_lag(key)?.ok_or_else(|| Self::missing(key))
    }

    /// Missing and `null` both mean "unbounded".
    pub(crate) fn get_optional_lag(&self, key: &str) -> Result<Option<Lag>> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Lag::from_json(key, v).map(Some),
        }
    }
}
