//! App environment update requests
//!
//! Requests are validated and the new env map is computed here, against a
//! snapshot; nothing in this module touches live state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::utils::env_key_prefix;
use crate::common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvOperation {
    Set,
    #[serde(alias = "del")]
    Delete,
    Clear,
}

impl std::fmt::Display for EnvOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvOperation::Set => write!(f, "set"),
            EnvOperation::Delete => write!(f, "del"),
            EnvOperation::Clear => write!(f, "clear"),
        }
    }
}

/// One `update_app_env` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEnvRequest {
    #[serde(default)]
    pub app_name: String,
    pub op: EnvOperation,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub clear_prefix: Option<String>,
}

impl AppEnvRequest {
    pub fn set(app_name: &str, keys: Vec<String>, values: Vec<String>) -> Self {
        Self {
            app_name: app_name.to_string(),
            op: EnvOperation::Set,
            keys,
            values: Some(values),
            clear_prefix: None,
        }
    }

    pub fn delete(app_name: &str, keys: Vec<String>) -> Self {
        Self {
            app_name: app_name.to_string(),
            op: EnvOperation::Delete,
            keys,
            values: None,
            clear_prefix: None,
        }
    }

    pub fn clear(app_name: &str, prefix: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            op: EnvOperation::Clear,
            keys: Vec::new(),
            values: None,
            clear_prefix: Some(prefix.to_string()),
        }
    }

    /// Shape checks, done before any state is looked at.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(crate::Error::MalformedRequest("app name is empty".into()));
        }
        match self.op {
            EnvOperation::Set => {
                let values = self.values.as_deref().unwrap_or_default();
                if self.keys.is_empty() {
                    return Err(crate::Error::MalformedRequest("set without keys".into()));
                }
                if values.len() != self.keys.len() {
                    return Err(crate::Error::MalformedRequest(format!(
                        "{} keys but {} values",
                        self.keys.len(),
                        values.len()
                    )));
                }
                if self.keys.iter().any(String::is_empty) {
                    return Err(crate::Error::MalformedRequest("empty env key".into()));
                }
            }
            EnvOperation::Delete => {
                if self.keys.is_empty() {
                    return Err(crate::Error::MalformedRequest("del without keys".into()));
                }
            }
            EnvOperation::Clear => {}
        }
        Ok(())
    }

    /// Env map after applying this request to `current`.
    pub fn apply(&self, current: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut envs = current.clone();
        match self.op {
            EnvOperation::Set => {
                let values = self.values.as_deref().unwrap_or_default();
                for (key, value) in self.keys.iter().zip(values) {
                    envs.insert(key.clone(), value.clone());
                }
            }
            EnvOperation::Delete => {
                for key in &self.keys {
                    envs.remove(key);
                }
            }
            EnvOperation::Clear => match self.clear_prefix.as_deref() {
                None | Some("") => envs.clear(),
                Some(prefix) => envs.retain(|key, _| env_key_prefix(key) != Some(prefix)),
            },
        }
        envs
    }
}
