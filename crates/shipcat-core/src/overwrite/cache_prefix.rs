//! ConfigMap cache-prefix busting.

use serde::{Deserialize, Serialize};
use serde_yaml_ng::{Mapping, Value};

/// Key in `data` whose value is replaced on every deploy.
pub const CACHE_PREFIX_KEY: &str = "MEMCACHED_PREFIX";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: Mapping,
    #[serde(default)]
    pub data: Mapping,
}

impl ConfigMap {
    /// Overwrite the cache prefix with `stamp` when the key exists.
    /// Returns whether anything changed.
    pub fn bust_cache_prefix(&mut self, stamp: &str) -> bool {
        match self.data.get_mut(CACHE_PREFIX_KEY) {
            Some(value) => {
                *value = Value::String(stamp.to_string());
                true
            }
            None => false,
        }
    }
}
