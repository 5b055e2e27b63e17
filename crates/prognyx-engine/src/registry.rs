//! Method Registry.
//!
//! Static catalogue of analysis methods. Built once at startup, then shared
//! read-only behind an `Arc` by every concurrent request.

use std::collections::HashMap;

use prognyx_common::error::ConfigError;
use prognyx_common::method::{default_methods, validate_specs, MethodSpec};
use prognyx_common::EngineConfig;

#[derive(Debug, Clone)]
pub struct MethodRegistry {
    specs: Vec<MethodSpec>,
    index: HashMap<String, usize>,
}

impl MethodRegistry {
    /// Validate and index a set of method specs.
    pub fn new(specs: Vec<MethodSpec>) -> Result<Self, ConfigError> {
        validate_specs(&specs)?;
        Ok(Self::indexed(specs))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config.method_specs())
    }

    fn indexed(specs: Vec<MethodSpec>) -> Self {
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { specs, index }
    }

    pub fn get(&self, method_id: &str) -> Option<&MethodSpec> {
        self.index.get(method_id).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, method_id: &str) -> bool {
        self.index.contains_key(method_id)
    }

    /// Specs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &MethodSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for MethodRegistry {
    /// Built-in registry. The defaults are covered by a validation test.
    fn default() -> Self {
        Self::indexed(default_methods())
    }
}

/// Canonical identity of a method set: sorted, de-duplicated ids joined by `+`.
pub fn signature<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
    ids.sort();
    ids.dedup();
    ids.join("+")
}
