use std::fmt;

use serde_yaml::{Mapping, Value};

use crate::error::{FormatError, SourceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerScope {
    Repository,
    Environment,
}

impl fmt::Display for LayerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerScope::Repository => write!(f, "repository"),
            LayerScope::Environment => write!(f, "environment"),
        }
    }
}

/// A named document folded on top of chart values.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueOverrideLayer {
    pub name: String,
    pub scope: LayerScope,
    pub document: Mapping,
}

impl ValueOverrideLayer {
    pub fn parse(name: &str, scope: LayerScope, raw: &str) -> Result<Self, FormatError> {
        let document = match serde_yaml::from_str::<Value>(raw)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => return Err(FormatError::NotAMapping),
        };

        Ok(Self {
            name: name.to_string(),
            scope,
            document,
        })
    }

    /// Replaces top-level keys of `values` one at a time. Nested mappings are
    /// swapped wholesale, never merged.
    pub fn apply(&self, values: &mut Value) {
        let Some(target) = values.as_mapping_mut() else {
            log::warn!("Values are not a mapping, skipping {} layer {}", self.scope, self.name);
            return;
        };

        for (key, value) in &self.document {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Turns the outcome of an optional fetch into a layer, logging the fallback once.
pub fn load_layer(
    repository: &str,
    name: &str,
    scope: LayerScope,
    fetched: Result<String, SourceError>,
) -> Option<ValueOverrideLayer> {
    let raw = match fetched {
        Ok(raw) => raw,
        Err(SourceError::NotFound(_)) => {
            log::debug!("No {} override {} for {}", scope, name, repository);
            return None;
        }
        Err(e) => {
            log::warn!("Skipping {} override {} for {}: {}", scope, name, repository, e);
            return None;
        }
    };

    match ValueOverrideLayer::parse(name, scope, &raw) {
        Ok(layer) => {
            log::info!("Applying {} override {} to {}", scope, name, repository);
            Some(layer)
        }
        Err(e) => {
            log::warn!("Ignoring unparsable {} override {} for {}: {}", scope, name, repository, e);
            None
        }
    }
}
