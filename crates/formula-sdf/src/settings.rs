use serde::{Deserialize, Serialize};

/// Catalog tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogSettings {
    /// Initial length of the index table (rounded up to a power of two).
    pub initial_capacity: usize,
    /// Placed between a base name and the generated suffix of a residual function.
    pub residual_separator: char,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            residual_separator: '#',
        }
    }
}

/// External function binder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BinderSettings {
    /// Host modules searched for declaring types, in order. The first module that knows a
    /// type name wins.
    pub module_search_order: Vec<String>,
}

impl Default for BinderSettings {
    fn default() -> Self {
        Self {
            module_search_order: vec!["core".to_string(), "system".to_string()],
        }
    }
}

impl CatalogSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl BinderSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
