use serde::{Deserialize, Serialize};

/// Engine configuration supplied by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveConfig {
    /// Reserved document field holding the persisted derived-property
    /// snapshot. Must not be used by the application schema.
    pub derived_key: String,
}

impl DeriveConfig {
    pub fn with_derived_key(derived_key: impl Into<String>) -> Self {
        DeriveConfig {
            derived_key: derived_key.into(),
        }
    }
}

impl Default for DeriveConfig {
    fn default() -> Self {
        DeriveConfig {
            derived_key: "_D".to_string(),
        }
    }
}
