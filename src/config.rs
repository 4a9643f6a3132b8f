use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filter::YearPolicy;

/// Engine settings.
///
/// ```json
/// { "listing_year": "first", "feature_year": "last", "log_filter": "info" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Year used by scenario listings when the request names none.
    pub listing_year: YearPolicy,
    /// Year used by single-feature lookups when the request names none.
    pub feature_year: YearPolicy,
    /// `env_logger` filter applied when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            listing_year: YearPolicy::First,
            feature_year: YearPolicy::Last,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Config from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}
