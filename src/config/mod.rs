//! Engine configuration.
//!
//! Loaded from RON or JSON (picked by file extension). Every field has a
//! default so partial files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUDIT_ROLLS, DEFAULT_BASE_SEED, DEFAULT_EVAL_EPSILON, MAX_LOOT_TREE_DEPTH,
};
use crate::error::{ContentError, ContentResult};
use crate::logging::TracingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LootEngineConfig {
    /// Root seed for audits and the CLI
    pub base_seed: u64,
    /// Global scale applied to every table's drop chance
    pub drop_rate_multiplier: f32,
    pub max_loot_tree_depth: u32,
    /// Tolerance used by `Equals` nodes that do not carry their own
    pub eval_epsilon: f32,
    pub audit_rolls: u32,
    pub tracing: TracingConfig,
}

impl Default for LootEngineConfig {
    fn default() -> Self {
        Self {
            base_seed: DEFAULT_BASE_SEED,
            drop_rate_multiplier: 1.0,
            max_loot_tree_depth: MAX_LOOT_TREE_DEPTH,
            eval_epsilon: DEFAULT_EVAL_EPSILON,
            audit_rolls: DEFAULT_AUDIT_ROLLS,
            tracing: TracingConfig::default(),
        }
    }
}

impl LootEngineConfig {
    pub fn from_ron_str(text: &str) -> ContentResult<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> ContentResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> ContentResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => Self::from_ron_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            _ => return Err(ContentError::UnsupportedFormat(path.to_path_buf())),
        };
        tracing::info!(path = %path.display(), "loaded loot engine config");
        Ok(config.sanitized())
    }

    pub fn to_ron(&self) -> ContentResult<String> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    /// Clamp values that would make rolls meaningless
    pub fn sanitized(mut self) -> Self {
        if !self.drop_rate_multiplier.is_finite() || self.drop_rate_multiplier < 0.0 {
            tracing::warn!(
                value = self.drop_rate_multiplier,
                "drop_rate_multiplier out of range, using 1.0"
            );
            self.drop_rate_multiplier = 1.0;
        }
        if self.max_loot_tree_depth == 0 {
            self.max_loot_tree_depth = MAX_LOOT_TREE_DEPTH;
        }
        if self.eval_epsilon.is_nan() || self.eval_epsilon < 0.0 {
            self.eval_epsilon = DEFAULT_EVAL_EPSILON;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LootEngineConfig::default();
        assert_eq!(config.max_loot_tree_depth, 50);
        assert_eq!(config.drop_rate_multiplier, 1.0);
        assert_eq!(config.base_seed, 42);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = LootEngineConfig::from_ron_str("(base_seed: 7, audit_rolls: 10)").unwrap();
        assert_eq!(config.base_seed, 7);
        assert_eq!(config.audit_rolls, 10);
        assert_eq!(config.max_loot_tree_depth, 50);
    }

    #[test]
    fn test_ron_roundtrip() {
        let config = LootEngineConfig {
            base_seed: 99,
            drop_rate_multiplier: 2.5,
            ..Default::default()
        };
        let text = config.to_ron().unwrap();
        let restored = LootEngineConfig::from_ron_str(&text).unwrap();
        assert_eq!(restored.base_seed, 99);
        assert_eq!(restored.drop_rate_multiplier, 2.5);
    }

    #[test]
    fn test_sanitize_negative_multiplier() {
        let config = LootEngineConfig {
            drop_rate_multiplier: -3.0,
            max_loot_tree_depth: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.drop_rate_multiplier, 1.0);
        assert_eq!(config.max_loot_tree_depth, 50);
    }

    #[test]
    fn test_load_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("engine.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, "{{\"base_seed\": 1234}}").unwrap();
        assert_eq!(LootEngineConfig::load(&json_path).unwrap().base_seed, 1234);

        let toml_path = dir.path().join("engine.toml");
        std::fs::write(&toml_path, "base_seed = 1").unwrap();
        assert!(matches!(
            LootEngineConfig::load(&toml_path),
            Err(ContentError::UnsupportedFormat(_))
        ));
    }
}
