//! Configuration types for sqlrest

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration for the query compiler and schema cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlRestConfig {
    /// Schema cache configuration
    pub cache: CacheConfig,
    /// Query compiler configuration
    pub compiler: CompilerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Schema cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where the serialized snapshot is persisted (default: atomicdata/schema.bin)
    pub snapshot_path: PathBuf,
    /// Persist the snapshot after every successful invalidation
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("atomicdata/schema.bin"),
            persist: true,
        }
    }
}

/// Query compiler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Maximum nesting depth of embedded relations in a select expression
    pub max_embedding_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_embedding_depth: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON formatted log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SqlRestConfig::default();
        assert_eq!(
            config.cache.snapshot_path,
            PathBuf::from("atomicdata/schema.bin")
        );
        assert!(config.cache.persist);
        assert_eq!(config.compiler.max_embedding_depth, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: SqlRestConfig =
            serde_json::from_str(r#"{"compiler": {"max_embedding_depth": 3}}"#).unwrap();
        assert_eq!(parsed.compiler.max_embedding_depth, 3);
        assert!(parsed.cache.persist);
        assert!(!parsed.logging.json);
    }
}
