//! Configuration schema for a masking engine.
//!
//! The structures deserialize with serde so embedding applications can read
//! them from whatever source they already use.

use crate::detect::PhoneRegion;
use crate::token::is_valid_type_tag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a [`Cloak`](crate::Cloak) engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloakConfig {
    /// Token store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Encryption at rest.
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Default detector set.
    #[serde(default)]
    pub detectors: DetectorConfig,

    /// Timeout for each store call in milliseconds (none = wait forever).
    #[serde(default)]
    pub store_timeout_ms: Option<u64>,
}

/// Token store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (single process, lost on exit).
    Memory {
        /// TTL for tokens in seconds (none = never expire).
        #[serde(default)]
        ttl_seconds: Option<u64>,
        /// Maximum live entries.
        #[serde(default = "default_max_entries")]
        max_entries: usize,
    },
    /// JSON file store (survives restarts).
    File {
        /// Location of the token file.
        path: PathBuf,
        /// TTL for tokens in seconds (none = never expire).
        #[serde(default)]
        ttl_seconds: Option<u64>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            ttl_seconds: None,
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    100_000
}

/// Encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Master key (hex encoded, 32 bytes for AES-256).
    /// Should be loaded from environment or secrets manager.
    #[serde(default)]
    pub key: Option<String>,
    /// Key environment variable name.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_env: default_key_env(),
        }
    }
}

fn default_key_env() -> String {
    "CLOAK_ENCRYPTION_KEY".to_string()
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Enable built-in detectors.
    #[serde(default)]
    pub builtins: BuiltinDetectors,
    /// Numbering regions accepted by the phone detector.
    #[serde(default = "default_phone_regions")]
    pub phone_regions: Vec<String>,
    /// Custom patterns, run after the built-ins.
    #[serde(default)]
    pub custom: Vec<CustomPattern>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            builtins: BuiltinDetectors::default(),
            phone_regions: default_phone_regions(),
            custom: Vec::new(),
        }
    }
}

fn default_phone_regions() -> Vec<String> {
    vec!["US".to_string()]
}

/// Built-in detector toggles. All enabled unless switched off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDetectors {
    #[serde(default = "default_true")]
    pub email: bool,
    #[serde(default = "default_true")]
    pub phone: bool,
    #[serde(default = "default_true")]
    pub national_id: bool,
    #[serde(default = "default_true")]
    pub credit_card: bool,
}

impl Default for BuiltinDetectors {
    fn default() -> Self {
        Self {
            email: true,
            phone: true,
            national_id: true,
            credit_card: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Custom pattern definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPattern {
    /// Pattern name, for diagnostics.
    pub name: String,
    /// Tag embedded in tokens, e.g. `EMPLOYEE_ID`.
    pub type_tag: String,
    /// Regex pattern.
    pub regex: String,
}

/// Validate configuration.
pub fn validate_config(config: &CloakConfig) -> Result<(), String> {
    match &config.store {
        StoreConfig::Memory {
            ttl_seconds,
            max_entries,
        } => {
            if *ttl_seconds == Some(0) {
                return Err("store: ttl_seconds must be positive".to_string());
            }
            if *max_entries == 0 {
                return Err("store: max_entries must be positive".to_string());
            }
        }
        StoreConfig::File { path, ttl_seconds } => {
            if path.as_os_str().is_empty() {
                return Err("store: file path cannot be empty".to_string());
            }
            if *ttl_seconds == Some(0) {
                return Err("store: ttl_seconds must be positive".to_string());
            }
        }
    }

    if config.store_timeout_ms == Some(0) {
        return Err("store_timeout_ms must be positive".to_string());
    }

    // Validate phone regions
    for region in &config.detectors.phone_regions {
        if region.parse::<PhoneRegion>().is_err() {
            return Err(format!("unsupported phone region '{}'", region));
        }
    }
    if config.detectors.builtins.phone && config.detectors.phone_regions.is_empty() {
        return Err("phone detector enabled without phone_regions".to_string());
    }

    // Validate custom patterns
    for pattern in &config.detectors.custom {
        if pattern.name.is_empty() {
            return Err("custom pattern: name cannot be empty".to_string());
        }
        if !is_valid_type_tag(&pattern.type_tag) {
            return Err(format!(
                "custom pattern '{}': invalid type tag '{}'",
                pattern.name, pattern.type_tag
            ));
        }
        if regex::Regex::new(&pattern.regex).is_err() {
            return Err(format!(
                "custom pattern '{}': invalid regex '{}'",
                pattern.name, pattern.regex
            ));
        }
    }

    // Validate encryption key if provided
    if let Some(ref key) = config.encryption.key {
        if key.len() != 64 {
            return Err("encryption key must be 64 hex characters (32 bytes)".to_string());
        }
        if !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("encryption key must be valid hex".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CloakConfig::default();
        assert!(matches!(
            config.store,
            StoreConfig::Memory {
                ttl_seconds: None,
                max_entries: 100_000
            }
        ));
        assert!(config.detectors.builtins.email);
        assert_eq!(config.detectors.phone_regions, vec!["US"]);
        assert_eq!(config.encryption.key_env, "CLOAK_ENCRYPTION_KEY");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "store": { "type": "file", "path": "/tmp/tokens.json", "ttl_seconds": 3600 },
            "detectors": {
                "builtins": { "phone": false },
                "custom": [{ "name": "employee", "type_tag": "EMPLOYEE_ID", "regex": "EMP\\d{6}" }]
            },
            "store_timeout_ms": 250
        }"#;
        let config: CloakConfig = serde_json::from_str(json).unwrap();

        assert!(matches!(
            config.store,
            StoreConfig::File {
                ttl_seconds: Some(3600),
                ..
            }
        ));
        assert!(!config.detectors.builtins.phone);
        assert!(config.detectors.builtins.email);
        assert_eq!(config.detectors.custom[0].type_tag, "EMPLOYEE_ID");
        assert_eq!(config.store_timeout_ms, Some(250));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CloakConfig::default();
        config.detectors.custom.push(CustomPattern {
            name: "bad".to_string(),
            type_tag: "lower-case".to_string(),
            regex: ".+".to_string(),
        });
        assert!(validate_config(&config).unwrap_err().contains("invalid type tag"));

        let mut config = CloakConfig::default();
        config.detectors.custom.push(CustomPattern {
            name: "bad".to_string(),
            type_tag: "OK".to_string(),
            regex: "(".to_string(),
        });
        assert!(validate_config(&config).unwrap_err().contains("invalid regex"));

        let mut config = CloakConfig::default();
        config.detectors.phone_regions = vec!["ZZ".to_string()];
        assert!(validate_config(&config).is_err());

        let mut config = CloakConfig::default();
        config.encryption.key = Some("abc".to_string());
        assert!(validate_config(&config).is_err());

        let mut config = CloakConfig::default();
        config.store = StoreConfig::Memory {
            ttl_seconds: Some(0),
            max_entries: 10,
        };
        assert!(validate_config(&config).is_err());
    }
}
