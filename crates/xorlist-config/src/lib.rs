use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub endpoint: Endpoint,
    pub store: Store,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    #[serde(default = "default_endpoint_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_key")]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default = "default_identity_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub fetch_on_resolve: bool,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            timeout_ms: default_identity_timeout_ms(),
            fetch_on_resolve: false,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// In-memory store, default names. Mostly for tests and embedding.
    pub fn for_endpoint(base_url: &str) -> Self {
        Self {
            endpoint: Endpoint {
                base_url: base_url.to_string(),
                timeout_ms: default_endpoint_timeout_ms(),
            },
            store: Store {
                kind: "memory".to_string(),
                sqlite_path: None,
                namespace: default_namespace(),
                key: default_key(),
            },
            identity: Identity::default(),
            logging: Logging::default(),
        }
    }
}

fn default_endpoint_timeout_ms() -> u64 {
    10_000
}

fn default_identity_timeout_ms() -> u64 {
    30_000
}

fn default_namespace() -> String {
    "user_whitelist_prefs".to_string()
}

fn default_key() -> String {
    "whitelisted_chats".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    let base_url = cfg.endpoint.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "endpoint.base_url={} must be an http(s) url",
            cfg.endpoint.base_url
        )));
    }
    if cfg.endpoint.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "endpoint.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.store.namespace.trim().is_empty() || cfg.store.key.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "store.namespace and store.key must not be empty".to_string(),
        ));
    }
    if cfg.identity.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "identity.timeout_ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(contents: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("xorlist-config-test-{nanos}.yaml"));
        std::fs::write(&path, contents).expect("write temp config");
        path.to_string_lossy().to_string()
    }

    fn base_yaml() -> String {
        r#"
endpoint:
  base_url: "http://127.0.0.1:3003"

store:
  type: "memory"
"#
        .to_string()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_and_validate(&write_temp_config(&base_yaml())).expect("valid config");
        assert_eq!(cfg.endpoint.timeout_ms, 10_000);
        assert_eq!(cfg.store.namespace, "user_whitelist_prefs");
        assert_eq!(cfg.store.key, "whitelisted_chats");
        assert_eq!(cfg.identity.timeout_ms, 30_000);
        assert!(!cfg.identity.fetch_on_resolve);
        assert_eq!(cfg.identity.user_id, None);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn supports_sqlite_store_type_with_path() {
        let path = write_temp_config(&base_yaml().replace(
            "type: \"memory\"",
            "type: \"sqlite\"\n  sqlite_path: \"./a.db\"",
        ));
        let cfg = load_and_validate(&path).expect("sqlite config should be accepted");
        assert_eq!(cfg.store.kind, "sqlite");
        assert_eq!(cfg.store.sqlite_path.as_deref(), Some("./a.db"));
    }

    #[test]
    fn rejects_sqlite_without_path() {
        let path = write_temp_config(&base_yaml().replace("type: \"memory\"", "type: \"sqlite\""));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }

    #[test]
    fn rejects_sqlite_path_even_when_memory() {
        let path = write_temp_config(&base_yaml().replace(
            "type: \"memory\"",
            "type: \"memory\"\n  sqlite_path: \"./a.db\"",
        ));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }

    #[test]
    fn rejects_unknown_store_type() {
        let path = write_temp_config(&base_yaml().replace("\"memory\"", "\"prefs\""));
        let err = load_and_validate(&path).expect_err("expected schema failure");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let path = write_temp_config(
            &base_yaml().replace("http://127.0.0.1:3003", "ftp://127.0.0.1:3003"),
        );
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let path = write_temp_config(&format!("{}identity:\n  timeout_ms: 0\n", base_yaml()));
        let err = load_and_validate(&path).expect_err("expected failure");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn reads_identity_section() {
        let path = write_temp_config(&format!(
            "{}identity:\n  fetch_on_resolve: true\n  user_id: 42\n",
            base_yaml()
        ));
        let cfg = load_and_validate(&path).expect("valid config");
        assert!(cfg.identity.fetch_on_resolve);
        assert_eq!(cfg.identity.user_id, Some(42));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_and_validate("/definitely/not/here.yaml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Read(_)));
    }

    #[test]
    fn for_endpoint_passes_runtime_validation() {
        assert!(validate_runtime_support(&Config::for_endpoint("http://localhost:1")).is_ok());
    }
}
