//! CLI command implementations for `tollgate`.
//!
//! - [`config_cmd`] -- `tollgate config show|validate`.
//! - [`ceiling`] -- `tollgate ceiling`.
//! - [`simulate`] -- `tollgate simulate`.

pub mod ceiling;
pub mod config_cmd;
pub mod simulate;

use std::path::{Path, PathBuf};

use serde_json::Value;

use tollgate_types::config::GovernorConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TOLLGATE_CONFIG";

/// Load configuration from the given path override or via auto-discovery.
///
/// If `config_override` is provided, loads from that path. Otherwise the
/// discovery chain is:
/// 1. `TOLLGATE_CONFIG` env var
/// 2. `~/.tollgate/config.json`
///
/// Returns a default `GovernorConfig` if no config file is found.
pub fn load_config(config_override: Option<&str>) -> anyhow::Result<GovernorConfig> {
    let path = match config_override {
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                anyhow::bail!("config file not found: {path_str}");
            }
            Some(path)
        }
        None => discover_config_path(),
    };

    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(&path)
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(GovernorConfig::default())
        }
    }
}

/// Read, normalize and deserialize a single config file.
pub fn load_config_file(path: &Path) -> anyhow::Result<GovernorConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
    let config: GovernorConfig = serde_json::from_value(normalize_keys(value))?;
    Ok(config)
}

/// Discover the config file path from the environment and home directory.
pub fn discover_config_path() -> Option<PathBuf> {
    discover_from(std::env::var(CONFIG_ENV_VAR).ok(), dirs::home_dir())
}

fn discover_from(env_path: Option<String>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(env_path));
    }

    let candidate = home_dir?.join(".tollgate").join("config.json");
    candidate.exists().then_some(candidate)
}

/// Recursively convert all object keys from camelCase to snake_case.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (camel_to_snake(&key), normalize_keys(val)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// Convert a single camelCase string to snake_case.
///
/// A run of uppercase letters (`"USD"`) stays together; an underscore is
/// inserted before its last letter only when a lowercase letter follows.
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut result = String::with_capacity(name.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next.is_some_and(|c| c.is_lowercase()))
            {
                result.push('_');
            }
        }
        result.push(ch.to_ascii_lowercase());
    }
    result
}
