//! Engine configuration.
//!
//! Loaded from `$POLICY_COMPOSITION_CONFIG`, else
//! `~/.policy-composition/config.toml`. A path ending in `.json` is read as a
//! plugin configuration document instead of TOML.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::policy::PolicyDescriptor;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "POLICY_COMPOSITION_CONFIG";

/// Key holding the policy list inside a host plugin entry.
const PLUGIN_SPECIFIC_CONFIGURATION: &str = "plugin_specific_configuration";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings (`[engine]`).
    pub engine: EngineConfig,
    /// Policies to dispatch events to (`[[policies_to_invoke]]`).
    pub policies_to_invoke: Vec<PolicyDescriptor>,
}

impl Config {
    /// Load with precedence env vars > file > defaults.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file named by `$POLICY_COMPOSITION_CONFIG` is an error.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let explicit = env(CONFIG_PATH_ENV).is_some();
        let path = Self::config_path_with(env)?;

        let mut config = if !explicit && !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Self::default()
        } else {
            Self::load_from(&path)?
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a file, TOML or JSON by extension. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        tracing::info!(path = %path.display(), "loading config from file");
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))
        } else {
            Self::from_toml(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))
        }
    }

    /// Parse a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Parse a plugin configuration document.
    ///
    /// Accepts either `{"policies_to_invoke": [...]}` or the host's plugin
    /// entry, with the list under `plugin_specific_configuration` and the
    /// instance name at the top level.
    pub fn from_json(json_str: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json_str).context("failed to parse config JSON")?;
        let mut config = Config::default();

        let body = doc.get(PLUGIN_SPECIFIC_CONFIGURATION).unwrap_or(&doc);
        if let Some(engine) = body.get("engine") {
            config.engine = serde_json::from_value(engine.clone())
                .context("invalid engine section")?;
        }
        if let Some(name) = doc.get("instance_name").and_then(Value::as_str) {
            config.engine.instance_name = name.to_owned();
        }
        if let Some(policies) = body.get("policies_to_invoke") {
            config.policies_to_invoke = serde_json::from_value(policies.clone())
                .context("invalid policies_to_invoke")?;
        }
        Ok(config)
    }

    /// Resolve the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("POLICY_COMPOSITION_LOG_LEVEL") {
            match EnvFilter::try_new(&v) {
                Ok(_) => self.engine.log_level = v,
                Err(_) => tracing::warn!(
                    var = "POLICY_COMPOSITION_LOG_LEVEL",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("POLICY_COMPOSITION_INSTANCE_NAME") {
            if v.is_empty() {
                tracing::warn!(
                    var = "POLICY_COMPOSITION_INSTANCE_NAME",
                    "ignoring empty env override"
                );
            } else {
                self.engine.instance_name = v;
            }
        }
        if let Some(v) = env("POLICY_COMPOSITION_LOGS_DIR") {
            self.engine.logs_dir = Some(PathBuf::from(v));
        }
    }

    /// Directory for rotated log files, as passed to
    /// [`logging::init_production`](crate::logging::init_production).
    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.engine.logs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("logs")),
        }
    }
}

// ── Engine config ───────────────────────────────────────────────

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of this engine instance, used in log output.
    pub instance_name: String,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for JSON log files; `~/.policy-composition/logs` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            log_level: default_log_level(),
            logs_dir: None,
        }
    }
}

fn default_instance_name() -> String {
    "policy_composition".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Load the configuration at `path` and apply env overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load_from(path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.policy-composition/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".policy-composition"))
}
