//! Configuration loading.

use anyhow::{Context, Result, anyhow};
use bagcache_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "BAGCACHE_CONFIG";

const ENV_PREFIX: &str = "BAGCACHE_";

/// Load and validate the application configuration.
///
/// The file is optional: `BAGCACHE_` variables (nested keys separated by
/// `__`) can provide or override every setting.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_PATH_VAR);

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: bagcached --config /path/to/bagcache.toml\n  \
             2. Environment variables: BAGCACHE_STORAGE__PUBLIC__PATH=/bags ...\n\n\
             Set {CONFIG_PATH_VAR} to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}
