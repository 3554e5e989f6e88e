//! Config file discovery, loading, and environment variable overlay.
//!
//! Files are merged as raw TOML tables before deserializing, so a later
//! file only overrides the keys it actually sets.

use crate::{Backend, ConfigError, MantraConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/mantra/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("mantra/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("mantra.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a config, expanding `~` in paths.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<MantraConfig, ConfigError> {
    let mut config: MantraConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.infra.paths.state_dir = expand_path(&config.infra.paths.state_dir.to_string_lossy());
    config.infra.paths.cas_dir = expand_path(&config.infra.paths.cas_dir.to_string_lossy());

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MantraConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MANTRA_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("MANTRA_STATE_DIR".to_string());
    }
    if let Ok(v) = env::var("MANTRA_CAS_DIR") {
        config.infra.paths.cas_dir = expand_path(&v);
        sources.env_overrides.push("MANTRA_CAS_DIR".to_string());
    }

    if let Ok(v) = env::var("MANTRA_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("MANTRA_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("MANTRA_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("MANTRA_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything else for the filter
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("MANTRA_BACKEND") {
        if let Ok(backend) = v.parse::<Backend>() {
            config.bootstrap.generation.backend = backend;
            sources.env_overrides.push("MANTRA_BACKEND".to_string());
        }
    }
    if let Ok(v) = env::var("MANTRA_MUSIC_URL") {
        config.bootstrap.generation.music_url = v;
        sources.env_overrides.push("MANTRA_MUSIC_URL".to_string());
    }
    if let Ok(v) = env::var("MANTRA_VOICE_URL") {
        config.bootstrap.generation.voice_url = v;
        sources.env_overrides.push("MANTRA_VOICE_URL".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        return directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path));
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        return match stripped.split_once('/') {
            Some((var_name, rest)) => env::var(var_name)
                .map(|value| PathBuf::from(value).join(rest))
                .unwrap_or_else(|_| PathBuf::from(path)),
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        };
    }

    PathBuf::from(path)
}
