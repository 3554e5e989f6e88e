//! Configuration loading for mantra.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): paths and telemetry. Fixed for the
//!   lifetime of the process.
//! - **Bootstrap** (`BootstrapConfig`): generation backend choice, per-session
//!   defaults, and retention policy. Read once when the orchestrator is built.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/mantra/config.toml` (system)
//! 2. `~/.config/mantra/config.toml` (user)
//! 3. `./mantra.toml` or the `--config` path (local override)
//! 4. Environment variables (`MANTRA_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/mantra"
//! cas_dir = "~/.mantra/cas"
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [bootstrap.generation]
//! backend = "remote"
//! music_url = "http://127.0.0.1:2006"
//! voice_url = "http://127.0.0.1:2010"
//!
//! [bootstrap.sessions]
//! affirmation_interval_secs = 30.0
//! buffer_size = 3
//!
//! [bootstrap.retention]
//! sweep_interval_secs = 300
//! max_session_age_secs = 1800
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{Backend, BootstrapConfig, GenerationConfig, RetentionConfig, SessionDefaults};
pub use infra::{InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete mantra configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MantraConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl MantraConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an optional explicit file replacing `./mantra.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# mantra configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.infra.paths.state_dir.display()
        ));
        output.push_str(&format!(
            "cas_dir = \"{}\"\n",
            self.infra.paths.cas_dir.display()
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        let generation = &self.bootstrap.generation;
        output.push_str("\n[bootstrap.generation]\n");
        output.push_str(&format!("backend = \"{}\"\n", generation.backend));
        output.push_str(&format!("music_url = \"{}\"\n", generation.music_url));
        output.push_str(&format!("voice_url = \"{}\"\n", generation.voice_url));
        output.push_str(&format!("mock_latency_ms = {}\n", generation.mock_latency_ms));
        output.push_str(&format!(
            "request_timeout_ms = {}\n",
            generation.request_timeout_ms
        ));

        let sessions = &self.bootstrap.sessions;
        output.push_str("\n[bootstrap.sessions]\n");
        output.push_str(&format!(
            "affirmation_interval_secs = {:?}\n",
            sessions.affirmation_interval_secs
        ));
        output.push_str(&format!("buffer_size = {}\n", sessions.buffer_size));
        output.push_str(&format!(
            "segment_duration_secs = {:?}\n",
            sessions.segment_duration_secs
        ));
        output.push_str(&format!(
            "look_ahead_secs = {:?}\n",
            sessions.look_ahead_secs
        ));

        let retention = &self.bootstrap.retention;
        output.push_str("\n[bootstrap.retention]\n");
        output.push_str(&format!(
            "sweep_interval_secs = {}\n",
            retention.sweep_interval_secs
        ));
        output.push_str(&format!(
            "max_session_age_secs = {}\n",
            retention.max_session_age_secs
        ));

        output
    }
}
