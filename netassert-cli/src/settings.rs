//! Settings loading for netassert.
//!
//! Settings come from an optional TOML file (`--settings`); command-line
//! flags override them field by field.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netassert_runner::{DispatchConfig, RunSettings, SshOptions};

/// Root settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Container launch and dispatch settings.
    #[serde(default)]
    pub run: RunSection,
    /// Remote shell settings.
    #[serde(default)]
    pub ssh: SshSection,
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Test image (default: controlplane/netassert:0.1).
    #[serde(default = "default_image")]
    pub image: String,
    /// Skip image pulls (default: false).
    #[serde(default)]
    pub offline: bool,
    /// Deadline per target class in seconds (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Workers in flight per class (default: 5).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Prefix for ephemeral container names (default: netassert).
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

/// `[ssh]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    /// Login user for hosts and nodes that do not embed one.
    pub user: Option<String>,
    /// Extra `-o` options (`Key=Value`).
    #[serde(default)]
    pub options: Vec<String>,
    /// Alternative ssh_config file.
    pub config_file: Option<PathBuf>,
    /// Known-hosts file (default: ~/.ssh/known_hosts).
    pub known_hosts: Option<PathBuf>,
    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default value functions
fn default_image() -> String {
    netassert_runner::DEFAULT_IMAGE.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_concurrency() -> usize {
    netassert_runner::DEFAULT_CONCURRENCY
}

fn default_container_prefix() -> String {
    netassert_types::DEFAULT_CONTAINER_PREFIX.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// `~/.ssh/known_hosts`, if a home directory is known.
pub fn default_known_hosts() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            offline: false,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            container_prefix: default_container_prefix(),
        }
    }
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: None,
            options: Vec::new(),
            config_file: None,
            known_hosts: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Values given on the command line. `None` keeps the settings value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--image`.
    pub image: Option<String>,
    /// `--offline`.
    pub offline: bool,
    /// `--timeout`.
    pub timeout_secs: Option<u64>,
    /// `--concurrency`.
    pub concurrency: Option<usize>,
    /// `--ssh-user`.
    pub ssh_user: Option<String>,
    /// `--ssh-option`, appended to the file's options.
    pub ssh_options: Vec<String>,
    /// `--ssh-config`.
    pub ssh_config: Option<PathBuf>,
    /// `--known-hosts`.
    pub known_hosts: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds
    /// values out of range.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| SettingsError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.run.timeout_secs == 0 {
            return Err(SettingsError::Invalid("run.timeout_secs must be at least 1".into()));
        }
        if self.run.concurrency == 0 {
            return Err(SettingsError::Invalid("run.concurrency must be at least 1".into()));
        }
        if self.run.image.trim().is_empty() {
            return Err(SettingsError::Invalid("run.image must not be empty".into()));
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(image) = overrides.image {
            self.run.image = image;
        }
        if overrides.offline {
            self.run.offline = true;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.run.timeout_secs = timeout;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.run.concurrency = concurrency;
        }
        if let Some(user) = overrides.ssh_user {
            self.ssh.user = Some(user);
        }
        self.ssh.options.extend(overrides.ssh_options);
        if let Some(config) = overrides.ssh_config {
            self.ssh.config_file = Some(config);
        }
        if let Some(known_hosts) = overrides.known_hosts {
            self.ssh.known_hosts = Some(known_hosts);
        }
    }

    /// Container launch settings.
    pub fn run_settings(&self, debug: bool) -> RunSettings {
        RunSettings {
            image: self.run.image.clone(),
            pull: !self.run.offline,
            debug,
            container_prefix: self.run.container_prefix.clone(),
        }
    }

    /// Dispatch limits.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            concurrency: self.run.concurrency,
            timeout: Duration::from_secs(self.run.timeout_secs),
        }
    }

    /// Remote shell options, with the default known-hosts file filled in.
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            user: self.ssh.user.clone(),
            config_file: self.ssh.config_file.clone(),
            known_hosts: self.ssh.known_hosts.clone().or_else(default_known_hosts),
            connect_timeout_secs: self.ssh.connect_timeout_secs,
            extra: self.ssh.options.clone(),
        }
    }
}

/// Settings error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read the settings file.
    #[error("failed to read settings file {path}: {source}")]
    ReadError {
        /// Path to the settings file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the settings file.
    #[error("failed to parse settings file {path}: {source}")]
    ParseError {
        /// Path to the settings file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid settings: {0}")]
    Invalid(String),
}
