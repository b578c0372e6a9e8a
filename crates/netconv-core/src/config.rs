//! Configuration types for the convergence engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{MarkerRule, MarkerSet, PlaybackOptions};

/// Main netconv configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetconvConfig {
    /// Apply/remove template locations
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Device session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Convergence store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Resource operation settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// HTTP surface settings
    #[serde(default)]
    pub http: HttpConfig,
}

impl NetconvConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.templates.validate()?;
        self.session.validate()?;
        self.store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Template file locations
///
/// `None` selects the built-in IOS-XE template of that kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub apply_path: Option<PathBuf>,

    #[serde(default)]
    pub remove_path: Option<PathBuf>,
}

impl TemplateConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        for path in [&self.apply_path, &self.remove_path].into_iter().flatten() {
            if path.as_os_str().is_empty() {
                return Err(crate::Error::config("Template path cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Device session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Registered driver name (e.g. "ssh")
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Pager/error markers, checked in order
    #[serde(default = "MarkerRule::defaults")]
    pub markers: Vec<MarkerRule>,

    /// Delay before each read of device output (in milliseconds)
    #[serde(default = "default_read_delay_ms")]
    pub read_delay_ms: u64,

    /// Keystroke sent to advance the pager
    #[serde(default = "default_pager_advance")]
    pub pager_advance: String,

    /// Pseudo-terminal request
    #[serde(default)]
    pub pty: PtyConfig,

    /// Accept any host key without verification
    ///
    /// Defaults to `true`. When `false`, keys are checked against the user's
    /// `known_hosts` file and unknown hosts are refused.
    #[serde(default = "default_insecure_skip_host_verification")]
    pub insecure_skip_host_verification: bool,

    /// Timeout for establishing a session (in seconds)
    ///
    /// `None` waits indefinitely.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.driver.is_empty() {
            return Err(crate::Error::config("Session driver cannot be empty"));
        }
        if self.pager_advance.is_empty() {
            return Err(crate::Error::config("Pager advance keystroke cannot be empty"));
        }
        if self.read_delay_ms > 10_000 {
            return Err(crate::Error::config(format!(
                "Read delay must be at most 10000 ms. Got: {}",
                self.read_delay_ms
            )));
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(crate::Error::config("Connect timeout must be > 0"));
        }
        self.pty.validate()?;
        MarkerSet::new(&self.markers)?;
        Ok(())
    }

    /// Compile the protocol-loop options
    pub fn playback_options(&self) -> Result<PlaybackOptions, crate::Error> {
        Ok(PlaybackOptions {
            markers: MarkerSet::new(&self.markers)?,
            read_delay: Duration::from_millis(self.read_delay_ms),
            pager_advance: self.pager_advance.as_bytes().to_vec(),
            line_terminator: "\n".to_string(),
        })
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            markers: MarkerRule::defaults(),
            read_delay_ms: default_read_delay_ms(),
            pager_advance: default_pager_advance(),
            pty: PtyConfig::default(),
            insecure_skip_host_verification: default_insecure_skip_host_verification(),
            connect_timeout_secs: None,
        }
    }
}

/// Pseudo-terminal geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyConfig {
    #[serde(default = "default_term")]
    pub term: String,

    #[serde(default = "default_columns")]
    pub columns: u32,

    #[serde(default = "default_rows")]
    pub rows: u32,
}

impl PtyConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.term.is_empty() {
            return Err(crate::Error::config("PTY terminal type cannot be empty"));
        }
        if self.columns == 0 || self.rows == 0 {
            return Err(crate::Error::config("PTY geometry must be non-zero"));
        }
        Ok(())
    }
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            columns: default_columns(),
            rows: default_rows(),
        }
    }
}

/// Convergence store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// JSON log file
    File {
        /// Path to the log file
        path: PathBuf,
    },

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::config("Store file path cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom store config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Registry name of the store type
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// When a dispatch outcome allows a store commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit whatever the device outcome; the record logs intent
    #[default]
    RecordIntent,
    /// Commit only if every host completed its command sequence
    RequireSuccess,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub commit_policy: CommitPolicy,

    /// Serialize create/update/delete per identity key
    ///
    /// With this disabled, concurrent updates of one key race on
    /// read-then-write and the last writer wins.
    #[serde(default = "default_serialize_per_key")]
    pub serialize_per_key: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_policy: CommitPolicy::default(),
            serialize_per_key: default_serialize_per_key(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_driver() -> String {
    "ssh".to_string()
}

fn default_read_delay_ms() -> u64 {
    40
}

fn default_pager_advance() -> String {
    " ".to_string()
}

fn default_insecure_skip_host_verification() -> bool {
    true
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_columns() -> u32 {
    80
}

fn default_rows() -> u32 {
    40
}

fn default_serialize_per_key() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3001))
}
