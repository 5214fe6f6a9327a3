//! Configuration management for zerocall
//!
//! Provides configuration loading, saving, and validation for NAT traversal
//! servers, signaling timeouts, local media, the remote activity indicator,
//! invitation links and locale selection.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroCallConfig {
    pub ice: IceConfig,
    pub gathering: GatheringConfig,
    pub session: SessionConfig,
    pub media: MediaConfig,
    pub activity: ActivityConfig,
    pub invite: InviteConfig,
    pub locale: LocaleConfig,
}

/// Peer connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
    /// STUN/TURN servers used for NAT traversal
    pub servers: Vec<IceServer>,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    All,
    Relay,
}

/// Bundle policy for the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

/// Candidate gathering configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatheringConfig {
    /// Upper bound on the wait for gathering completion in milliseconds
    pub timeout_ms: u64,
}

/// Call session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the responder waits for remote media after handing out its
    /// response code; 0 waits indefinitely
    pub remote_media_timeout_ms: u64,
}

/// Local media configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    /// Refuse to start when no accessible capture device is found
    pub require_devices: bool,
}

/// Remote activity indicator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Analyzer window; frequency bins = fft_size / 2
    pub fft_size: usize,
    /// Sum of byte frequency bins above which the remote party is speaking
    pub threshold: u32,
    /// Sampling period in milliseconds
    pub tick_ms: u64,
    /// Time smoothing between analyzer frames (0.0-1.0)
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

/// Invitation link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    /// Page the responder opens; the encoded offer is appended as `?invite=`
    pub base_url: String,
}

/// Locale configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    /// Preferred locale code; detected from the environment when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
            servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

impl Default for GatheringConfig {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remote_media_timeout_ms: 30_000,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            require_devices: true,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            fft_size: 512,
            threshold: 1000,
            tick_ms: 16,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://zero-call.org/".to_string(),
        }
    }
}

impl GatheringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SessionConfig {
    pub fn remote_media_timeout(&self) -> Option<Duration> {
        match self.remote_media_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl ActivityConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl InviteConfig {
    pub fn base(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("Invite base URL is invalid: {}", e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Invalid(
                "Invite base URL must use http or https".to_string(),
            ));
        }
        Ok(url)
    }
}

impl ZeroCallConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: ZeroCallConfig = toml::from_str(&contents)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("zerocall.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.ice.servers.is_empty() {
            return invalid("At least one ICE server is required for NAT traversal");
        }
        for server in &self.ice.servers {
            if server.urls.is_empty() {
                return invalid("ICE server entry has no URLs");
            }
            let known_scheme = server.urls.iter().all(|u| {
                u.starts_with("stun:") || u.starts_with("turn:") || u.starts_with("turns:")
            });
            if !known_scheme {
                return invalid("ICE server URLs must start with stun:, turn: or turns:");
            }
        }
        if self.ice.transport_policy == IceTransportPolicy::Relay
            && !self
                .ice
                .servers
                .iter()
                .flat_map(|s| s.urls.iter())
                .any(|u| u.starts_with("turn"))
        {
            return invalid("Relay transport policy requires a TURN server");
        }

        if self.gathering.timeout_ms == 0 || self.gathering.timeout_ms > 60_000 {
            return invalid("Gathering timeout must be between 1 and 60000 ms");
        }

        if !self.media.audio && !self.media.video {
            return invalid("At least one of audio or video must be enabled");
        }

        let fft = self.activity.fft_size;
        if !fft.is_power_of_two() || !(32..=32768).contains(&fft) {
            return invalid("Analyzer FFT size must be a power of two between 32 and 32768");
        }
        if self.activity.threshold == 0 {
            return invalid("Activity threshold must be positive");
        }
        if self.activity.tick_ms == 0 || self.activity.tick_ms > 1000 {
            return invalid("Activity tick must be between 1 and 1000 ms");
        }
        if !(0.0..=1.0).contains(&self.activity.smoothing) {
            return invalid("Analyzer smoothing must be between 0.0 and 1.0");
        }
        if self.activity.min_decibels >= self.activity.max_decibels {
            return invalid("Analyzer min_decibels must be below max_decibels");
        }

        self.invite.base()?;
        Ok(())
    }
}
