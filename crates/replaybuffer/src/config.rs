//! Configuration management for replaybuffer.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "replaybuffer";

/// Default segment directory name inside the data directory.
const SEGMENT_DIR_NAME: &str = "segments";

/// Default upload ledger file name.
const LEDGER_FILE_NAME: &str = "uploads.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `REPLAYBUFFER_`, sections split by `__`)
/// 2. TOML config file at `~/.config/replaybuffer/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Segment buffer configuration.
    pub buffer: BufferConfig,
    /// Segment producer configuration.
    pub producer: ProducerConfig,
    /// Clip muxer configuration.
    pub muxer: MuxerConfig,
    /// Trigger configuration.
    pub trigger: TriggerConfig,
    /// Upload and remote retention configuration.
    pub upload: UploadConfig,
}

/// Rolling segment buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Shared directory the producer writes segments into.
    /// Defaults to `~/.local/share/replaybuffer/segments`
    pub directory: Option<PathBuf>,
    /// File name prefix of every segment.
    pub segment_prefix: String,
    /// File extension of every segment and clip, without the dot.
    pub segment_extension: String,
    /// Zero-padding width of the sequence number.
    pub sequence_width: usize,
    /// Duration of one segment in seconds.
    pub segment_duration_secs: u64,
    /// Number of complete segments assembled into one clip.
    pub window_segments: usize,
    /// Number of newer segment files that must exist before a segment
    /// counts as complete.
    pub settle_segments: usize,
    /// File name prefix of assembled clips.
    pub clip_prefix: String,
    /// Interval between janitor sweeps in seconds. Set to 0 to disable.
    pub janitor_interval_secs: u64,
}

/// Segment producer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Launch and supervise the producer from `rebuf run`.
    pub enabled: bool,
    /// Producer executable.
    pub program: String,
    /// Capture input format (`-f` before `-i`).
    pub input_format: String,
    /// Capture device.
    pub device: String,
    /// Capture frame rate.
    pub framerate: u32,
    /// Capture frame size, `WIDTHxHEIGHT`.
    pub video_size: String,
    /// Video encoder.
    pub codec: String,
    /// Target video bitrate.
    pub bitrate: String,
    /// Remove stale segments when the daemon starts.
    pub clear_on_start: bool,
    /// Delay before restarting a crashed producer, in seconds.
    pub restart_delay_secs: u64,
    /// Maximum number of restarts. Set to 0 for unlimited.
    pub max_restarts: u32,
}

/// Clip muxer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    /// Muxer executable.
    pub program: String,
}

/// Where trigger events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A GPIO pin exported through sysfs.
    #[default]
    Gpio,
    /// `SIGUSR1` sent to the daemon.
    Signal,
}

/// Trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Trigger source.
    pub kind: TriggerKind,
    /// GPIO pin number.
    pub pin: u32,
    /// The pin reads low while the button is pressed (pull-up wiring).
    pub active_low: bool,
    /// Minimum time between two accepted triggers in milliseconds.
    pub debounce_ms: u64,
    /// Interval between pin reads in milliseconds.
    pub poll_interval_ms: u64,
    /// Root of the sysfs GPIO tree.
    pub sysfs_root: PathBuf,
}

/// Upload and remote retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Hand every new clip to the uploader from `rebuf run`.
    pub enabled: bool,
    /// Remote store executable.
    pub program: String,
    /// Remote location, e.g. `dropbox:VideosPi`.
    pub remote: String,
    /// Hours an uploaded clip is kept on the remote.
    pub retention_hours: u64,
    /// Fixed remote name that always holds the latest clip.
    pub latest_alias: Option<String>,
    /// Upload attempts before giving up on a clip.
    pub retries: u32,
    /// Delay between upload attempts in seconds.
    pub retry_delay_secs: u64,
    /// Path to the upload ledger.
    /// Defaults to `~/.local/share/replaybuffer/uploads.db`
    pub ledger_path: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            directory: None, // Will be resolved to default at runtime
            segment_prefix: "segment_".to_string(),
            segment_extension: "mp4".to_string(),
            sequence_width: 3,
            segment_duration_secs: 6,
            window_segments: 10,
            settle_segments: 1,
            clip_prefix: "clip_".to_string(),
            janitor_interval_secs: 60,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "ffmpeg".to_string(),
            input_format: "v4l2".to_string(),
            device: "/dev/video0".to_string(),
            framerate: 15,
            video_size: "1080x608".to_string(),
            codec: "h264_v4l2m2m".to_string(),
            bitrate: "8M".to_string(),
            clear_on_start: true,
            restart_delay_secs: 2,
            max_restarts: 0,
        }
    }
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            kind: TriggerKind::Gpio,
            pin: 27,
            active_low: true,
            debounce_ms: 300,
            poll_interval_ms: 20,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Opt-in only
            program: "rclone".to_string(),
            remote: "dropbox:replaybuffer".to_string(),
            retention_hours: 8,
            latest_alias: Some("latest.mp4".to_string()),
            retries: 5,
            retry_delay_secs: 60,
            ledger_path: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("REPLAYBUFFER_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let buffer = &self.buffer;

        if buffer.window_segments == 0 {
            return Err(invalid("window_segments must be greater than 0"));
        }

        if buffer.segment_duration_secs == 0 {
            return Err(invalid("segment_duration_secs must be greater than 0"));
        }

        if buffer.sequence_width == 0 {
            return Err(invalid("sequence_width must be greater than 0"));
        }

        if buffer.segment_prefix.is_empty() || buffer.clip_prefix.is_empty() {
            return Err(invalid("segment_prefix and clip_prefix must not be empty"));
        }

        if buffer.segment_prefix == buffer.clip_prefix {
            return Err(invalid(format!(
                "segment_prefix and clip_prefix must differ (both are {:?})",
                buffer.segment_prefix
            )));
        }

        if buffer.segment_extension.is_empty() || buffer.segment_extension.starts_with('.') {
            return Err(invalid(
                "segment_extension must be non-empty and given without a leading dot",
            ));
        }

        if self.trigger.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }

        if self.upload.enabled && self.upload.remote.trim().is_empty() {
            return Err(invalid("upload.remote must be set when uploads are enabled"));
        }

        if self.upload.retries == 0 {
            return Err(invalid("upload.retries must be at least 1"));
        }

        Ok(())
    }

    /// Get the segment directory, resolving defaults if not set.
    #[must_use]
    pub fn segment_dir(&self) -> PathBuf {
        self.buffer
            .directory
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(SEGMENT_DIR_NAME))
    }

    /// Get the upload ledger path, resolving defaults if not set.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.upload
            .ledger_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(LEDGER_FILE_NAME))
    }

    /// Get the segment duration as a Duration.
    #[must_use]
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.buffer.segment_duration_secs)
    }

    /// Get the span of recording one clip covers.
    #[must_use]
    pub fn clip_span(&self) -> Duration {
        let segments = u32::try_from(self.buffer.window_segments).unwrap_or(u32::MAX);
        self.segment_duration().saturating_mul(segments)
    }

    /// Get the janitor interval, or `None` when the janitor is disabled.
    #[must_use]
    pub fn janitor_interval(&self) -> Option<Duration> {
        if self.buffer.janitor_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.buffer.janitor_interval_secs))
        }
    }

    /// Get the trigger debounce window as a Duration.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.trigger.debounce_ms)
    }

    /// Get the trigger poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.trigger.poll_interval_ms)
    }

    /// Get the remote retention age as a Duration.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.upload.retention_hours * 60 * 60)
    }

    /// Get the delay between upload attempts as a Duration.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload.retry_delay_secs)
    }

    /// Get the delay before a crashed producer is restarted.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.producer.restart_delay_secs)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
