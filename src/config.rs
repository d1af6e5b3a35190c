use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    filters::FilterConfig,
    video::time::DEFAULT_TIMESCALE,
};

/// Main configuration for videofx
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Frame source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Preview loop settings
    #[serde(default)]
    pub preview: PreviewConfig,

    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Initially selected filter
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.preview.validate()?;
        self.export.validate()?;
        self.filter.validate()?;
        Ok(())
    }
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Consecutive missed frames tolerated during playback before the
    /// session is reopened
    pub stall_threshold: u32,

    /// Ticks per second used for media time
    pub timescale: i32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stall_threshold: 12,
            timescale: DEFAULT_TIMESCALE,
        }
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<()> {
        if self.timescale <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "source.timescale".to_string(),
                value: self.timescale.to_string()
            }.into());
        }

        Ok(())
    }
}

/// Preview configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Display refresh rate driving preview ticks (Hz)
    pub refresh_rate: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { refresh_rate: 60.0 }
    }
}

impl PreviewConfig {
    fn validate(&self) -> Result<()> {
        if !(self.refresh_rate > 0.0 && self.refresh_rate <= 1000.0) {
            return Err(ConfigError::InvalidValue {
                key: "preview.refresh_rate".to_string(),
                value: self.refresh_rate.to_string()
            }.into());
        }

        Ok(())
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Pause between frame pulls so the decoder can keep up (milliseconds)
    pub frame_throttle_ms: u64,

    /// Directory for the temporary output file (system temp dir if unset)
    pub work_dir: Option<PathBuf>,

    /// Output file name prefix
    pub file_prefix: String,

    /// FFmpeg encoder name
    pub codec: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Pixel buffers the writer may hold at once
    pub pool_capacity: usize,

    /// Longest wait for the writer to return a pixel buffer (seconds, 0 waits forever)
    pub buffer_wait_secs: u64,

    /// Worker threads for filter and transform work
    pub render_threads: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            frame_throttle_ms: 50,
            work_dir: None,
            file_prefix: "Output".to_string(),
            codec: "libx264".to_string(),
            quality: 85,
            pool_capacity: 4,
            buffer_wait_secs: 30,
            render_threads: num_cpus::get(),
        }
    }
}

impl ExportConfig {
    fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "export.quality".to_string(),
                value: self.quality.to_string()
            }.into());
        }

        if self.pool_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "export.pool_capacity".to_string(),
                value: self.pool_capacity.to_string()
            }.into());
        }

        if self.render_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "export.render_threads".to_string(),
                value: self.render_threads.to_string()
            }.into());
        }

        if self.file_prefix.is_empty() || self.file_prefix.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                key: "export.file_prefix".to_string(),
                value: self.file_prefix.clone()
            }.into());
        }

        Ok(())
    }

    /// Directory the temporary artifact is written to
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// x264-style CRF for the configured quality
    pub fn crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }
}
