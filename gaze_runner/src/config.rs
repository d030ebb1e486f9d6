// THEORY:
// The runner is configured by one TOML file. The `[pipeline]` table is the
// library's own `PipelineConfig`, deserialized as-is, so every engine knob can be
// tuned without the runner knowing about it. The remaining tables cover what only
// the runner deals with: where frames come from, where the calibration images
// live, where telemetry goes and how much gets logged.
//
// Every field has a default, so an empty file (or a file with only a `[source]`
// table) is a valid configuration.

use anyhow::{bail, Context};
use gaze_vision::{CalibrationTarget, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub source: SourceConfig,
    pub calibration: CalibrationConfig,
    pub pipeline: PipelineConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Exactly one of the two must be set by the time the runner starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub video_file: Option<PathBuf>,
    pub stream_url: Option<String>,
}

/// Where frames are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    Stream(String),
}

impl SourceConfig {
    pub fn location(&self) -> anyhow::Result<SourceLocation> {
        match (&self.video_file, &self.stream_url) {
            (Some(path), None) => Ok(SourceLocation::File(path.clone())),
            (None, Some(url)) => Ok(SourceLocation::Stream(url.clone())),
            (Some(_), Some(_)) => bail!("[source] sets both video_file and stream_url; pick one"),
            (None, None) => bail!("no frame source: set [source] video_file or stream_url, or pass --video / --stream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Directory holding `center`, `up`, `down`, `left` and `right` images.
    pub data_dir: PathBuf,
    pub extension: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            extension: "png".to_string(),
        }
    }
}

impl CalibrationConfig {
    pub fn image_path(&self, target: CalibrationTarget) -> PathBuf {
        self.data_dir.join(format!("{}.{}", target.as_str(), self.extension))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub host: String,
    pub port: u16,
    pub gaze_output: bool,
    pub blink_output: bool,
    pub address_gaze_x: String,
    pub address_gaze_y: String,
    pub address_blink: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            gaze_output: true,
            blink_output: true,
            address_gaze_x: "/avatar/parameters/EyeX".to_string(),
            address_gaze_y: "/avatar/parameters/EyeY".to_string(),
            address_blink: "/avatar/parameters/EyesClosed".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `info` or `gaze_vision=debug`.
    pub level: String,
    /// When set, logs go to `<log_dir>/gaze-<unix_ts>.log` instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in config file {}", path.display()))
    }

    /// Checks the runner-only sections; the pipeline table validates itself.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate().context("invalid [pipeline] section")?;
        if self.calibration.extension.trim().is_empty() {
            bail!("[calibration] extension must not be empty");
        }
        if self.telemetry.host.trim().is_empty() {
            bail!("[telemetry] host must not be empty");
        }
        for address in [
            &self.telemetry.address_gaze_x,
            &self.telemetry.address_gaze_y,
            &self.telemetry.address_blink,
        ] {
            if !address.starts_with('/') {
                bail!("[telemetry] OSC address {address:?} must start with '/'");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaze_vision::{BlobPolarity, NoDetectionPolicy};

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RunnerConfig::from_toml("").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.telemetry.target(), "127.0.0.1:9000");
        assert_eq!(config.pipeline.threshold, 127);
    }

    #[test]
    fn parses_a_full_file() {
        let config = RunnerConfig::from_toml(
            r#"
            [source]
            stream_url = "http://192.168.1.20:81/stream"

            [calibration]
            data_dir = "calib"
            extension = "jpg"

            [pipeline]
            threshold = 40
            no_detection = "legacy_origin"
            roi = { x = 10, y = 20, width = 320, height = 240 }

            [pipeline.detector]
            polarity = "bright"
            min_area = 50

            [pipeline.smoothing]
            tau_secs = 0.05

            [telemetry]
            port = 9001
            blink_output = false

            [logging]
            level = "debug"
            log_dir = "logs"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.source.location().unwrap(),
            SourceLocation::Stream("http://192.168.1.20:81/stream".to_string())
        );
        assert_eq!(config.calibration.image_path(CalibrationTarget::Up), PathBuf::from("calib/up.jpg"));
        assert_eq!(config.pipeline.threshold, 40);
        assert_eq!(config.pipeline.no_detection, NoDetectionPolicy::LegacyOrigin);
        assert_eq!(config.pipeline.roi.x, 10);
        assert_eq!(config.pipeline.roi.height, 240);
        assert_eq!(config.pipeline.detector.polarity, BlobPolarity::Bright);
        assert_eq!(config.pipeline.detector.min_area, 50);
        assert!(config.pipeline.detector.filter_by_convexity);
        assert!((config.pipeline.smoothing.tau_secs - 0.05).abs() < 1e-12);
        assert_eq!(config.telemetry.port, 9001);
        assert!(config.telemetry.gaze_output);
        assert!(!config.telemetry.blink_output);
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn source_needs_exactly_one_location() {
        let mut source = SourceConfig::default();
        assert!(source.location().is_err());
        source.video_file = Some(PathBuf::from("eye.mp4"));
        assert_eq!(source.location().unwrap(), SourceLocation::File(PathBuf::from("eye.mp4")));
        source.stream_url = Some("rtsp://cam".to_string());
        assert!(source.location().is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RunnerConfig::from_toml("[pipeline.smoothing]\ntau_secs = -1.0").is_err());
        assert!(RunnerConfig::from_toml("[pipeline.roi]\nx = 0\ny = 0\nwidth = 0\nheight = 10").is_err());
        assert!(RunnerConfig::from_toml("[telemetry]\naddress_blink = \"EyesClosed\"").is_err());
        assert!(RunnerConfig::from_toml("[telemetry]\nport = \"nine\"").is_err());
    }
}
