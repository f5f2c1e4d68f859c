use crate::converter::PixelConverter;
use crate::error::{CameraError, Result};
use crate::format::PixelFormat;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CamdevConfig {
    pub camera: CameraConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Capture device node (e.g. /dev/video0) or "synthetic"
    #[serde(default = "default_camera_device")]
    pub device: String,

    #[serde(default = "default_camera_width")]
    pub width: u32,

    #[serde(default = "default_camera_height")]
    pub height: u32,

    /// Frame rate of the synthetic source
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Native format delivered by the source (NV12, NV21, YU12, YV12)
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Format handed to frame consumers
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Capture loop wait timeout in microseconds (0 = wait indefinitely)
    #[serde(default = "default_poll_timeout_us")]
    pub poll_timeout_us: u64,

    /// How long a still capture waits for a fresh frame
    #[serde(default = "default_picture_timeout_ms")]
    pub picture_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for the `camdev` target (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, pretty, or compact
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl CameraConfig {
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.pixel_format.parse()
    }

    pub fn output_format(&self) -> Result<PixelFormat> {
        self.output_format.parse()
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        (self.poll_timeout_us > 0).then(|| Duration::from_micros(self.poll_timeout_us))
    }

    pub fn picture_timeout(&self) -> Duration {
        Duration::from_millis(self.picture_timeout_ms)
    }
}

impl CamdevConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from_file("camdev.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment variables use the `CAMDEV_` prefix and a double
    /// underscore between section and key, e.g. `CAMDEV_CAMERA__PIXEL_FORMAT`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.device", default_camera_device())?
            .set_default("camera.width", default_camera_width())?
            .set_default("camera.height", default_camera_height())?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.pixel_format", default_pixel_format())?
            .set_default("camera.output_format", default_output_format())?
            .set_default("camera.poll_timeout_us", default_poll_timeout_us() as i64)?
            .set_default("camera.picture_timeout_ms", default_picture_timeout_ms() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("CAMDEV")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: CamdevConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let camera = &self.camera;

        if camera.width == 0 || camera.height == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if camera.width % 2 != 0 || camera.height % 2 != 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be even for 4:2:0 formats".to_string(),
            ));
        }

        if camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        let pixel_format = camera
            .pixel_format()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        let output_format = camera
            .output_format()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        if !PixelConverter::supports(pixel_format, output_format) {
            return Err(ConfigError::Message(format!(
                "No conversion from {} to {}",
                pixel_format, output_format
            )));
        }

        if camera.picture_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Picture timeout must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty" | "compact") {
            return Err(ConfigError::Message(format!(
                "Unknown log format '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(CameraError::from)
    }
}

impl Default for CamdevConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: default_camera_device(),
                width: default_camera_width(),
                height: default_camera_height(),
                fps: default_camera_fps(),
                pixel_format: default_pixel_format(),
                output_format: default_output_format(),
                poll_timeout_us: default_poll_timeout_us(),
                picture_timeout_ms: default_picture_timeout_ms(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}

// Default value functions
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_width() -> u32 {
    640
}
fn default_camera_height() -> u32 {
    480
}
fn default_camera_fps() -> u32 {
    30
}
fn default_pixel_format() -> String {
    "NV12".to_string()
}
fn default_output_format() -> String {
    "NV21".to_string()
}
fn default_poll_timeout_us() -> u64 {
    0
}
fn default_picture_timeout_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CamdevConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.pixel_format().unwrap(), PixelFormat::Nv12);
        assert_eq!(config.camera.output_format().unwrap(), PixelFormat::Nv21);
        assert_eq!(config.camera.poll_timeout(), None);
        assert_eq!(config.camera.picture_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[camera]\ndevice = \"synthetic\"\nwidth = 320\nheight = 240\npoll_timeout_us = 500000\n"
        )
        .unwrap();
        file.flush().unwrap();

        let config = CamdevConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.device, "synthetic");
        assert_eq!(config.camera.width, 320);
        assert_eq!(config.camera.height, 240);
        assert_eq!(config.camera.pixel_format, "NV12");
        assert_eq!(
            config.camera.poll_timeout(),
            Some(Duration::from_micros(500_000))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CamdevConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.camera, CamdevConfig::default().camera);
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("CAMDEV_LOGGING__FORMAT", "json");

        let dir = tempfile::tempdir().unwrap();
        let config = CamdevConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.logging.format, "json");

        env::remove_var("CAMDEV_LOGGING__FORMAT");
    }

    #[test]
    fn test_config_validation() {
        let mut config = CamdevConfig::default();

        config.camera.width = 0;
        assert!(config.validate().is_err());

        config.camera.width = 641;
        assert!(config.validate().is_err());

        config.camera.width = 640;
        config.camera.pixel_format = "MJPG".to_string();
        assert!(config.validate().is_err());

        config.camera.pixel_format = "NV12".to_string();
        config.camera.output_format = "YU12".to_string();
        assert!(config.validate().is_err());

        config.camera.output_format = "NV12".to_string();
        assert!(config.validate().is_ok());

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let config = CamdevConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[camera]"));

        let parsed: CamdevConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
