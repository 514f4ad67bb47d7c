//! Daemon configuration, loaded from TOML.
//!
//! Lookup order: an explicit `--config` path, then
//! `$XDG_CONFIG_HOME/shutter/config.toml`, then built-in defaults.
//! `SHUTTER_SOCKET` and `SHUTTER_ENV` override the file.
//!
//! ```toml
//! production = true
//!
//! [camera]
//! binary = "raspistill"
//!
//! [photo]
//! directory = "/srv/shutter/public/photos"
//! timeout_secs = 30
//!
//! [stream]
//! directory = "/srv/shutter/stream"
//! file_name = "image_stream.jpg"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::photo::{is_temporary_artifact, ArtifactNaming};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/shutter.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "SHUTTER_SOCKET";

/// Environment variable selecting the run mode (`production` enables the camera).
pub const MODE_ENV: &str = "SHUTTER_ENV";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterConfig {
    /// Drive the real camera. When false, photo requests return a canned example.
    pub production: bool,
    pub camera: CameraConfig,
    pub photo: PhotoConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
}

impl Default for ShutterConfig {
    fn default() -> Self {
        Self {
            production: false,
            camera: CameraConfig::default(),
            photo: PhotoConfig::default(),
            stream: StreamConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ShutterConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("shutter").join("config.toml"))
    }

    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        let config = config.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies `SHUTTER_SOCKET` / `SHUTTER_ENV` as returned by `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup(SOCKET_ENV).filter(|s| !s.is_empty()) {
            self.server.socket_path = PathBuf::from(socket);
        }
        if let Some(mode) = lookup(MODE_ENV) {
            self.production = mode.eq_ignore_ascii_case("production");
        }
        self
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.binary.trim().is_empty() {
            return Err(invalid("camera.binary", "must not be empty"));
        }
        if self.camera.poll_interval_ms == 0 {
            return Err(invalid("camera.poll_interval_ms", "must be positive"));
        }
        if self.photo.timeout_secs == 0 {
            return Err(invalid("photo.timeout_secs", "must be positive"));
        }
        if is_temporary_artifact(&self.stream.file_name) || self.stream.file_name.is_empty() {
            return Err(invalid(
                "stream.file_name",
                "must be a plain file name without '~'",
            ));
        }
        for (field, params) in [
            ("photo.params", &self.photo.params),
            ("stream.params", &self.stream.params),
        ] {
            if params.width == 0 || params.height == 0 {
                return Err(invalid(field, "width and height must be positive"));
            }
        }
        Ok(())
    }

    /// Command that runs the camera in live-view mode.
    pub fn stream_command(&self) -> CameraCommand {
        let output = self.stream.frame_path();
        CameraCommand::new(
            &self.camera.binary,
            self.stream.params.to_args(&output, &[]),
        )
    }

    /// Describes a single photo capture with the configured parameters.
    pub fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            directory: self.photo.directory.clone(),
            naming: self.photo.naming.clone(),
            params: self.photo.params.clone(),
            timeout: self.photo.timeout(),
        }
    }

    /// How often the filesystem is polled for new artifacts.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.camera.poll_interval_ms)
    }

    /// Resolves relative directories against `base`.
    ///
    /// Needed before daemonizing, which changes the working directory.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        for dir in [
            &mut self.photo.directory,
            &mut self.stream.directory,
            &mut self.server.socket_path,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// The external camera tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Executable name or path
    pub binary: String,

    /// Filesystem polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            binary: "raspistill".to_string(),
            poll_interval_ms: 100,
        }
    }
}

/// Opaque parameters handed to the camera tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    pub width: u32,
    pub height: u32,
    pub quality: Option<u8>,
    pub encoding: Option<String>,
    /// Auto white balance mode
    pub awb: Option<String>,
    /// `-t`: how long the tool runs before exiting
    pub run_duration_ms: Option<u64>,
    /// `-tl`: interval between frames in timelapse mode
    pub timelapse_ms: Option<u64>,
    /// Passed through verbatim after the generated flags
    pub extra_args: Vec<String>,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self::photo()
    }
}

impl CameraParams {
    /// Full-resolution still.
    pub fn photo() -> Self {
        Self {
            width: 2592,
            height: 1944,
            quality: Some(100),
            encoding: Some("jpg".to_string()),
            awb: Some("auto".to_string()),
            run_duration_ms: None,
            timelapse_ms: None,
            extra_args: Vec::new(),
        }
    }

    /// Low-resolution frames every 50ms, running until killed.
    pub fn live_view() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: None,
            encoding: None,
            awb: None,
            run_duration_ms: Some(999_999_999),
            timelapse_ms: Some(50),
            extra_args: Vec::new(),
        }
    }

    /// Builds the raspistill-style argument list writing to `output`.
    pub fn to_args(&self, output: &Path, naming_flags: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-w".to_string(),
            self.width.to_string(),
            "-h".to_string(),
            self.height.to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        if let Some(ms) = self.run_duration_ms {
            args.push("-t".to_string());
            args.push(ms.to_string());
        }
        if let Some(ms) = self.timelapse_ms {
            args.push("-tl".to_string());
            args.push(ms.to_string());
        }
        if let Some(quality) = self.quality {
            args.push("-q".to_string());
            args.push(quality.to_string());
        }
        if let Some(encoding) = &self.encoding {
            args.push("-e".to_string());
            args.push(encoding.clone());
        }
        if let Some(awb) = &self.awb {
            args.push("-awb".to_string());
            args.push(awb.clone());
        }
        args.extend(naming_flags.iter().map(|f| f.to_string()));
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Photo capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    /// Directory the photos are written to and served from
    pub directory: PathBuf,
    /// How the tool names its output inside `directory`
    pub naming: ArtifactNaming,
    pub params: CameraParams,
    /// Upper bound on waiting for the camera
    pub timeout_secs: u64,
    /// File returned in non-production mode (relative to `directory`)
    pub example_file: String,
    /// Simulated latency in non-production mode
    pub example_delay_ms: u64,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("public/photos"),
            naming: ArtifactNaming::fixed("_photo.jpg"),
            params: CameraParams::photo(),
            timeout_secs: 30,
            example_file: "example.jpg".to_string(),
            example_delay_ms: 500,
        }
    }
}

impl PhotoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn example_delay(&self) -> Duration {
        Duration::from_millis(self.example_delay_ms)
    }
}

/// Live-view settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Directory holding the live frame
    pub directory: PathBuf,
    /// Frame file, overwritten by the tool on every frame
    pub file_name: String,
    pub params: CameraParams,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("stream"),
            file_name: "image_stream.jpg".to_string(),
            params: CameraParams::live_view(),
        }
    }
}

impl StreamConfig {
    pub fn frame_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Socket server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// A fully resolved command line for the camera tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CameraCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CameraCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Everything needed to take one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Where the tool writes and where the renamed photo ends up
    pub directory: PathBuf,
    pub naming: ArtifactNaming,
    pub params: CameraParams,
    /// Deadline for the first complete artifact
    pub timeout: Duration,
}

impl CaptureRequest {
    /// Command line for `binary` honouring this request.
    pub fn command(&self, binary: &str) -> CameraCommand {
        let output = self.naming.output_path(&self.directory);
        CameraCommand::new(binary, self.params.to_args(&output, self.naming.tool_flags()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ShutterConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.production);
        assert_eq!(config.server.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_stream_command_matches_live_view_flags() {
        let config = ShutterConfig::default();
        let cmd = config.stream_command();
        assert_eq!(cmd.program, "raspistill");
        assert_eq!(
            cmd.args,
            vec![
                "-w", "640", "-h", "480", "-o", "stream/image_stream.jpg", "-t", "999999999",
                "-tl", "50"
            ]
        );
    }

    #[test]
    fn test_capture_command() {
        let config = ShutterConfig::default();
        let request = config.capture_request();
        let cmd = request.command(&config.camera.binary);
        assert!(cmd.args.contains(&"public/photos/_photo.jpg".to_string()));
        assert!(cmd.to_string().starts_with("raspistill -w 2592 -h 1944"));
        assert!(cmd.to_string().ends_with("-q 100 -e jpg -awb auto"));
        assert_eq!(request.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ShutterConfig::from_toml(
            r#"
            production = true

            [photo]
            directory = "/srv/photos"
            timeout_secs = 5

            [photo.naming]
            kind = "sequence"
            prefix = "shot"
            extension = "jpg"
            "#,
        )
        .unwrap();

        assert!(config.production);
        assert_eq!(config.photo.directory, PathBuf::from("/srv/photos"));
        assert_eq!(config.photo.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.photo.naming,
            ArtifactNaming::Sequence {
                prefix: "shot".to_string(),
                extension: "jpg".to_string(),
                digits: 4,
            }
        );
        assert_eq!(config.stream, StreamConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = ShutterConfig::default().with_env_overrides(|key| match key {
            SOCKET_ENV => Some("/run/shutter.sock".to_string()),
            MODE_ENV => Some("PRODUCTION".to_string()),
            _ => None,
        });
        assert_eq!(config.server.socket_path, PathBuf::from("/run/shutter.sock"));
        assert!(config.production);
    }

    #[test]
    fn test_validate_rejects_temp_stream_name() {
        let mut config = ShutterConfig::default();
        config.stream.file_name = "frame.jpg~".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "stream.file_name"
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[camera]\nbinary = \"libcamera-still\"\n").unwrap();

        let config = ShutterConfig::from_file(&path).unwrap();
        assert_eq!(config.camera.binary, "libcamera-still");

        let missing = ShutterConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_anchored_at_keeps_absolute_paths() {
        let mut config = ShutterConfig::default();
        config.server.socket_path = PathBuf::from("/run/shutter.sock");

        let config = config.anchored_at(Path::new("/srv/shutter"));
        assert_eq!(config.photo.directory, PathBuf::from("/srv/shutter/public/photos"));
        assert_eq!(config.stream.directory, PathBuf::from("/srv/shutter/stream"));
        assert_eq!(config.server.socket_path, PathBuf::from("/run/shutter.sock"));
    }
}
