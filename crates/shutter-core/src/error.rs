//! Domain-specific error types following panic-free policy.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving the external camera process or the photo
/// directory.
///
/// Each variant maps to a stable machine-readable code (see [`CameraError::code`])
/// so clients can distinguish "camera missing" from "camera slow".
#[derive(Error, Debug, Clone)]
pub enum CameraError {
    /// The camera executable could not be started (missing, not executable).
    #[error("Failed to start camera process `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    /// No complete artifact appeared before the deadline, or the process
    /// exited without producing one.
    #[error("Camera timed out after {waited:?}")]
    CaptureTimeout { waited: Duration },

    /// The finished artifact could not be moved to its permanent name.
    /// The artifact stays at `from`.
    #[error("Failed to rename {from} to {to}: {reason}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// The photo directory could not be enumerated or a file could not be stat'ed.
    #[error("Could not read photos directory {path}: {reason}")]
    DirectoryRead { path: PathBuf, reason: String },
}

impl CameraError {
    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn_failure",
            Self::CaptureTimeout { .. } => "capture_timeout",
            Self::Rename { .. } => "rename_failure",
            Self::DirectoryRead { .. } => "directory_read_failure",
        }
    }

    /// Creates a spawn error from any displayable cause.
    pub fn spawn<E: std::fmt::Display>(program: impl Into<String>, err: E) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: err.to_string(),
        }
    }

    /// Creates a directory read error from any displayable cause.
    pub fn directory_read<E: std::fmt::Display>(path: impl Into<PathBuf>, err: E) -> Self {
        Self::DirectoryRead {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let spawn = CameraError::spawn("raspistill", "No such file or directory");
        let timeout = CameraError::CaptureTimeout {
            waited: Duration::from_secs(30),
        };
        assert_eq!(spawn.code(), "spawn_failure");
        assert_eq!(timeout.code(), "capture_timeout");
        assert_ne!(spawn.code(), timeout.code());
    }

    #[test]
    fn test_error_display() {
        let err = CameraError::spawn("raspistill", "permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to start camera process `raspistill`: permission denied"
        );

        let err = CameraError::directory_read("/srv/photos", "not found");
        assert!(err.to_string().contains("/srv/photos"));
        assert_eq!(err.code(), "directory_read_failure");
    }
}
