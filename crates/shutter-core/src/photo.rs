//! Photo artifacts: naming policy, temp-file detection and the captured photo record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// URL prefix under which the photo directory is served.
pub const PHOTOS_URL_PREFIX: &str = "photos";

/// Marker the camera tool puts in the name of a file it is still writing.
pub const TEMP_MARKER: char = '~';

/// Returns true if `file_name` is an in-progress artifact (e.g. `_photo.jpg~`).
///
/// Such files are candidates only and must never be reported as ready.
pub fn is_temporary_artifact(file_name: &str) -> bool {
    file_name.contains(TEMP_MARKER)
}

/// How the camera tool names the files it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactNaming {
    /// One fixed file name, overwritten on every capture (`_photo.jpg`).
    Fixed { file_name: String },

    /// Numbered frames (`frame0001.jpg`), passed to the tool as a printf pattern.
    Sequence {
        prefix: String,
        extension: String,
        #[serde(default = "default_sequence_digits")]
        digits: u8,
    },

    /// Names chosen by the tool itself (timestamp or hash); only the
    /// extension is known in advance.
    Opaque { extension: String },
}

fn default_sequence_digits() -> u8 {
    4
}

impl ArtifactNaming {
    /// Creates a fixed-name policy.
    pub fn fixed(file_name: impl Into<String>) -> Self {
        Self::Fixed {
            file_name: file_name.into(),
        }
    }

    /// The `-o` argument for the camera tool.
    pub fn output_path(&self, dir: &Path) -> PathBuf {
        match self {
            Self::Fixed { file_name } => dir.join(file_name),
            Self::Sequence {
                prefix,
                extension,
                digits,
            } => dir.join(format!("{prefix}%0{digits}d.{extension}")),
            Self::Opaque { extension } => dir.join(format!("%d.{extension}")),
        }
    }

    /// Extra flags the tool needs to honour this naming policy.
    pub fn tool_flags(&self) -> &'static [&'static str] {
        match self {
            Self::Opaque { .. } => &["-ts"],
            Self::Fixed { .. } | Self::Sequence { .. } => &[],
        }
    }

    /// Returns true if a finished (non-temporary) file called `file_name`
    /// was produced under this policy.
    pub fn matches(&self, file_name: &str) -> bool {
        if is_temporary_artifact(file_name) {
            return false;
        }

        match self {
            Self::Fixed { file_name: expected } => file_name == expected,
            Self::Sequence {
                prefix, extension, ..
            } => file_name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(extension.as_str()))
                .and_then(|rest| rest.strip_suffix('.'))
                .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false),
            Self::Opaque { extension } => Path::new(file_name)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Last stamp handed out, in milliseconds since the epoch.
static LAST_STAMP_MS: AtomicI64 = AtomicI64::new(0);

/// A strictly increasing millisecond timestamp used to name finished photos.
///
/// Two stamps taken in sequence never compare equal, even when the wall
/// clock has not advanced or has stepped backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhotoStamp(i64);

impl PhotoStamp {
    /// Takes the next stamp from the wall clock.
    pub fn next() -> Self {
        Self::next_after(Utc::now())
    }

    /// Takes the next stamp, treating `now` as the current wall-clock time.
    pub fn next_after(now: DateTime<Utc>) -> Self {
        let now_ms = now.timestamp_millis();
        let mut previous = LAST_STAMP_MS.load(Ordering::SeqCst);
        loop {
            let candidate = now_ms.max(previous.saturating_add(1));
            match LAST_STAMP_MS.compare_exchange(
                previous,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Self(candidate),
                Err(actual) => previous = actual,
            }
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// The instant this stamp stands for.
    pub fn captured_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// File name for a photo taken at this stamp, keeping `extension` if any.
    pub fn file_name(&self, extension: Option<&str>) -> String {
        match extension {
            Some(ext) if !ext.is_empty() => format!("{}.{ext}", self.0),
            _ => self.0.to_string(),
        }
    }
}

/// A finished photo sitting in the photo directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    /// File name inside `directory`
    pub file_name: String,

    /// Directory holding the photo
    pub directory: PathBuf,

    /// Capture time (wall clock at rename, or file creation time when listed)
    pub captured_at: DateTime<Utc>,
}

impl CapturedPhoto {
    pub fn new(
        file_name: impl Into<String>,
        directory: impl Into<PathBuf>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            directory: directory.into(),
            captured_at,
        }
    }

    /// Path relative to the served root, e.g. `photos/1700000000000.jpg`.
    pub fn src(&self) -> String {
        format!("{PHOTOS_URL_PREFIX}/{}", self.file_name)
    }

    /// Absolute location on disk.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_artifact_detection() {
        assert!(is_temporary_artifact("_photo.jpg~"));
        assert!(is_temporary_artifact("image_stream.jpg~123"));
        assert!(!is_temporary_artifact("_photo.jpg"));
    }

    #[test]
    fn test_fixed_naming() {
        let naming = ArtifactNaming::fixed("_photo.jpg");
        assert!(naming.matches("_photo.jpg"));
        assert!(!naming.matches("_photo.jpg~"));
        assert!(!naming.matches("other.jpg"));
        assert_eq!(
            naming.output_path(Path::new("/srv/photos")),
            PathBuf::from("/srv/photos/_photo.jpg")
        );
    }

    #[test]
    fn test_sequence_naming() {
        let naming = ArtifactNaming::Sequence {
            prefix: "frame".to_string(),
            extension: "jpg".to_string(),
            digits: 4,
        };
        assert!(naming.matches("frame0001.jpg"));
        assert!(!naming.matches("frame.jpg"));
        assert!(!naming.matches("frame00a1.jpg"));
        assert!(!naming.matches("frame0001.jpg~"));
        assert_eq!(
            naming.output_path(Path::new("out")),
            PathBuf::from("out/frame%04d.jpg")
        );
    }

    #[test]
    fn test_opaque_naming() {
        let naming = ArtifactNaming::Opaque {
            extension: "jpg".to_string(),
        };
        assert!(naming.matches("1699999999.jpg"));
        assert!(naming.matches("a1b2c3.JPG"));
        assert!(!naming.matches("a1b2c3.png"));
        assert_eq!(naming.tool_flags(), &["-ts"]);
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let frozen = Utc::now();
        let a = PhotoStamp::next_after(frozen);
        let b = PhotoStamp::next_after(frozen);
        let c = PhotoStamp::next();
        assert!(a < b);
        assert!(b < c);
        assert_ne!(a.file_name(Some("jpg")), b.file_name(Some("jpg")));
    }

    #[test]
    fn test_stamp_file_name() {
        let stamp = PhotoStamp::next();
        let name = stamp.file_name(Some("jpg"));
        assert_eq!(name, format!("{}.jpg", stamp.as_millis()));
        assert_eq!(stamp.file_name(None), stamp.as_millis().to_string());
        assert_eq!(stamp.captured_at().timestamp_millis(), stamp.as_millis());
    }

    #[test]
    fn test_captured_photo_src() {
        let photo = CapturedPhoto::new("example.jpg", "/srv/photos", Utc::now());
        assert_eq!(photo.src(), "photos/example.jpg");
        assert_eq!(photo.path(), PathBuf::from("/srv/photos/example.jpg"));
    }
}
