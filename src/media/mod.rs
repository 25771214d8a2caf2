//! Turning a user-selected file into something the analysis can consume.

pub mod compress;
pub mod video;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::{get_video_duration, is_valid_file_size, is_valid_file_type};
use video::VideoProbe;

pub const MAX_FILE_SIZE_MB: u64 = 100;
pub const MIN_VIDEO_SECONDS: f64 = 1.0;
pub const MAX_VIDEO_SECONDS: f64 = 120.0;

pub const IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];
pub const VIDEO_TYPES: [&str; 5] = [
    "video/mp4",
    "video/quicktime",
    "video/webm",
    "video/x-msvideo",
    "video/avi",
];

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid file type. Please upload a JPEG or PNG image, or an MP4, MOV, WebM or AVI video.")]
    InvalidType,

    #[error("File is too large ({size_mb:.2}MB). Maximum size is 100MB.")]
    TooLarge { size_mb: f64 },

    #[error("Video is too short ({seconds:.1} seconds). Minimum duration is 1 second.")]
    TooShort { seconds: f64 },

    #[error("Video is too long ({seconds:.1} seconds). Maximum duration is 2 minutes.")]
    TooLong { seconds: f64 },

    #[error("Could not read video metadata: {0}")]
    Metadata(String),

    #[error("Could not decode media: {0}")]
    Decode(String),

    #[error("Could not encode media: {0}")]
    Encode(String),

    #[error("Media tool failed: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether the user picked an unacceptable file, as opposed to the
    /// machinery failing on an acceptable one.
    pub fn is_selection_error(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidType
                | MediaError::TooLarge { .. }
                | MediaError::TooShort { .. }
                | MediaError::TooLong { .. }
                | MediaError::Metadata(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn size_mb(&self) -> f64 {
        self.size() as f64 / (1024.0 * 1024.0)
    }

    /// Declared type, or a guess from the extension when the declared one is
    /// missing or generic.
    pub fn effective_content_type(&self) -> String {
        let declared = self.content_type.trim().to_ascii_lowercase();
        if declared.is_empty() || declared == mime::APPLICATION_OCTET_STREAM.as_ref() {
            return mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
        }
        declared
    }

    pub fn extension(&self) -> &str {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
    }
}

pub fn classify(file: &MediaFile) -> Result<MediaKind, MediaError> {
    let content_type = file.effective_content_type();
    if !is_valid_file_type(&content_type, &crate::validation::DEFAULT_ALLOWED_PREFIXES) {
        return Err(MediaError::InvalidType);
    }
    if IMAGE_TYPES.contains(&content_type.as_str()) {
        Ok(MediaKind::Image)
    } else if VIDEO_TYPES.contains(&content_type.as_str()) {
        Ok(MediaKind::Video)
    } else {
        Err(MediaError::InvalidType)
    }
}

/// A file that passed every selection check.
#[derive(Debug, Clone)]
pub struct SelectedMedia {
    pub file: MediaFile,
    pub kind: MediaKind,
    pub duration_seconds: Option<f64>,
}

/// Type, size and (for videos) duration checks, in that order. On error
/// nothing is kept selected; the caller gets only the message.
pub async fn select_file(file: MediaFile, probe: &dyn VideoProbe) -> Result<SelectedMedia, MediaError> {
    let kind = classify(&file)?;

    if !is_valid_file_size(file.size(), MAX_FILE_SIZE_MB) {
        return Err(MediaError::TooLarge {
            size_mb: file.size_mb(),
        });
    }

    let duration_seconds = match kind {
        MediaKind::Image => None,
        MediaKind::Video => {
            let seconds = get_video_duration(probe, &file).await?;
            if seconds < MIN_VIDEO_SECONDS {
                return Err(MediaError::TooShort { seconds });
            }
            if seconds > MAX_VIDEO_SECONDS {
                return Err(MediaError::TooLong { seconds });
            }
            Some(seconds)
        }
    };

    tracing::debug!(
        file_name = %file.file_name,
        kind = kind.as_str(),
        size_bytes = file.size(),
        "file selected"
    );

    Ok(SelectedMedia {
        file,
        kind,
        duration_seconds,
    })
}
