use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::future::join_all;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::compress::compress_on_blocking_pool;
use super::{MediaError, MediaFile};

/// Frames sampled from every video.
pub const FRAME_COUNT: usize = 5;

/// Reads what the analysis needs out of a video container.
#[async_trait]
pub trait VideoProbe: Send + Sync {
    async fn duration_seconds(&self, file: &MediaFile) -> Result<f64, MediaError>;

    /// One JPEG per requested timestamp, in order.
    async fn frames_at(&self, file: &MediaFile, timestamps: &[f64]) -> Result<Vec<Vec<u8>>, MediaError>;
}

/// `duration × i / (count + 1)` for `i = 1..=count`; never the very first or
/// last instant.
pub fn frame_timestamps(duration_seconds: f64, count: usize) -> Vec<f64> {
    (1..=count)
        .map(|i| duration_seconds * i as f64 / (count as f64 + 1.0))
        .collect()
}

/// Samples [`FRAME_COUNT`] evenly spaced JPEG stills, bounded to the same
/// size as uploaded photos.
pub async fn extract_frames(
    probe: &dyn VideoProbe,
    file: &MediaFile,
    duration_seconds: f64,
) -> Result<Vec<MediaFile>, MediaError> {
    let timestamps = frame_timestamps(duration_seconds, FRAME_COUNT);
    let stills = probe.frames_at(file, &timestamps).await?;
    if stills.len() != timestamps.len() {
        return Err(MediaError::Decode(format!(
            "expected {} frames, got {}",
            timestamps.len(),
            stills.len()
        )));
    }

    let stem = Path::new(&file.file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");

    let frames = stills.into_iter().enumerate().map(|(i, bytes)| {
        compress_on_blocking_pool(MediaFile::new(
            format!("{stem}_frame_{}.jpg", i + 1),
            mime::IMAGE_JPEG.as_ref(),
            bytes,
        ))
    });
    Ok(join_all(frames).await)
}

/// Shells out to `ffprobe`/`ffmpeg`. The upload is spooled to a temporary
/// file that is removed when the call returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegProbe {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn spool(file: &MediaFile) -> Result<NamedTempFile, MediaError> {
        let suffix = match file.extension() {
            "" => String::new(),
            ext => format!(".{ext}"),
        };
        let temp = tempfile::Builder::new()
            .prefix("petdecoder-")
            .suffix(&suffix)
            .tempfile()?;
        tokio::fs::write(temp.path(), &file.data).await?;
        Ok(temp)
    }

    async fn frame_at(&self, path: &Path, seconds: f64) -> Result<Vec<u8>, MediaError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss"])
            .arg(format!("{seconds:.3}"))
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "mjpeg", "-q:v", "3", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MediaError::Tool(format!("{}: {e}", self.ffmpeg)))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(MediaError::Decode(format!(
                "no frame at {seconds:.2}s: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VideoProbe for FfmpegProbe {
    async fn duration_seconds(&self, file: &MediaFile) -> Result<f64, MediaError> {
        let temp = Self::spool(file).await?;

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(temp.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MediaError::Tool(format!("{}: {e}", self.ffprobe)))?;

        if !output.status.success() {
            return Err(MediaError::Metadata(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn frames_at(&self, file: &MediaFile, timestamps: &[f64]) -> Result<Vec<Vec<u8>>, MediaError> {
        let temp = Self::spool(file).await?;
        let mut frames = Vec::with_capacity(timestamps.len());
        for &seconds in timestamps {
            frames.push(self.frame_at(temp.path(), seconds).await?);
        }
        Ok(frames)
    }
}

fn parse_duration(raw: &str) -> Result<f64, MediaError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(MediaError::Metadata(format!(
            "unreadable duration '{trimmed}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubProbe;

    #[test]
    fn timestamps_are_evenly_spaced_inside_the_clip() {
        let ts = frame_timestamps(12.0, 5);
        assert_eq!(ts, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
        assert!(frame_timestamps(1.0, 5).iter().all(|t| *t > 0.0 && *t < 1.0));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("12.480000\n").unwrap(), 12.48);
        assert!(matches!(parse_duration("N/A"), Err(MediaError::Metadata(_))));
        assert!(parse_duration("").is_err());
    }

    #[tokio::test]
    async fn extract_frames_names_each_still() {
        let file = MediaFile::new("walk.mp4", "video/mp4", vec![0u8; 8]);
        let frames = extract_frames(&StubProbe::with_duration(6.0), &file, 6.0)
            .await
            .unwrap();
        assert_eq!(frames.len(), FRAME_COUNT);
        assert_eq!(frames[0].file_name, "walk_frame_1.jpg");
        assert_eq!(frames[4].file_name, "walk_frame_5.jpg");
        assert!(frames.iter().all(|f| f.content_type == "image/jpeg"));
    }

    #[tokio::test]
    async fn spooled_file_is_removed_after_use() {
        let file = MediaFile::new("clip.mp4", "video/mp4", vec![1u8, 2, 3]);
        let path = {
            let temp = FfmpegProbe::spool(&file).await.unwrap();
            assert!(temp.path().to_string_lossy().ends_with(".mp4"));
            assert_eq!(std::fs::read(temp.path()).unwrap(), vec![1, 2, 3]);
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let probe = FfmpegProbe::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let file = MediaFile::new("clip.mp4", "video/mp4", vec![0u8; 8]);
        let err = probe.duration_seconds(&file).await.unwrap_err();
        assert!(matches!(err, MediaError::Tool(_)));
    }
}
