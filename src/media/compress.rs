use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

use super::{MediaError, MediaFile};

/// Longest edge after compression, in pixels.
pub const MAX_DIMENSION: u32 = 1200;
pub const JPEG_QUALITY: u8 = 85;

/// Scales `(width, height)` down so neither exceeds `max`, keeping the
/// aspect ratio. Smaller images are returned unchanged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = max as f64 / width.max(height) as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

pub fn compress_image(data: &[u8]) -> Result<Vec<u8>, MediaError> {
    let img = image::load_from_memory(data).map_err(|e| MediaError::Decode(e.to_string()))?;

    let (width, height) = img.dimensions();
    let (target_w, target_h) = fit_within(width, height, MAX_DIMENSION);
    let img = if (target_w, target_h) != (width, height) {
        img.resize_exact(target_w, target_h, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::with_capacity(data.len() / 2);
    rgb.write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    tracing::debug!(
        original_bytes = data.len(),
        compressed_bytes = out.len(),
        width = target_w,
        height = target_h,
        "image compressed"
    );
    Ok(out)
}

/// Compression is best effort: any failure hands back the original file.
pub fn compress_or_original(file: MediaFile) -> MediaFile {
    match compress_image(&file.data) {
        Ok(bytes) => {
            let stem = std::path::Path::new(&file.file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("photo");
            MediaFile::new(format!("{stem}.jpg"), mime::IMAGE_JPEG.as_ref(), bytes)
        }
        Err(e) => {
            tracing::warn!(file_name = %file.file_name, error = %e, "compression failed, uploading original");
            file
        }
    }
}

/// [`compress_or_original`] on tokio's blocking pool. Decoding and
/// re-encoding a large photo takes long enough to stall a request worker.
pub async fn compress_on_blocking_pool(file: MediaFile) -> MediaFile {
    let original = file.clone();
    match tokio::task::spawn_blocking(move || compress_or_original(file)).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(file_name = %original.file_name, error = %e, "compression task failed, uploading original");
            original
        }
    }
}
