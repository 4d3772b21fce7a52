//! Image uploads stored on local disk.
//!
//! Only the declared MIME type is checked; file contents are not inspected.
//! Nothing ever deletes an upload, including when the story using it is removed.

use chrono::Utc;
use log::info;
use rand::Rng;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Largest accepted image, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Public URL prefix under which the upload directory is served.
pub const UPLOAD_URL_PREFIX: &str = "/uploads";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file uploaded")]
    Missing,

    #[error("Only image files are allowed")]
    NotAnImage,

    #[error("File too large")]
    TooLarge,

    #[error("Failed to store file: {0}")]
    Io(#[from] std::io::Error),
}

/// Check the declared type and size of an upload.
///
/// # Errors
/// * `UploadError::NotAnImage` unless the MIME type is `image/*`
/// * `UploadError::TooLarge` if `len` exceeds [`MAX_UPLOAD_BYTES`]
pub fn validate_upload(content_type: Option<&str>, len: usize) -> Result<(), UploadError> {
    let is_image = content_type.is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
    if !is_image {
        return Err(UploadError::NotAnImage);
    }
    if len > MAX_UPLOAD_BYTES {
        return Err(UploadError::TooLarge);
    }
    Ok(())
}

fn clean_extension(ext: &str) -> Option<String> {
    let ext = ext.to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Extension for a stored file: taken from the client's filename, or else from
/// the MIME subtype (`image/svg+xml` -> `svg`).
pub fn extension_for(original_name: Option<&str>, content_type: &str) -> Option<String> {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .and_then(clean_extension)
        .or_else(|| {
            let subtype = content_type.split_once('/')?.1;
            let subtype = subtype.split(['+', ';']).next()?.trim();
            match subtype {
                "jpeg" => Some("jpg".to_string()),
                other => clean_extension(other),
            }
        })
}

/// `<field>-<unix-millis>-<random>.<ext>`
pub fn unique_filename(field: &str, original_name: Option<&str>, content_type: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    let stem = format!("{field}-{}-{suffix}", Utc::now().timestamp_millis());

    match extension_for(original_name, content_type) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Validate and write an uploaded image into `dir`, returning its public URL.
///
/// # Errors
/// * Any validation error from [`validate_upload`]
/// * `UploadError::Io` if the directory or file cannot be written
pub async fn store_upload(
    dir: &Path,
    field: &str,
    original_name: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<String, UploadError> {
    validate_upload(content_type, bytes.len())?;

    fs::create_dir_all(dir).await?;
    let filename = unique_filename(field, original_name, content_type.unwrap_or_default());
    fs::write(dir.join(&filename), bytes).await?;

    info!("Stored upload {filename} ({} bytes)", bytes.len());
    Ok(format!("{UPLOAD_URL_PREFIX}/{filename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_and_non_image_files() {
        assert!(matches!(
            validate_upload(Some("image/jpeg"), 6 * 1024 * 1024),
            Err(UploadError::TooLarge)
        ));
        assert!(matches!(
            validate_upload(Some("text/plain"), 10),
            Err(UploadError::NotAnImage)
        ));
        assert!(matches!(validate_upload(None, 10), Err(UploadError::NotAnImage)));
    }

    #[test]
    fn accepts_images_up_to_the_limit() {
        assert!(validate_upload(Some("image/png"), 1024 * 1024).is_ok());
        assert!(validate_upload(Some("IMAGE/WEBP"), MAX_UPLOAD_BYTES).is_ok());
        assert!(validate_upload(Some("image/png"), MAX_UPLOAD_BYTES + 1).is_err());
    }

    #[test]
    fn extension_comes_from_filename_or_mime() {
        assert_eq!(extension_for(Some("Photo.JPG"), "image/jpeg").as_deref(), Some("jpg"));
        assert_eq!(extension_for(Some("noext"), "image/jpeg").as_deref(), Some("jpg"));
        assert_eq!(extension_for(None, "image/svg+xml").as_deref(), Some("svg"));
        assert_eq!(extension_for(Some("evil.p/hp"), "image/png").as_deref(), Some("png"));
        assert_eq!(extension_for(None, "image/"), None);
    }

    #[test]
    fn filenames_are_unique_and_well_formed() {
        let a = unique_filename("image", Some("cover.png"), "image/png");
        let b = unique_filename("image", Some("cover.png"), "image/png");
        assert_ne!(a, b);

        let parts: Vec<&str> = a.trim_end_matches(".png").split('-').collect();
        assert!(a.ends_with(".png"));
        assert_eq!(parts[0], "image");
        assert!(parts[1].parse::<i64>().is_ok());
        assert!(parts[2].parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn stores_file_and_returns_relative_url() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("uploads");
        let bytes = vec![0u8; 1024 * 1024];

        let url = store_upload(&target, "image", Some("cover.png"), Some("image/png"), &bytes)
            .await
            .unwrap();

        assert!(url.starts_with("/uploads/image-"));
        let name = url.trim_start_matches("/uploads/");
        assert_eq!(std::fs::metadata(target.join(name)).unwrap().len(), bytes.len() as u64);
    }

    #[tokio::test]
    async fn rejected_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("uploads");

        let err = store_upload(&target, "image", Some("notes.txt"), Some("text/plain"), b"hi")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage));
        assert!(!target.exists());
    }
}
