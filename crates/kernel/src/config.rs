//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Default allowed extensions.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "pdf", "docx", "doc", "xlsx", "webp",
];

/// Default maximum upload size (10 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum stored image width and height.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 4000;

/// Default JPEG re-encode quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Default number of concurrent blocking upload/delete workers.
pub const DEFAULT_UPLOAD_WORKERS: usize = 4;

/// Ingestion configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root; every stored file lives below it (default: ./uploads).
    pub uploads_dir: PathBuf,

    /// Base URL prefix for public links (default: /files).
    pub files_url: String,

    /// Maximum upload size in bytes (default: 10 MiB).
    pub max_upload_size: u64,

    /// Maximum stored image width in pixels (default: 4000).
    pub max_image_width: u32,

    /// Maximum stored image height in pixels (default: 4000).
    pub max_image_height: u32,

    /// Lower-cased extensions without the leading dot.
    pub allowed_extensions: Vec<String>,

    /// JPEG re-encode quality, 1..=100 (default: 85).
    pub jpeg_quality: u8,

    /// Size of the blocking worker pool (default: 4).
    pub upload_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("./uploads"),
            files_url: "/files".to_string(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_image_width: DEFAULT_MAX_IMAGE_DIMENSION,
            max_image_height: DEFAULT_MAX_IMAGE_DIMENSION,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
        }
    }
}

impl Config {
    /// Default configuration rooted at `uploads_dir`.
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let uploads_dir = lookup("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.uploads_dir);

        let files_url = lookup("FILES_URL").unwrap_or(defaults.files_url);

        let max_upload_size = parse_or(&lookup, "MAX_UPLOAD_SIZE", defaults.max_upload_size)
            .context("MAX_UPLOAD_SIZE must be a valid u64")?;

        let max_image_width = parse_or(&lookup, "MAX_IMAGE_WIDTH", defaults.max_image_width)
            .context("MAX_IMAGE_WIDTH must be a valid u32")?;

        let max_image_height = parse_or(&lookup, "MAX_IMAGE_HEIGHT", defaults.max_image_height)
            .context("MAX_IMAGE_HEIGHT must be a valid u32")?;

        let allowed_extensions = lookup("ALLOWED_EXTENSIONS")
            .map(|v| parse_extensions(&v))
            .unwrap_or(defaults.allowed_extensions);

        let jpeg_quality: u8 = parse_or(&lookup, "JPEG_QUALITY", defaults.jpeg_quality)
            .context("JPEG_QUALITY must be a valid u8")?;

        let upload_workers: usize = parse_or(&lookup, "UPLOAD_WORKERS", defaults.upload_workers)
            .context("UPLOAD_WORKERS must be a valid usize")?;

        if max_image_width == 0 || max_image_height == 0 {
            anyhow::bail!("MAX_IMAGE_WIDTH and MAX_IMAGE_HEIGHT must be non-zero");
        }

        Ok(Self {
            uploads_dir,
            files_url,
            max_upload_size,
            max_image_width,
            max_image_height,
            allowed_extensions,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            upload_workers: upload_workers.max(1),
        })
    }

    /// Whether `extension` (any case, with or without a leading dot) is allowed.
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        let ext = normalize_extension(extension);
        !ext.is_empty() && self.allowed_extensions.iter().any(|a| *a == ext)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => Ok(raw.trim().parse()?),
        None => Ok(default),
    }
}

/// Parse a comma-separated extension list.
fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_extension)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lower-case an extension and strip any leading dots.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}
