//! Intake test utilities.
//!
//! Fixture builders for integration tests: encoded images of a given
//! size, document headers, and temporary storage roots.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;

/// Minimal but well-formed PDF.
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n";

/// OLE2 compound document header followed by padding, as in legacy `.doc`.
pub fn doc_bytes() -> Vec<u8> {
    let mut data = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    data.resize(512, 0);
    data
}

/// ZIP local-file header followed by padding, as in `.docx`/`.xlsx`.
pub fn docx_bytes() -> Vec<u8> {
    let mut data = vec![0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x06, 0x00];
    data.resize(256, 0);
    data
}

/// Deterministic filler of `len` bytes.
pub fn filler(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Encode a solid image of `width` x `height` in `format`.
///
/// Panics if encoding fails; fixtures are test-only.
#[allow(clippy::expect_used)]
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 120, 200])))
    } else {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([30, 120, 200, 255]),
        ))
    };
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).expect("fixture image encodes");
    buf.into_inner()
}

/// PNG fixture.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Png)
}

/// JPEG fixture.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Jpeg)
}

/// Decoded dimensions of an encoded image.
#[allow(clippy::expect_used)]
pub fn dimensions_of(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).expect("fixture image decodes");
    (img.width(), img.height())
}

/// A temporary directory holding a storage root.
///
/// The root itself is a subdirectory so tests can also check that nothing
/// lands next to it.
pub struct TestRoot {
    dir: TempDir,
    root: PathBuf,
}

impl TestRoot {
    /// Create a fresh temporary root.
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("storage");
        Self { dir, root }
    }

    /// The storage root path (may not exist yet).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory containing the storage root.
    pub fn outer(&self) -> &Path {
        self.dir.path()
    }

    /// Every regular file under `outer()` that is not inside the root.
    pub fn files_outside_root(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        walk(self.dir.path(), &mut found);
        found
            .into_iter()
            .filter(|p| !p.starts_with(&self.root))
            .collect()
    }

    /// Every regular file under the root.
    pub fn files_in_root(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        walk(&self.root, &mut found);
        found
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else {
            out.push(path);
        }
    }
}
