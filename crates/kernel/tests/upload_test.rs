#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end upload pipeline tests.
//!
//! These drive the real `FileService` against a temporary storage root.

use std::io::Cursor;

use image::ImageFormat;
use intake_kernel::file::{ByteSource, UploadStage};
use intake_kernel::{Config, FailureKind, FileService, UploadRequest};
use intake_test_utils::{
    PDF_BYTES, TestRoot, dimensions_of, doc_bytes, docx_bytes, filler, image_bytes, jpeg_bytes,
    png_bytes,
};
use tokio_util::sync::CancellationToken;

fn service(root: &TestRoot) -> FileService {
    FileService::new(&Config::new(root.root())).unwrap()
}

#[tokio::test]
async fn pdf_upload_succeeds_under_target_folder() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(PDF_BYTES, "report.pdf", "contact"))
        .await;

    assert!(record.success, "{record:?}");
    assert_eq!(record.extension.as_deref(), Some(".pdf"));
    assert_eq!(record.failure, None);
    assert_eq!(record.error, None);

    let path = record.relative_path.as_deref().unwrap();
    assert!(path.starts_with("contact/report_"), "{path}");
    assert!(path.ends_with(".pdf"));

    let name = record.file_name.as_deref().unwrap();
    assert_eq!(path, format!("contact/{name}"));
    assert_eq!(record.url.as_deref(), Some(format!("/files/{path}").as_str()));
    assert_eq!(record.content_hash.as_deref().map(str::len), Some(64));
}

#[tokio::test]
async fn non_image_bytes_round_trip_exactly() {
    let root = TestRoot::new();
    let files = service(&root);

    for (name, bytes) in [
        ("report.pdf", PDF_BYTES.to_vec()),
        ("letter.doc", doc_bytes()),
        ("sheet.xlsx", docx_bytes()),
    ] {
        let record = files
            .upload(UploadRequest::from_bytes(bytes.clone(), name, "docs"))
            .await;
        assert!(record.success, "{name}: {record:?}");

        let stored = files.read(record.relative_path.as_deref().unwrap()).await.unwrap();
        assert_eq!(stored, bytes, "{name} changed on disk");
        assert_eq!(record.size, Some(bytes.len() as u64));
    }
}

#[tokio::test]
async fn script_renamed_to_jpg_is_rejected() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(
            b"#!/bin/sh\nrm -rf /\n".to_vec(),
            "evil.jpg",
            "contact",
        ))
        .await;

    assert!(!record.success);
    assert_eq!(record.failure, Some(FailureKind::SignatureMismatch));
    assert_eq!(record.last_stage(), Some(UploadStage::SignatureChecked));
    assert!(root.files_in_root().is_empty());
}

#[tokio::test]
async fn traversal_in_name_and_folder_stays_in_root() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(
            PDF_BYTES,
            "../../etc/passwd.pdf",
            "../../x/y/z/w",
        ))
        .await;

    assert!(record.success, "{record:?}");
    let path = record.relative_path.as_deref().unwrap();
    assert!(path.starts_with("x/y/z/passwd_"), "{path}");

    let name = record.file_name.as_deref().unwrap();
    assert!(!name.contains('/') && !name.contains('\\') && !name.contains(".."));

    assert!(root.files_outside_root().is_empty());
    let canonical_root = root.root().canonicalize().unwrap();
    let stored = files.storage().resolve(path).unwrap().canonicalize().unwrap();
    assert!(stored.starts_with(&canonical_root));
}

#[tokio::test]
async fn extensionless_traversal_name_is_disallowed() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(
            b"root:x:0:0::/root:/bin/sh\n".to_vec(),
            "../../etc/passwd",
            "../../x/y/z/w",
        ))
        .await;

    assert_eq!(record.failure, Some(FailureKind::DisallowedExtension));
    assert!(root.files_in_root().is_empty());
    assert!(root.files_outside_root().is_empty());
}

#[tokio::test]
async fn hostile_names_never_escape_root() {
    let root = TestRoot::new();
    let files = service(&root);
    let canonical_root = root.root().canonicalize().unwrap();

    let names = [
        "..\\..\\boot.ini.pdf",
        "/etc/shadow.pdf",
        "a/../../b.pdf",
        "....//....//c.pdf",
        "~/.ssh/id_rsa.pdf",
        "con:prn?.pdf",
        "\u{202e}fdp.exe.pdf",
    ];
    let folders = ["..", "/abs/olute", "~/home", "a\\..\\..\\b", "./././", "x/../../../../y"];

    for name in names {
        for folder in folders {
            let record = files
                .upload(UploadRequest::from_bytes(PDF_BYTES, name, folder))
                .await;
            assert!(record.success, "{name:?} in {folder:?}: {record:?}");

            let path = record.relative_path.as_deref().unwrap();
            assert!(path.split('/').count() <= 4, "{path}");
            let stored = files.storage().resolve(path).unwrap().canonicalize().unwrap();
            assert!(stored.starts_with(&canonical_root), "{path} escaped");
        }
    }

    assert!(root.files_outside_root().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_writing() {
    let root = TestRoot::new();
    let files = service(&root);

    let mut body = PDF_BYTES.to_vec();
    body.resize(15 * 1024 * 1024, b' ');
    let record = files
        .upload(UploadRequest::from_bytes(body, "huge.pdf", "docs"))
        .await;

    assert_eq!(record.failure, Some(FailureKind::SizeExceeded));
    assert_eq!(record.last_stage(), Some(UploadStage::SizeChecked));
    assert!(root.files_in_root().is_empty());
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(Vec::new(), "empty.pdf", "docs"))
        .await;

    assert_eq!(record.failure, Some(FailureKind::EmptyInput));
    assert_eq!(record.error.as_deref(), Some("No file provided"));
}

#[tokio::test]
async fn disallowed_extension_is_rejected() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(filler(32), "setup.exe", "docs"))
        .await;

    assert_eq!(record.failure, Some(FailureKind::DisallowedExtension));
    assert_eq!(record.last_stage(), Some(UploadStage::ExtensionChecked));
}

#[tokio::test]
async fn large_image_is_downsized_with_aspect_ratio() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(
            png_bytes(6000, 3000),
            "panorama.png",
            "media",
        ))
        .await;
    assert!(record.success, "{record:?}");

    let stored = files.read(record.relative_path.as_deref().unwrap()).await.unwrap();
    assert_eq!(dimensions_of(&stored), (4000, 2000));
    assert_eq!(record.mime_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn small_image_keeps_dimensions() {
    let root = TestRoot::new();
    let files = service(&root);

    let record = files
        .upload(UploadRequest::from_bytes(jpeg_bytes(800, 600), "photo.JPG", "media"))
        .await;
    assert!(record.success, "{record:?}");
    assert_eq!(record.extension.as_deref(), Some(".jpg"));

    let stored = files.read(record.relative_path.as_deref().unwrap()).await.unwrap();
    assert_eq!(dimensions_of(&stored), (800, 600));
    assert_eq!(&stored[..3], &[0xFF, 0xD8, 0xFF]);
}

#[tokio::test]
async fn configured_bounds_apply_per_axis() {
    let root = TestRoot::new();
    let mut config = Config::new(root.root());
    config.max_image_width = 100;
    config.max_image_height = 50;
    let files = FileService::new(&config).unwrap();

    for format in [ImageFormat::Gif, ImageFormat::WebP] {
        let ext = format.extensions_str()[0];
        let record = files
            .upload(UploadRequest::from_bytes(
                image_bytes(200, 200, format),
                format!("square.{ext}"),
                "media",
            ))
            .await;
        assert!(record.success, "{ext}: {record:?}");

        let stored = files.read(record.relative_path.as_deref().unwrap()).await.unwrap();
        assert_eq!(dimensions_of(&stored), (50, 50), "{ext}");
    }
}

#[tokio::test]
async fn corrupt_image_is_reported_distinctly() {
    let root = TestRoot::new();
    let files = service(&root);

    let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&filler(128));
    let record = files
        .upload(UploadRequest::from_bytes(data, "broken.png", "media"))
        .await;

    assert_eq!(record.failure, Some(FailureKind::CorruptImage));
    assert_eq!(record.last_stage(), Some(UploadStage::Transformed));
    assert!(root.files_in_root().is_empty());
}

#[tokio::test]
async fn duplicate_content_is_stored_twice_with_one_marker() {
    let root = TestRoot::new();
    let files = service(&root);

    let first = files
        .upload(UploadRequest::from_bytes(PDF_BYTES, "a.pdf", "dups"))
        .await;
    let second = files
        .upload(UploadRequest::from_bytes(PDF_BYTES, "a.pdf", "dups"))
        .await;

    assert!(first.success && second.success);
    assert_ne!(first.relative_path, second.relative_path);
    assert_eq!(first.content_hash, second.content_hash);

    let marker = root
        .root()
        .join("dups")
        .join(format!(".hash_{}", first.content_hash.as_deref().unwrap()));
    assert_eq!(
        std::fs::read_to_string(marker).unwrap(),
        first.file_name.unwrap()
    );
}

#[tokio::test]
async fn batch_collects_one_record_per_item() {
    let root = TestRoot::new();
    let files = service(&root);

    let items: Vec<(Box<dyn ByteSource>, String)> = vec![
        (Box::new(Cursor::new(PDF_BYTES.to_vec())), "one.pdf".to_string()),
        (Box::new(Cursor::new(filler(64))), "two.exe".to_string()),
        (Box::new(Cursor::new(docx_bytes())), "three.docx".to_string()),
    ];

    let records = files.upload_batch(items, "batch").await;

    assert_eq!(records.len(), 3);
    assert!(records[0].success);
    assert_eq!(records[1].failure, Some(FailureKind::DisallowedExtension));
    assert!(records[2].success);
    assert!(records[2].relative_path.as_deref().unwrap().starts_with("batch/three_"));
}

#[tokio::test]
async fn concurrent_uploads_of_same_name_never_collide() {
    let root = TestRoot::new();
    let files = service(&root);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let files = files.clone();
            tokio::spawn(async move {
                files
                    .upload(UploadRequest::from_bytes(PDF_BYTES, "same.pdf", "race"))
                    .await
            })
        })
        .collect();

    let mut paths = std::collections::HashSet::new();
    for handle in handles {
        let record = handle.await.unwrap();
        assert!(record.success, "{record:?}");
        assert!(paths.insert(record.relative_path.unwrap()));
    }
    assert_eq!(paths.len(), 16);
}

#[tokio::test]
async fn cancelled_upload_writes_nothing() {
    let root = TestRoot::new();
    let files = service(&root);
    let token = CancellationToken::new();
    token.cancel();

    let record = files
        .upload_with_cancel(
            UploadRequest::from_bytes(PDF_BYTES, "late.pdf", "docs"),
            token,
        )
        .await;

    assert_eq!(record.failure, Some(FailureKind::Cancelled));
    assert_eq!(record.error.as_deref(), Some("Upload cancelled"));
    assert!(root.files_in_root().is_empty());
}
