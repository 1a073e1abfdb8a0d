//! CLI command implementations.
//!
//! Records are printed to stdout as JSON; logs go to stderr.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};

use intake_kernel::file::ByteSource;
use intake_kernel::{FileError, FileService, UploadRequest};

/// Ingest one file from disk.
pub async fn cmd_upload(
    service: &FileService,
    file: &Path,
    folder: &str,
    name: Option<&str>,
) -> Result<()> {
    let declared = match name {
        Some(n) => n.to_string(),
        None => file_name_of(file)?,
    };

    let handle = std::fs::File::open(file)
        .with_context(|| format!("failed to open {}", file.display()))?;
    let request = UploadRequest::measured(Box::new(handle), declared, folder)
        .with_context(|| format!("failed to measure {}", file.display()))?;

    let record = service.upload(request).await;
    print_json(&record)?;

    if !record.success {
        bail!("upload failed");
    }
    Ok(())
}

/// Ingest several files into one folder.
pub async fn cmd_batch(service: &FileService, files: &[std::path::PathBuf], folder: &str) -> Result<()> {
    let mut items: Vec<(Box<dyn ByteSource>, String)> = Vec::with_capacity(files.len());
    for file in files {
        let handle = std::fs::File::open(file)
            .with_context(|| format!("failed to open {}", file.display()))?;
        let source: Box<dyn ByteSource> = Box::new(handle);
        items.push((source, file_name_of(file)?));
    }

    let records = service.upload_batch(items, folder).await;
    print_json(&records)?;

    let failed = records.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} of {} uploads failed", records.len());
    }
    Ok(())
}

/// Securely erase a stored file.
pub async fn cmd_delete(service: &FileService, path: &str) -> Result<()> {
    let removed = service
        .delete(path)
        .await
        .with_context(|| format!("failed to delete {path}"))?;

    if removed {
        println!("deleted {path}");
    } else {
        println!("not found: {path}");
    }
    Ok(())
}

/// Write a stored file to stdout or `output`.
pub async fn cmd_read(service: &FileService, path: &str, output: Option<&Path>) -> Result<()> {
    let data = match service.read(path).await {
        Ok(data) => data,
        Err(FileError::NotFound { .. }) => bail!("not found: {path}"),
        Err(e) => return Err(e).with_context(|| format!("failed to read {path}")),
    };

    match output {
        Some(out) => {
            std::fs::write(out, &data).with_context(|| format!("failed to write {}", out.display()))?;
        }
        None => {
            std::io::stdout()
                .write_all(&data)
                .context("failed to write to stdout")?;
        }
    }
    Ok(())
}

fn file_name_of(file: &Path) -> Result<String> {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", file.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize record")?;
    println!("{json}");
    Ok(())
}
