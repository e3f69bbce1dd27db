//! Document inbox: `*.jsonl` files of [`Document`] records, one per line.
//!
//! Each file is ingested into the semantic index and then moved to the
//! processed directory so it is never picked up twice.

use std::path::{Path, PathBuf};

use finsight_memory::Ingestor;
use finsight_models::semantic::Document;

use crate::error::LoaderError;

/// Outcome of ingesting one inbox file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub documents: usize,
    pub chunks: usize,
    /// Lines that were not valid `Document` JSON.
    pub rejected: usize,
}

/// Totals for one inbox scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: usize,
    pub documents: usize,
    pub chunks: usize,
    pub rejected: usize,
}

/// Pending `*.jsonl` files in `dir`, in name order.
pub async fn pending_files(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file()
            && path.extension().is_some_and(|ext| ext == "jsonl")
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ingest every document line of one file.
///
/// Malformed lines are logged and counted, not fatal. Ingestion errors
/// abort the file so it stays in the inbox for the next scan.
pub async fn ingest_file(ingestor: &Ingestor, path: &Path) -> Result<FileReport, LoaderError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut report = FileReport::default();

    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = match serde_json::from_str(line) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed document"
                );
                report.rejected += 1;
                continue;
            }
        };
        let ids = ingestor.ingest_document(document).await?;
        report.documents += 1;
        report.chunks += ids.len();
    }

    Ok(report)
}

/// Ingest all pending files in `dir` and move each into `processed_dir`.
pub async fn scan_inbox(
    ingestor: &Ingestor,
    dir: &Path,
    processed_dir: &str,
) -> Result<ScanReport, LoaderError> {
    let processed = dir.join(processed_dir);
    tokio::fs::create_dir_all(&processed).await?;

    let mut scan = ScanReport::default();
    for path in pending_files(dir).await? {
        let report = match ingest_file(ingestor, &path).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "Inbox file ingestion failed");
                continue;
            }
        };

        let Some(name) = path.file_name() else {
            continue;
        };
        tokio::fs::rename(&path, processed.join(name)).await?;
        tracing::debug!(
            file = %path.display(),
            documents = report.documents,
            chunks = report.chunks,
            "Inbox file processed"
        );

        scan.files += 1;
        scan.documents += report.documents;
        scan.chunks += report.chunks;
        scan.rejected += report.rejected;
    }
    Ok(scan)
}
