//! Source document scanning and content hashing

use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source document and its content digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Path relative to the documents directory, `/`-separated
    pub path: String,
    /// SHA-256 hex of the file bytes
    pub hash: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the filesystem reports one
    pub modified_at: Option<DateTime<Utc>>,
}

/// SHA-256 hex digest of a file, streamed in 64 KiB blocks
pub fn hash_file(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Relative paths of every regular file under `dir`, sorted
///
/// Hidden files and directories are skipped. A missing directory lists as
/// empty.
pub fn list_documents(dir: &Path) -> Result<Vec<String>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir) {
            paths.push(relative_key(relative));
        }
    }
    paths.sort();
    Ok(paths)
}

fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn describe(dir: &Path, relative: &str) -> Result<DocumentInfo, StoreError> {
    let full: PathBuf = dir.join(relative);
    let meta = std::fs::metadata(&full)?;
    Ok(DocumentInfo {
        path: relative.to_string(),
        hash: hash_file(&full)?,
        size: meta.len(),
        modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// Hash every document under `dir` using up to `workers` threads
///
/// Returns a map keyed by relative path. Hashing is read-only, so the
/// paths are split into contiguous slices, one per worker.
pub fn scan_documents(dir: &Path, workers: usize) -> Result<BTreeMap<String, DocumentInfo>, StoreError> {
    let paths = list_documents(dir)?;
    if paths.is_empty() {
        return Ok(BTreeMap::new());
    }
    let workers = workers.clamp(1, paths.len());
    let per_worker = paths.len().div_ceil(workers);

    let results: Vec<Result<Vec<DocumentInfo>, StoreError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(per_worker)
            .map(|slice| {
                scope.spawn(move || {
                    slice
                        .iter()
                        .map(|p| describe(dir, p))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(StoreError::InvalidData("document hashing worker panicked".into()))
                })
            })
            .collect()
    });

    let mut documents = BTreeMap::new();
    for batch in results {
        for info in batch? {
            documents.insert(info.path.clone(), info);
        }
    }
    tracing::debug!("Hashed {} document(s) under {}", documents.len(), dir.display());
    Ok(documents)
}

/// Aggregate hash over a `path -> hash` map
///
/// SHA-256 over the sorted `path\thash\n` lines; a `BTreeMap` is already
/// sorted.
pub fn corpus_hash<'a, I>(hashes: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut lines: Vec<String> = hashes
        .into_iter()
        .map(|(path, hash)| format!("{}\t{}\n", path, hash))
        .collect();
    lines.sort();
    scriptorium_domain::sha256_hex(lines.concat().as_bytes())
}
