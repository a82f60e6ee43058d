//! Content-addressed image catalog
//!
//! Turns a root directory into a stable set of digest-identified images.
//! The digest is the sole cross-component identifier; paths, sizes, and
//! dimensions are catalog-internal metadata. Scans build a complete
//! replacement view off-lock and swap it in one write-lock acquisition,
//! so a failed or cancelled scan leaks no partial state.

pub mod hasher;
pub mod scanner;

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use folio_common::TuningConfig;

use crate::error::{EngineError, EngineResult};
use hasher::{HashFileError, HashPool};
use scanner::{Candidate, ImageFormat, Scanner};

/// How much of the file head is read for sniffing and dimension probing.
const HEADER_PREFIX_BYTES: usize = 128 * 1024;

/// Catalog metadata for one digest.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub size: u64,
    pub mtime_ms: i64,
    pub format: ImageFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Result of a completed scan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanSummary {
    /// Digests present after this scan.
    pub image_count: usize,
    /// Digests never observed before this scan.
    pub new_digests: usize,
    /// Files skipped for per-file reasons (unreadable, wrong magic, oversized).
    pub skipped_files: usize,
    /// Files whose digest was reused from the (path, size, mtime) cache.
    pub reused_entries: usize,
}

#[derive(Default)]
struct CatalogInner {
    /// Every digest ever observed. Never shrinks; a digest whose file
    /// vanished simply stops being present.
    entries: HashMap<String, CatalogEntry>,
    /// Digests found by the most recent scan, in digest order.
    present: BTreeSet<String>,
    /// (path -> size, mtime, digest) reuse cache.
    hash_cache: HashMap<PathBuf, (u64, i64, String)>,
    root: Option<PathBuf>,
}

/// Shared catalog: many concurrent lookups, occasional scan updates.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
    pool: Arc<HashPool>,
    max_files: usize,
    max_file_bytes: u64,
}

enum Processed {
    Accepted {
        digest: String,
        entry: CatalogEntry,
        reused: bool,
    },
    Skipped,
    Cancelled,
}

impl Catalog {
    pub fn new(tuning: &TuningConfig) -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
            pool: Arc::new(HashPool::new(tuning.hash_workers, tuning.hash_chunk_bytes)),
            max_files: tuning.max_files,
            max_file_bytes: tuning.max_file_bytes,
        }
    }

    /// Scan `root`, replacing the present set on success. Per-file errors
    /// are skipped and counted; the scan as a whole fails only on a
    /// missing root, the file-count cap, or cancellation.
    pub async fn scan(&self, root: &Path, cancel: CancellationToken) -> EngineResult<ScanSummary> {
        let root = root.to_path_buf();
        let scanner = Scanner::new(self.max_files);

        let (cache_snapshot, known_digests) = {
            let inner = self.inner.read().await;
            (
                inner.hash_cache.clone(),
                inner.entries.keys().cloned().collect::<BTreeSet<_>>(),
            )
        };

        let pool = Arc::clone(&self.pool);
        let max_file_bytes = self.max_file_bytes;
        let scan_root = root.clone();
        let results = tokio::task::spawn_blocking(move || -> EngineResult<Vec<Processed>> {
            let candidates = scanner.discover(&scan_root)?;
            debug!(candidates = candidates.len(), "Verifying and hashing candidates");
            Ok(pool.map(candidates, |candidate| {
                process_candidate(candidate, &cache_snapshot, max_file_bytes, &pool, &cancel)
            }))
        })
        .await
        .map_err(|e| {
            EngineError::Storage(folio_common::Error::Internal(format!(
                "scan task failed: {e}"
            )))
        })??;

        let mut accepted: Vec<(String, CatalogEntry, bool)> = Vec::new();
        let mut skipped_files = 0usize;
        for result in results {
            match result {
                Processed::Accepted {
                    digest,
                    entry,
                    reused,
                } => accepted.push((digest, entry, reused)),
                Processed::Skipped => skipped_files += 1,
                Processed::Cancelled => return Err(EngineError::ScanCancelled),
            }
        }

        // Merge in digest order so identical inputs produce identical
        // catalogs regardless of worker interleaving.
        accepted.sort_by(|a, b| a.0.cmp(&b.0));

        let reused_entries = accepted.iter().filter(|(_, _, reused)| *reused).count();
        let mut new_digests = 0usize;

        let mut inner = self.inner.write().await;
        inner.present.clear();
        for (digest, entry, _) in accepted {
            if !known_digests.contains(&digest) && !inner.present.contains(&digest) {
                new_digests += 1;
            }
            inner
                .hash_cache
                .insert(entry.path.clone(), (entry.size, entry.mtime_ms, digest.clone()));
            inner.present.insert(digest.clone());
            inner.entries.insert(digest, entry);
        }
        inner.root = Some(root.clone());

        let summary = ScanSummary {
            image_count: inner.present.len(),
            new_digests,
            skipped_files,
            reused_entries,
        };
        info!(
            root = %root.display(),
            images = summary.image_count,
            new = summary.new_digests,
            skipped = summary.skipped_files,
            reused = summary.reused_entries,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Digests found by the most recent scan, ascending.
    pub async fn present_digests(&self) -> Vec<String> {
        self.inner.read().await.present.iter().cloned().collect()
    }

    pub async fn is_present(&self, digest: &str) -> bool {
        self.inner.read().await.present.contains(digest)
    }

    pub async fn lookup(&self, digest: &str) -> Option<CatalogEntry> {
        self.inner.read().await.entries.get(digest).cloned()
    }

    pub async fn root(&self) -> Option<PathBuf> {
        self.inner.read().await.root.clone()
    }

    /// Read the payload for `digest`, verifying the file still carries
    /// the content it was cataloged with.
    pub async fn fetch_bytes(&self, digest: &str) -> EngineResult<(Vec<u8>, &'static str)> {
        let entry = self
            .lookup(digest)
            .await
            .ok_or_else(|| EngineError::UnknownDigest(digest.to_string()))?;

        let digest_owned = digest.to_string();
        tokio::task::spawn_blocking(move || -> EngineResult<(Vec<u8>, &'static str)> {
            let metadata = std::fs::metadata(&entry.path)
                .map_err(|_| EngineError::FileMissing(digest_owned.clone()))?;
            if metadata.len() != entry.size || scanner::mtime_millis(&metadata) != entry.mtime_ms {
                return Err(EngineError::FileMissing(digest_owned));
            }
            let bytes = std::fs::read(&entry.path)
                .map_err(|_| EngineError::FileMissing(digest_owned.clone()))?;
            if hasher::digest_bytes(&bytes) != digest_owned {
                warn!(digest = %digest_owned, "Content changed under cataloged path");
                return Err(EngineError::FileMissing(digest_owned));
            }
            Ok((bytes, entry.format.mime()))
        })
        .await
        .map_err(|e| {
            EngineError::Storage(folio_common::Error::Internal(format!(
                "fetch task failed: {e}"
            )))
        })?
    }
}

fn process_candidate(
    candidate: &Candidate,
    cache: &HashMap<PathBuf, (u64, i64, String)>,
    max_file_bytes: u64,
    pool: &HashPool,
    cancel: &CancellationToken,
) -> Processed {
    if cancel.is_cancelled() {
        return Processed::Cancelled;
    }
    if candidate.size > max_file_bytes {
        warn!(path = %candidate.path.display(), size = candidate.size, "File exceeds size cap, skipping");
        return Processed::Skipped;
    }

    let header = match read_header_prefix(&candidate.path) {
        Ok(header) => header,
        Err(e) => {
            warn!(path = %candidate.path.display(), error = %e, "Unreadable candidate, skipping");
            return Processed::Skipped;
        }
    };
    let format = match scanner::sniff_format(&header) {
        Some(format) => format,
        None => {
            debug!(path = %candidate.path.display(), "Magic bytes do not match extension, skipping");
            return Processed::Skipped;
        }
    };
    let dimensions = scanner::probe_dimensions(format, &header);

    let cached = cache
        .get(&candidate.path)
        .filter(|(size, mtime, _)| *size == candidate.size && *mtime == candidate.mtime_ms)
        .map(|(_, _, digest)| digest.clone());

    let (digest, reused) = match cached {
        Some(digest) => (digest, true),
        None => match pool.hash_file(&candidate.path, cancel) {
            Ok(digest) => (digest, false),
            Err(HashFileError::Cancelled) => return Processed::Cancelled,
            Err(HashFileError::Io(e)) => {
                warn!(path = %candidate.path.display(), error = %e, "Hashing failed, skipping");
                return Processed::Skipped;
            }
        },
    };

    Processed::Accepted {
        digest,
        entry: CatalogEntry {
            path: candidate.path.clone(),
            size: candidate.size,
            mtime_ms: candidate.mtime_ms,
            format,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        },
        reused,
    }
}

fn read_header_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; HEADER_PREFIX_BYTES];
    let mut filled = 0usize;
    loop {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buffer.len() {
            break;
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{tiny_gif, tiny_png};

    fn catalog() -> Catalog {
        Catalog::new(&TuningConfig::default())
    }

    #[tokio::test]
    async fn scan_catalogs_real_images_and_skips_fakes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.png"), tiny_png(1)).unwrap();
        std::fs::write(dir.path().join("two.gif"), tiny_gif(2)).unwrap();
        // Right extension, wrong magic.
        std::fs::write(dir.path().join("fake.png"), b"definitely not a png").unwrap();

        let catalog = catalog();
        let summary = catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.image_count, 2);
        assert_eq!(summary.new_digests, 2);
        assert_eq!(summary.skipped_files, 1);

        let digests = catalog.present_digests().await;
        assert_eq!(digests.len(), 2);
        for digest in &digests {
            let entry = catalog.lookup(digest).await.unwrap();
            assert!(entry.width.is_some());
        }
    }

    #[tokio::test]
    async fn rescan_of_unchanged_tree_is_identical_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.png"), tiny_png(1)).unwrap();
        std::fs::write(dir.path().join("two.png"), tiny_png(2)).unwrap();

        let catalog = catalog();
        let first = catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();
        let digests_before = catalog.present_digests().await;

        let second = catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();
        let digests_after = catalog.present_digests().await;

        assert_eq!(digests_before, digests_after);
        assert_eq!(first.image_count, second.image_count);
        assert_eq!(second.new_digests, 0);
        assert_eq!(second.reused_entries, 2);
    }

    #[tokio::test]
    async fn same_content_under_two_paths_is_one_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), tiny_png(7)).unwrap();
        std::fs::write(dir.path().join("b.png"), tiny_png(7)).unwrap();

        let catalog = catalog();
        let summary = catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.image_count, 1);
    }

    #[tokio::test]
    async fn cancelled_scan_leaves_no_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.png"), tiny_png(1)).unwrap();

        let catalog = catalog();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = catalog.scan(dir.path(), cancel).await;
        assert!(matches!(result, Err(EngineError::ScanCancelled)));
        assert!(catalog.present_digests().await.is_empty());
        assert!(catalog.root().await.is_none());
    }

    #[tokio::test]
    async fn fetch_bytes_verifies_content() {
        let dir = tempfile::tempdir().unwrap();
        let payload = tiny_png(3);
        std::fs::write(dir.path().join("img.png"), &payload).unwrap();

        let catalog = catalog();
        catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();
        let digest = catalog.present_digests().await.remove(0);

        let (bytes, mime) = catalog.fetch_bytes(&digest).await.unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(mime, "image/png");

        assert!(matches!(
            catalog.fetch_bytes(&"0".repeat(64)).await,
            Err(EngineError::UnknownDigest(_))
        ));
    }

    #[tokio::test]
    async fn fetch_bytes_detects_vanished_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        std::fs::write(&path, tiny_png(4)).unwrap();

        let catalog = catalog();
        catalog
            .scan(dir.path(), CancellationToken::new())
            .await
            .unwrap();
        let digest = catalog.present_digests().await.remove(0);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            catalog.fetch_bytes(&digest).await,
            Err(EngineError::FileMissing(_))
        ));
    }
}
