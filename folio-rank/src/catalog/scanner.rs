//! Image file discovery
//!
//! Recursive traversal with format validation. Acceptance requires both a
//! supported extension and matching magic bytes; the extension check is
//! the cheap pre-filter, the header sniff is authoritative.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{EngineError, EngineResult};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

}

/// Extensions accepted by the pre-filter.
pub fn is_image_extension(ext: &str) -> bool {
    matches!(ext, "jpg" | "jpeg" | "png" | "webp" | "gif")
}

/// Identify the format from the file header, or None when the bytes do
/// not match any supported signature.
pub fn sniff_format(header: &[u8]) -> Option<ImageFormat> {
    match header {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', b'7', b'a', ..] | [b'G', b'I', b'F', b'8', b'9', b'a', ..] => {
            Some(ImageFormat::Gif)
        }
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
            Some(ImageFormat::Webp)
        }
        _ => None,
    }
}

/// Pixel dimensions from the header alone, without decoding. Returns
/// None when the header prefix is too short or malformed; callers treat
/// dimensions as advisory metadata.
pub fn probe_dimensions(format: ImageFormat, header: &[u8]) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Png => probe_png(header),
        ImageFormat::Gif => probe_gif(header),
        ImageFormat::Webp => probe_webp(header),
        ImageFormat::Jpeg => probe_jpeg(header),
    }
}

fn probe_png(header: &[u8]) -> Option<(u32, u32)> {
    // Signature (8) + IHDR length (4) + "IHDR" (4), then width/height.
    if header.len() < 24 || &header[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
    Some((width, height))
}

fn probe_gif(header: &[u8]) -> Option<(u32, u32)> {
    if header.len() < 10 {
        return None;
    }
    let width = u16::from_le_bytes([header[6], header[7]]) as u32;
    let height = u16::from_le_bytes([header[8], header[9]]) as u32;
    Some((width, height))
}

fn probe_webp(header: &[u8]) -> Option<(u32, u32)> {
    if header.len() < 30 {
        return None;
    }
    match &header[12..16] {
        // Lossy: frame tag at 20, dimensions at 26 (14 bits each).
        b"VP8 " => {
            let width = (u16::from_le_bytes([header[26], header[27]]) & 0x3FFF) as u32;
            let height = (u16::from_le_bytes([header[28], header[29]]) & 0x3FFF) as u32;
            Some((width, height))
        }
        // Lossless: 28-bit packed dimensions after the signature byte.
        b"VP8L" => {
            if header[20] != 0x2F {
                return None;
            }
            let bits = u32::from_le_bytes(header[21..25].try_into().ok()?);
            let width = (bits & 0x3FFF) + 1;
            let height = ((bits >> 14) & 0x3FFF) + 1;
            Some((width, height))
        }
        // Extended: 24-bit minus-one dimensions at 24 and 27.
        b"VP8X" => {
            let width =
                (u32::from_le_bytes([header[24], header[25], header[26], 0])) + 1;
            let height =
                (u32::from_le_bytes([header[27], header[28], header[29], 0])) + 1;
            Some((width, height))
        }
        _ => None,
    }
}

fn probe_jpeg(header: &[u8]) -> Option<(u32, u32)> {
    // Walk marker segments until a start-of-frame carrying dimensions.
    let mut pos = 2usize;
    while pos + 9 <= header.len() {
        if header[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = header[pos + 1];
        // Padding / standalone markers carry no length.
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if (0xD0..=0xD9).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([header[pos + 2], header[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if pos + 9 > header.len() {
                return None;
            }
            let height = u16::from_be_bytes([header[pos + 5], header[pos + 6]]) as u32;
            let width = u16::from_be_bytes([header[pos + 7], header[pos + 8]]) as u32;
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}

/// A file that passed the extension pre-filter, awaiting verification.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub mtime_ms: i64,
}

/// Recursive candidate discovery.
pub struct Scanner {
    ignore_patterns: Vec<String>,
    max_files: usize,
}

impl Scanner {
    pub fn new(max_files: usize) -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                "node_modules".to_string(),
            ],
            max_files,
        }
    }

    /// Walk `root` and collect candidates by extension. Aborts with
    /// `TooManyFiles` when the discovered count exceeds the cap, before
    /// any hashing begins, so no partial state can leak.
    pub fn discover(&self, root: &Path) -> EngineResult<Vec<Candidate>> {
        if !root.is_dir() {
            return Err(EngineError::DirectoryNotFound(root.to_path_buf()));
        }

        let mut candidates = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Error accessing entry during scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = match path.extension() {
                Some(ext) => ext.to_string_lossy().to_lowercase(),
                None => continue,
            };
            if !is_image_extension(&ext) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot stat candidate");
                    continue;
                }
            };
            candidates.push(Candidate {
                path: path.to_path_buf(),
                size: metadata.len(),
                mtime_ms: mtime_millis(&metadata),
            });
            if candidates.len() > self.max_files {
                return Err(EngineError::TooManyFiles {
                    found: candidates.len(),
                    limit: self.max_files,
                });
            }
        }

        tracing::debug!(count = candidates.len(), root = %root.display(), "Discovery complete");
        Ok(candidates)
    }

    fn should_process_entry(
        &self,
        entry: &DirEntry,
        symlink_visited: &mut HashSet<PathBuf>,
    ) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        for pattern in &self.ignore_patterns {
            if file_name.contains(pattern.as_str()) {
                return false;
            }
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!(path = %entry.path().display(), "Symlink loop detected");
                    return false;
                }
            }
        }

        true
    }
}

/// Modification time as unix milliseconds; 0 when the platform cannot
/// report one.
pub fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
