//! Validated binary blob storage inside a library cache directory.
//!
//! Every blob is framed as a 4-byte little-endian header length, a bincode
//! header (magic, format version, producing tool version, payload checksum)
//! and the raw payload. Reads validate the frame and return `None` on any
//! mismatch, so a corrupt blob is just a cache miss.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;

use crate::error::CacheError;

/// Magic bytes identifying a tessera cache blob.
const BLOB_MAGIC: [u8; 4] = *b"TSRA";

/// Current blob format version. Bump on breaking changes to the header or
/// to any payload layout.
const BLOB_FORMAT_VERSION: u32 = 1;

/// Header prepended to every blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobHeader {
    /// Must be `b"TSRA"`.
    pub magic: [u8; 4],
    /// Blob format version.
    pub format_version: u32,
    /// Version of the tool that wrote the blob.
    pub tool_version: String,
    /// Hash of the payload.
    pub checksum: ContentHash,
}

/// Blob store rooted at one library cache directory.
///
/// Blobs live at `<dir>/<subdir>/<key>.<ext>`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Creates a store rooted at `dir`. Nothing is created on disk.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Path of the blob with the given key.
    pub fn blob_path(&self, subdir: &str, key: &str, ext: &str) -> PathBuf {
        self.dir.join(subdir).join(format!("{key}.{ext}"))
    }

    /// Writes `data` under an explicit key.
    pub fn write(&self, subdir: &str, key: &str, ext: &str, data: &[u8]) -> Result<(), CacheError> {
        let subdir_path = self.dir.join(subdir);
        std::fs::create_dir_all(&subdir_path).map_err(|e| CacheError::io(&subdir_path, e))?;

        let header = BlobHeader {
            magic: BLOB_MAGIC,
            format_version: BLOB_FORMAT_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            checksum: ContentHash::from_bytes(data),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        let path = self.blob_path(subdir, key, ext);
        std::fs::write(&path, &output).map_err(|e| CacheError::io(&path, e))
    }

    /// Writes `data` keyed by its content hash and returns the key.
    ///
    /// An existing blob with the same key is left in place.
    pub fn write_content_addressed(
        &self,
        subdir: &str,
        ext: &str,
        data: &[u8],
    ) -> Result<String, CacheError> {
        let key = ContentHash::from_bytes(data).to_string();
        if self.read(subdir, &key, ext).is_none() {
            self.write(subdir, &key, ext, data)?;
        }
        Ok(key)
    }

    /// Reads and validates a blob. Returns `None` if it is missing or invalid.
    pub fn read(&self, subdir: &str, key: &str, ext: &str) -> Option<Vec<u8>> {
        let raw = std::fs::read(self.blob_path(subdir, key, ext)).ok()?;
        if raw.len() < 4 {
            return None;
        }
        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }
        let (header, _): (BlobHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?;
        if header.magic != BLOB_MAGIC || header.format_version != BLOB_FORMAT_VERSION {
            return None;
        }
        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }
        Some(payload.to_vec())
    }

    /// Deletes blobs in `subdir` with extension `ext` whose key is not live.
    /// Returns the number of deleted blobs.
    pub fn gc(&self, subdir: &str, ext: &str, live: &BTreeSet<String>) -> Result<usize, CacheError> {
        let dir = self.dir.join(subdir);
        if !dir.exists() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| CacheError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !live.contains(stem) {
                std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
