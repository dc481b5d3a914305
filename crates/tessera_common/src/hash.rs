//! Content hashing for change detection and signature fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit content hash computed using XXH3.
///
/// Used both as a whole-file fingerprint (coarse dirty detection) and as the
/// content hash of a single declaration signature. Two values with the same
/// `ContentHash` are assumed to have identical content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Returns the low 64 bits of the hash.
    pub fn low_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(low)
    }

    /// Renders the low 64 bits in base 36, suitable for short directory names.
    pub fn to_base36(&self) -> String {
        to_base36(self.low_u64())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Incremental builder for a [`ContentHash`] over several parts.
///
/// Every part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` hash
/// differently.
pub struct ContentHasher {
    state: Xxh3,
}

impl ContentHasher {
    /// Creates a hasher with empty state.
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    /// Feeds a length-prefixed byte slice.
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.state.update(&(data.len() as u64).to_le_bytes());
        self.state.update(data);
        self
    }

    /// Feeds a length-prefixed string.
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    /// Feeds a previously computed hash.
    pub fn write_hash(&mut self, hash: &ContentHash) -> &mut Self {
        self.state.update(&hash.0);
        self
    }

    /// Returns the hash of everything written so far.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = ContentHash::from_bytes(b"hello world");
        let b = ContentHash::from_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = ContentHash::from_bytes(b"hello");
        let b = ContentHash::from_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        let h = ContentHash::from_bytes(b"test");
        let s = format!("{h}");
        assert_eq!(s.len(), 32, "Display should be 32 hex chars");
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn debug_abbreviated() {
        let h = ContentHash::from_bytes(b"test");
        let s = format!("{h:?}");
        assert!(s.starts_with("ContentHash("));
        assert!(s.ends_with(')'));
    }

    #[test]
    fn base36_is_short_and_alphanumeric() {
        let s = ContentHash::from_bytes(b"/libs/stdlib.klib").to_base36();
        assert!(!s.is_empty() && s.len() <= 13);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn base36_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn hasher_parts_are_length_prefixed() {
        let a = ContentHasher::new().write_str("ab").write_str("c").finish();
        let b = ContentHasher::new().write_str("a").write_str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn hasher_folds_nested_hashes() {
        let leaf = ContentHash::from_bytes(b"leaf");
        let other = ContentHash::from_bytes(b"other");
        let a = ContentHasher::new().write_bytes(b"body").write_hash(&leaf).finish();
        let b = ContentHasher::new().write_bytes(b"body").write_hash(&other).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn serde_roundtrip() {
        let h = ContentHash::from_bytes(b"serde test");
        let json = serde_json::to_string(&h).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
