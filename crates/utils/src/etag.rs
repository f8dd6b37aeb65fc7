//! Content etags for cache freshness checks.
//!
//! An etag is `<byte length>-<first 16 bytes of the sha256 digest, hex>`.
//! The length prefix makes accidental collisions between truncated digests
//! even less likely and gives log lines a human-readable size hint.

use sha2::{Digest, Sha256};

/// Compute the etag for a byte slice.
pub fn etag_from_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{}-{}", content.len(), hex)
}

/// Compute the etag for string content.
pub fn etag_from_str(content: &str) -> String {
    etag_from_bytes(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_etag() {
        assert_eq!(etag_from_str("const a = 1;"), etag_from_str("const a = 1;"));
    }

    #[test]
    fn different_content_different_etag() {
        assert_ne!(etag_from_str("const a = 1;"), etag_from_str("const a = 2;"));
    }

    #[test]
    fn etag_shape() {
        let etag = etag_from_bytes(b"abc");
        let (len, hex) = etag.split_once('-').unwrap();
        assert_eq!(len, "3");
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_content_has_etag() {
        let etag = etag_from_bytes(b"");
        assert!(etag.starts_with("0-"));
    }
}
