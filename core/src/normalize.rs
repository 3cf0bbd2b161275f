//! Prompt text normalization and exact-match fingerprinting
//!
//! Normalization is deterministic and idempotent: lowercase, strip
//! punctuation (keep alphanumerics, underscore, and whitespace), collapse
//! whitespace runs, trim. The exact fingerprint is the SHA-256 of the
//! normalized UTF-8 bytes, hex encoded.

use sha2::{Digest, Sha256};

/// Normalize prompt text for comparison and deduplication.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() {
                pending_space = true;
            }
            continue;
        }
        // `_` is kept to match word-character semantics
        if !ch.is_alphanumeric() && ch != '_' {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }

    out
}

/// Compute the SHA-256 exact-dedup fingerprint of normalized text.
///
/// Returns the 64-char hex digest.
pub fn dedup_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercase_and_punctuation() {
        assert_eq!(
            normalize_text("Write a Python script to scrape a website."),
            "write a python script to scrape a website"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  hello\t\n  world  "), "hello world");
    }

    #[test]
    fn test_normalize_keeps_underscore_and_digits() {
        assert_eq!(normalize_text("top_10 items!"), "top_10 items");
    }

    #[test]
    fn test_normalize_idempotent() {
        let raw = "Compare quinoa and brown rice, nutritionally!";
        let once = normalize_text(raw);
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn test_dedup_hash_deterministic() {
        let a = dedup_hash("write a python script");
        let b = dedup_hash("write a python script");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_same_normalized_text_same_hash() {
        let a = normalize_text("Compare quinoa and brown rice nutritionally");
        let b = normalize_text("Compare quinoa and brown rice nutritionally.");
        assert_eq!(a, b);
        assert_eq!(dedup_hash(&a), dedup_hash(&b));
    }
}
