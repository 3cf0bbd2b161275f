//! SimHash near-duplicate fingerprinting
//!
//! 64-bit locality-sensitive fingerprint: similar texts produce hashes that
//! differ in few bits, measured by Hamming distance. Distance semantics:
//! 0-3 bits near-identical, 4-8 very similar, 16+ different.
//!
//! Token hash is the low 64 bits of the MD5 digest. MD5 here is a fast
//! non-cryptographic convenience, not a security property; all deployments
//! must agree on it for fingerprints to be comparable.

use md5::{Digest, Md5};

/// Compute the 64-bit SimHash fingerprint of normalized text.
///
/// Tokens are whitespace-separated. For each bit position the accumulator
/// gains +1 when the token hash has the bit set, -1 otherwise; the output
/// bit is set iff the accumulator ends positive. Empty input hashes to 0.
pub fn simhash64(normalized: &str) -> u64 {
    let mut acc = [0i32; 64];
    let mut saw_token = false;

    for token in normalized.split_whitespace() {
        saw_token = true;
        let h = token_hash(token);
        for (i, slot) in acc.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }

    if !saw_token {
        return 0;
    }

    let mut fingerprint = 0u64;
    for (i, &v) in acc.iter().enumerate() {
        if v > 0 {
            fingerprint |= 1 << i;
        }
    }
    fingerprint
}

/// Low 64 bits of the MD5 digest of a token.
fn token_hash(token: &str) -> u64 {
    let digest = Md5::digest(token.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[8..16]);
    u64::from_be_bytes(low)
}

/// Hamming distance between two 64-bit fingerprints.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Render a fingerprint as the 16-char lower-hex string stored in the DB.
pub fn to_hex(fingerprint: u64) -> String {
    format!("{:016x}", fingerprint)
}

/// Parse a stored hex fingerprint.
pub fn from_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simhash_pure_function() {
        let text = "compare quinoa and brown rice nutritionally";
        assert_eq!(simhash64(text), simhash64(text));
    }

    #[test]
    fn test_identical_texts_distance_zero() {
        let a = simhash64("write a python script to scrape a website");
        let b = simhash64("write a python script to scrape a website");
        assert_eq!(hamming(a, b), 0);
    }

    #[test]
    fn test_empty_input_is_zero() {
        assert_eq!(simhash64(""), 0);
        assert_eq!(simhash64("   "), 0);
    }

    #[test]
    fn test_one_token_change_is_close_on_long_text() {
        let a = simhash64(
            "please write a detailed python script that will scrape product listings \
             from an ecommerce website and save the results into a csv file for later analysis",
        );
        let b = simhash64(
            "please write a detailed python script that will scrape product reviews \
             from an ecommerce website and save the results into a csv file for later analysis",
        );
        // One substituted token among 27; most accumulator signs hold.
        assert!(hamming(a, b) <= 3, "distance was {}", hamming(a, b));
    }

    #[test]
    fn test_one_token_change_on_short_text_drifts_more() {
        // With few tokens each substitution moves more accumulator signs.
        let a = simhash64("compare quinoa and brown rice nutritionally");
        let b = simhash64("compare quinoa and white rice nutritionally");
        let d = hamming(a, b);
        assert!(d > 3 && d < 16, "distance was {}", d);
    }

    #[test]
    fn test_unrelated_texts_are_far() {
        let a = simhash64("compare quinoa and brown rice nutritionally");
        let b = simhash64("draft an email to my landlord about the lease renewal terms");
        assert!(hamming(a, b) > 8, "distance was {}", hamming(a, b));
    }

    #[test]
    fn test_hex_roundtrip() {
        let fp = simhash64("write a java program to connect to db");
        assert_eq!(from_hex(&to_hex(fp)), Some(fp));
        assert_eq!(to_hex(fp).len(), 16);
    }
}
