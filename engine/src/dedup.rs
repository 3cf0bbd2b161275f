//! Two-tier deduplication index
//!
//! The database is the source of truth; this structure is a per-run cache
//! rebuilt from the stored fingerprints. Exact hits go straight to the
//! prompt store's unique hash index; near hits are answered here from the
//! SimHash table.
//!
//! Fingerprints are indexed by their 4 x 16-bit blocks: two fingerprints
//! within Hamming distance 3 must agree exactly on at least one block, so
//! the candidate set for a lookup is the union of the four block matches.
//! Thresholds of 4 bits or more fall back to a full scan; either path
//! returns the same result set as scanning everything.

use std::collections::HashMap;

use tracing::debug;

use promptloom_core::error::Result;
use promptloom_core::simhash::{from_hex, hamming};
use promptloom_store::Database;

/// In-memory SimHash index over the stored corpus.
pub struct DedupIndex {
    threshold: u32,
    /// (prompt_id, fingerprint), insertion-ordered
    fingerprints: Vec<(String, u64)>,
    /// block index -> block value -> fingerprint positions
    blocks: [HashMap<u16, Vec<usize>>; 4],
}

impl DedupIndex {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            fingerprints: Vec::new(),
            blocks: Default::default(),
        }
    }

    /// Rebuild the index from every stored fingerprint.
    pub fn load(db: &Database, threshold: u32) -> Result<Self> {
        let mut index = Self::new(threshold);
        for (prompt_id, hex) in db.all_simhashes()? {
            if let Some(fp) = from_hex(&hex) {
                index.insert(prompt_id, fp);
            }
        }
        debug!("Loaded {} simhashes from database", index.len());
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Add a fingerprint so later candidates in the same batch see it.
    pub fn insert(&mut self, prompt_id: String, fingerprint: u64) {
        let pos = self.fingerprints.len();
        self.fingerprints.push((prompt_id, fingerprint));
        for (i, block) in blocks_of(fingerprint).into_iter().enumerate() {
            self.blocks[i].entry(block).or_default().push(pos);
        }
    }

    /// Smallest-distance stored prompt within the threshold, or None.
    ///
    /// Ties resolve to the earliest-inserted fingerprint.
    pub fn near_hit(&self, fingerprint: u64) -> Option<(String, u32)> {
        let mut best: Option<(usize, u32)> = None;

        let mut consider = |pos: usize, best: &mut Option<(usize, u32)>| {
            let (_, stored) = &self.fingerprints[pos];
            let d = hamming(fingerprint, *stored);
            if d <= self.threshold {
                match *best {
                    Some((best_pos, best_d)) if (d, pos) >= (best_d, best_pos) => {}
                    _ => *best = Some((pos, d)),
                }
            }
        };

        if self.threshold < 4 {
            let mut seen = std::collections::HashSet::new();
            for (i, block) in blocks_of(fingerprint).into_iter().enumerate() {
                if let Some(positions) = self.blocks[i].get(&block) {
                    for &pos in positions {
                        if seen.insert(pos) {
                            consider(pos, &mut best);
                        }
                    }
                }
            }
        } else {
            for pos in 0..self.fingerprints.len() {
                consider(pos, &mut best);
            }
        }

        best.map(|(pos, d)| (self.fingerprints[pos].0.clone(), d))
    }
}

fn blocks_of(fingerprint: u64) -> [u16; 4] {
    [
        (fingerprint & 0xFFFF) as u16,
        ((fingerprint >> 16) & 0xFFFF) as u16,
        ((fingerprint >> 32) & 0xFFFF) as u16,
        ((fingerprint >> 48) & 0xFFFF) as u16,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloom_core::simhash::simhash64;

    #[test]
    fn test_near_hit_within_threshold() {
        let mut index = DedupIndex::new(3);
        let fp = simhash64("compare quinoa and brown rice nutritionally");
        index.insert("p1".to_string(), fp);

        // 2 bits flipped
        let probe = fp ^ 0b101;
        let (id, d) = index.near_hit(probe).unwrap();
        assert_eq!(id, "p1");
        assert_eq!(d, 2);

        // 4 bits flipped is beyond the default threshold
        assert!(index.near_hit(fp ^ 0b1111).is_none());
    }

    #[test]
    fn test_near_hit_prefers_smallest_distance() {
        let mut index = DedupIndex::new(3);
        index.insert("far".to_string(), 0b111);
        index.insert("close".to_string(), 0b001);

        let (id, d) = index.near_hit(0).unwrap();
        assert_eq!(id, "close");
        assert_eq!(d, 1);
    }

    #[test]
    fn test_blocked_lookup_matches_full_scan() {
        let texts = [
            "write a python script to scrape a website",
            "write a java program to connect to the database",
            "compare quinoa and brown rice nutritionally",
            "draft an email to my landlord about rent",
            "summarize this article in three bullet points",
        ];

        let mut blocked = DedupIndex::new(3);
        let mut linear = DedupIndex::new(4); // threshold >= 4 forces full scan
        for (i, text) in texts.iter().enumerate() {
            let fp = simhash64(text);
            blocked.insert(format!("p{}", i), fp);
            linear.insert(format!("p{}", i), fp);
        }

        for text in &texts {
            for flip in [0u64, 0b1, 0b11, 0b100_000_000] {
                let probe = simhash64(text) ^ flip;
                let b = blocked.near_hit(probe);
                let l = linear.near_hit(probe).filter(|(_, d)| *d <= 3);
                assert_eq!(b, l, "probe for {:?} flip {:#b}", text, flip);
            }
        }
    }

    #[test]
    fn test_empty_index() {
        let index = DedupIndex::new(3);
        assert!(index.is_empty());
        assert!(index.near_hit(42).is_none());
    }
}
