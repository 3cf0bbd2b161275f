//! Structural alignment of family members
//!
//! Token-level longest-common-subsequence against the first prompt as
//! reference. Tokens are maximal runs of non-whitespace OR whitespace, so
//! the skeleton reconstructs spacing faithfully. Reference positions that
//! fail to match in any other prompt become variable regions.

use std::sync::OnceLock;

use regex::Regex;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+|\s+").expect("token regex"))
}

/// Split text into non-whitespace and whitespace runs.
pub fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A collapsed run of variable reference positions.
#[derive(Debug, Clone)]
pub struct VariableRegion {
    /// First reference token index of the run
    pub start: usize,
    /// One past the last reference token index
    pub end: usize,
    /// Differing token sequences collected across prompts
    pub examples: Vec<String>,
}

/// Result of aligning the prompts of one family.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Invariant text with `{{slot_k}}` placeholders for variable regions
    pub skeleton: String,
    pub regions: Vec<VariableRegion>,
}

/// Matched index pairs of the LCS between two token sequences.
fn lcs_pairs(a: &[String], b: &[String]) -> Vec<(usize, usize)> {
    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0u32; n + 1]; m + 1];

    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

/// Align prompts to find common structure and variable regions.
pub fn align_prompts(prompts: &[String]) -> Alignment {
    if prompts.is_empty() {
        return Alignment {
            skeleton: String::new(),
            regions: Vec::new(),
        };
    }
    if prompts.len() == 1 {
        return Alignment {
            skeleton: prompts[0].clone(),
            regions: Vec::new(),
        };
    }

    let reference = tokenize(&prompts[0]);
    let mut mask = vec![true; reference.len()];
    let mut collected: Vec<Vec<String>> = vec![Vec::new(); reference.len()];

    for other_text in &prompts[1..] {
        let other = tokenize(other_text);
        let pairs = lcs_pairs(&reference, &other);

        // Walk gaps between consecutive matches (plus both ends)
        let mut prev = (0usize, 0usize); // exclusive start of next gap
        let mut boundaries: Vec<((usize, usize), (usize, usize))> = Vec::new();
        for &(ia, ib) in &pairs {
            boundaries.push((prev, (ia, ib)));
            prev = (ia + 1, ib + 1);
        }
        boundaries.push((prev, (reference.len(), other.len())));

        for ((ra, ba), (rb, bb)) in boundaries {
            if ra == rb && ba == bb {
                continue;
            }
            let replacement: String = other[ba..bb].concat();
            let replacement = replacement.trim().to_string();
            for i in ra..rb {
                mask[i] = false;
                if !replacement.is_empty() {
                    collected[i].push(replacement.clone());
                }
            }
        }
    }

    // Collapse consecutive variable positions into regions
    let mut skeleton = String::new();
    let mut regions = Vec::new();
    let mut i = 0;
    while i < reference.len() {
        if mask[i] {
            skeleton.push_str(&reference[i]);
            i += 1;
            continue;
        }

        let start = i;
        let mut examples: Vec<String> = Vec::new();
        let mut reference_run = String::new();
        while i < reference.len() && !mask[i] {
            reference_run.push_str(&reference[i]);
            for ex in &collected[i] {
                if !examples.contains(ex) {
                    examples.push(ex.clone());
                }
            }
            i += 1;
        }
        let reference_run = reference_run.trim().to_string();
        if !reference_run.is_empty() && !examples.contains(&reference_run) {
            examples.insert(0, reference_run);
        }

        skeleton.push_str(&format!("{{{{slot_{}}}}}", regions.len()));
        regions.push(VariableRegion {
            start,
            end: i,
            examples,
        });
    }

    Alignment { skeleton, regions }
}
