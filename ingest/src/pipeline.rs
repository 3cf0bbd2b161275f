//! Ingestion pipeline: normalize, fingerprint, dedup, persist
//!
//! Duplicates are not errors; they are counted and reported. The one-shot
//! add path additionally routes the new prompt to its nearest family once
//! the corpus is bootstrapped, and records a lineage edge when a confident
//! parent exists.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use promptloom_core::error::Result;
use promptloom_core::normalize::{dedup_hash, normalize_text};
use promptloom_core::simhash::{from_hex, hamming, simhash64, to_hex};
use promptloom_core::types::{
    new_id, now_utc_iso, IngestReport, LineageEdge, MutationKind, Prompt,
};
use promptloom_core::vector::cosine_similarity;
use promptloom_core::Config;
use promptloom_engine::{DedupIndex, Embedder};
use promptloom_store::Database;

use crate::files::RawRecord;

/// Similarity at which a family member is a plausible lineage parent.
const LINEAGE_MIN_SIMILARITY: f32 = 0.70;

/// Outcome of ingesting one text.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Saved(Prompt),
    ExactDuplicate { prompt_id: String },
    NearDuplicate { prompt_id: String, distance: u32 },
    Empty,
}

/// Dedup-aware ingestion over a batch. The SimHash index is rebuilt from
/// the store once per ingestor and kept consistent as the batch saves.
pub struct Ingestor {
    db: Arc<Database>,
    index: DedupIndex,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, hamming_threshold: u32) -> Result<Self> {
        let index = DedupIndex::load(&db, hamming_threshold)?;
        Ok(Self { db, index })
    }

    /// Run one text through dedup and persist it if it is new.
    pub fn ingest_text(&mut self, raw: &str, metadata: Option<&Value>) -> Result<IngestOutcome> {
        let normalized = normalize_text(raw);
        if normalized.is_empty() {
            return Ok(IngestOutcome::Empty);
        }

        let hash = dedup_hash(&normalized);
        if let Some(existing) = self.db.get_prompt_by_hash(&hash)? {
            debug!("Exact duplicate of {}", existing.prompt_id);
            return Ok(IngestOutcome::ExactDuplicate {
                prompt_id: existing.prompt_id,
            });
        }

        let fingerprint = simhash64(&normalized);
        if let Some((prompt_id, distance)) = self.index.near_hit(fingerprint) {
            let snippet: String = normalized.chars().take(50).collect();
            info!(
                "Near duplicate (Hamming={}) of {}: '{}'",
                distance, prompt_id, snippet
            );
            return Ok(IngestOutcome::NearDuplicate {
                prompt_id,
                distance,
            });
        }

        let prompt = Prompt {
            prompt_id: new_id(),
            original_text: raw.to_string(),
            normalized_text: normalized,
            dedup_hash: hash,
            simhash: to_hex(fingerprint),
            embedding: None,
            family_id: None,
            metadata: metadata.map(|m| m.to_string()),
            is_template_seed: false,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        };
        self.db.insert_prompt(&prompt)?;
        self.index.insert(prompt.prompt_id.clone(), fingerprint);

        Ok(IngestOutcome::Saved(prompt))
    }

    /// Ingest a batch of raw records, accumulating the report counters.
    pub fn ingest_many(&mut self, records: &[RawRecord]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for record in records {
            match self.ingest_text(&record.text, Some(&record.metadata))? {
                IngestOutcome::Saved(_) => report.saved += 1,
                IngestOutcome::ExactDuplicate { .. } => report.exact_duplicates += 1,
                IngestOutcome::NearDuplicate { .. } => report.near_duplicates += 1,
                IngestOutcome::Empty => report.skipped_empty += 1,
            }
        }
        info!(
            "Deduplication complete: {} saved, {} exact duplicates, {} near-duplicates skipped",
            report.saved, report.exact_duplicates, report.near_duplicates
        );
        Ok(report)
    }
}

/// Outcome of the one-shot add path.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub outcome: IngestOutcome,
    /// Family the prompt was routed to, with the similarity
    pub assigned: Option<(String, f32)>,
}

/// Classify a parent/child relation from fingerprints and similarity.
fn detect_mutation(parent: &Prompt, child: &Prompt, similarity: f32) -> MutationKind {
    let close_fingerprints = match (from_hex(&parent.simhash), from_hex(&child.simhash)) {
        (Some(a), Some(b)) => hamming(a, b) <= 8,
        _ => false,
    };

    if similarity >= 0.95 || close_fingerprints {
        MutationKind::MinorEdit
    } else if similarity >= 0.80 {
        MutationKind::ModerateChange
    } else {
        MutationKind::MajorChange
    }
}

/// Dedup, persist, and, once the corpus is bootstrapped, embed, assign
/// to the nearest family, and record lineage against the closest member.
pub async fn add_and_classify(
    db: &Arc<Database>,
    embedder: &dyn Embedder,
    config: &Config,
    raw: &str,
    metadata: Option<&Value>,
) -> Result<AddOutcome> {
    let mut ingestor = Ingestor::new(db.clone(), config.hamming_threshold)?;
    let outcome = ingestor.ingest_text(raw, metadata)?;

    let IngestOutcome::Saved(ref prompt) = outcome else {
        return Ok(AddOutcome {
            outcome,
            assigned: None,
        });
    };

    // Below the bootstrap threshold the centroids are not trustworthy;
    // leave the prompt pending for the worker.
    if db.classified_count()? < config.bootstrap_threshold {
        return Ok(AddOutcome {
            outcome,
            assigned: None,
        });
    }

    let centroids = db.family_centroids()?;
    if centroids.is_empty() {
        return Ok(AddOutcome {
            outcome,
            assigned: None,
        });
    }

    let embedding = embedder.embed(&prompt.normalized_text).await?;

    let mut best: Option<(&str, f32)> = None;
    for (family_id, centroid) in &centroids {
        let similarity = cosine_similarity(&embedding, centroid);
        if best.map_or(true, |(_, s)| similarity > s) {
            best = Some((family_id, similarity));
        }
    }

    let assigned = match best {
        Some((family_id, similarity)) if similarity >= config.similarity_threshold => {
            db.update_embedding_and_family(&prompt.prompt_id, &embedding, Some(family_id))?;
            record_lineage(db, prompt, &embedding, family_id)?;
            Some((family_id.to_string(), similarity))
        }
        _ => {
            db.update_embedding_and_family(&prompt.prompt_id, &embedding, None)?;
            None
        }
    };

    Ok(AddOutcome { outcome, assigned })
}

/// Link the new prompt to its closest family member when that member is
/// similar enough to be a plausible parent.
fn record_lineage(
    db: &Database,
    child: &Prompt,
    child_embedding: &[f32],
    family_id: &str,
) -> Result<()> {
    let members = db.prompts_by_family(family_id)?;

    let mut best: Option<(&Prompt, f32)> = None;
    for member in &members {
        if member.prompt_id == child.prompt_id {
            continue;
        }
        let Some(ref embedding) = member.embedding else {
            continue;
        };
        let similarity = cosine_similarity(child_embedding, embedding);
        if best.map_or(true, |(_, s)| similarity > s) {
            best = Some((member, similarity));
        }
    }

    if let Some((parent, similarity)) = best {
        if similarity >= LINEAGE_MIN_SIMILARITY {
            let edge = LineageEdge {
                lineage_id: new_id(),
                parent_prompt_id: Some(parent.prompt_id.clone()),
                child_prompt_id: child.prompt_id.clone(),
                mutation: detect_mutation(parent, child, similarity),
                confidence: similarity as f64,
                created_at: now_utc_iso(),
            };
            db.insert_lineage(&edge)?;
            debug!(
                "Lineage {} -> {} ({})",
                parent.prompt_id,
                child.prompt_id,
                edge.mutation.as_str()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_db() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("test.db")).unwrap());
        (dir, db)
    }

    #[test]
    fn test_exact_dedup_idempotence() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db.clone(), 3).unwrap();

        let first = ingestor
            .ingest_text("Write a Python script to scrape a website.", None)
            .unwrap();
        assert!(matches!(first, IngestOutcome::Saved(_)));

        let second = ingestor
            .ingest_text("Write a Python script to scrape a website.", None)
            .unwrap();
        assert!(matches!(second, IngestOutcome::ExactDuplicate { .. }));
        assert_eq!(db.prompt_count().unwrap(), 1);
    }

    #[test]
    fn test_punctuation_only_difference_is_exact_dup() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db.clone(), 3).unwrap();

        ingestor
            .ingest_text("Compare quinoa and brown rice nutritionally", None)
            .unwrap();
        let outcome = ingestor
            .ingest_text("Compare quinoa and brown rice nutritionally.", None)
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::ExactDuplicate { .. }));
        assert_eq!(db.prompt_count().unwrap(), 1);
    }

    const LONG_PROMPT: &str = "Please write a detailed python script that will scrape product \
         listings from an ecommerce website and save the results into a csv file for later analysis";
    const LONG_PROMPT_VARIANT: &str = "Please write a detailed python script that will scrape product \
         reviews from an ecommerce website and save the results into a csv file for later analysis";

    #[test]
    fn test_near_dup_detected_within_batch() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db.clone(), 3).unwrap();

        ingestor.ingest_text(LONG_PROMPT, None).unwrap();
        let outcome = ingestor.ingest_text(LONG_PROMPT_VARIANT, None).unwrap();
        match outcome {
            IngestOutcome::NearDuplicate { distance, .. } => assert!(distance <= 3),
            other => panic!("expected near duplicate, got {:?}", other),
        }
        assert_eq!(db.prompt_count().unwrap(), 1);
    }

    #[test]
    fn test_near_dup_detected_across_runs() {
        let (_dir, db) = open_db();

        let mut first = Ingestor::new(db.clone(), 3).unwrap();
        first.ingest_text(LONG_PROMPT, None).unwrap();

        // New ingestor rebuilds the index from the database
        let mut second = Ingestor::new(db.clone(), 3).unwrap();
        let outcome = second.ingest_text(LONG_PROMPT_VARIANT, None).unwrap();
        assert!(matches!(outcome, IngestOutcome::NearDuplicate { .. }));
    }

    #[test]
    fn test_short_one_token_change_is_not_a_near_dup_at_default_threshold() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db.clone(), 3).unwrap();

        ingestor
            .ingest_text("compare quinoa and brown rice nutritionally", None)
            .unwrap();
        // Short texts shift many fingerprint bits per substitution
        let outcome = ingestor
            .ingest_text("compare quinoa and white rice nutritionally", None)
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Saved(_)));
        assert_eq!(db.prompt_count().unwrap(), 2);
    }

    #[test]
    fn test_empty_input_skipped() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db, 3).unwrap();
        let outcome = ingestor.ingest_text("  !!! ", None).unwrap();
        assert!(matches!(outcome, IngestOutcome::Empty));
    }

    #[test]
    fn test_ingest_many_report() {
        let (_dir, db) = open_db();
        let mut ingestor = Ingestor::new(db, 3).unwrap();

        let records = vec![
            RawRecord {
                text: "Write a Python script to scrape a website.".to_string(),
                metadata: json!({"source": "file"}),
            },
            RawRecord {
                text: "Write a Python script to scrape a website.".to_string(),
                metadata: json!({"source": "file"}),
            },
            RawRecord {
                text: "Summarize the attached quarterly report".to_string(),
                metadata: json!({"source": "file"}),
            },
        ];
        let report = ingestor.ingest_many(&records).unwrap();
        assert_eq!(report.saved, 2);
        assert_eq!(report.exact_duplicates, 1);
        assert_eq!(report.near_duplicates, 0);
    }
}
