//! Full clustering pass
//!
//! Periodic whole-corpus repartition: embed whatever is missing, run the
//! density clusterer, compute per-cluster mean centroids (stored
//! unnormalized), and commit each cluster as a named family in its own
//! transaction. Noise points get their family reference cleared.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use promptloom_core::error::Result;
use promptloom_core::types::FullPassStats;
use promptloom_core::vector::mean_centroid;
use promptloom_store::Database;

use crate::embedding::Embedder;
use crate::hdbscan::{cluster, HdbscanParams};
use crate::llm::ProviderWithFallback;
use crate::naming::FamilyNamer;

pub struct FullClusterer {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    namer: Arc<FamilyNamer>,
    provider: Arc<ProviderWithFallback>,
    params: HdbscanParams,
}

impl FullClusterer {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        namer: Arc<FamilyNamer>,
        provider: Arc<ProviderWithFallback>,
        params: HdbscanParams,
    ) -> Self {
        Self {
            db,
            embedder,
            namer,
            provider,
            params,
        }
    }

    /// Run the full pass. Deterministic given the same corpus and
    /// parameters; re-running after a partial failure is safe because each
    /// family commits independently.
    pub async fn run(&self) -> Result<FullPassStats> {
        let mut stats = FullPassStats::default();

        let prompts = self.db.all_prompts()?;
        stats.total_prompts = prompts.len() as u64;
        if prompts.len() < 2 {
            info!("Not enough prompts for clustering (need at least 2)");
            return Ok(stats);
        }

        // Reuse stored embeddings; fill in the rest
        let mut ids: Vec<String> = Vec::with_capacity(prompts.len());
        let mut texts: Vec<String> = Vec::with_capacity(prompts.len());
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(prompts.len());
        let dim = self.embedder.dim();

        for prompt in &prompts {
            if prompt.normalized_text.is_empty() {
                continue;
            }
            match prompt.embedding {
                Some(ref existing) if existing.len() == dim => {
                    ids.push(prompt.prompt_id.clone());
                    texts.push(prompt.normalized_text.clone());
                    embeddings.push(existing.clone());
                }
                _ => match self.embedder.embed(&prompt.normalized_text).await {
                    Ok(embedding) if embedding.len() == dim => {
                        self.db.update_embedding(&prompt.prompt_id, &embedding)?;
                        stats.embedded += 1;
                        ids.push(prompt.prompt_id.clone());
                        texts.push(prompt.normalized_text.clone());
                        embeddings.push(embedding);
                    }
                    Ok(embedding) => {
                        // Fatal for this prompt only; it stays unembedded
                        warn!(
                            "Embedding dimension mismatch for prompt {} (expected {}, got {})",
                            prompt.prompt_id,
                            dim,
                            embedding.len()
                        );
                    }
                    Err(e) => {
                        warn!("Failed to embed prompt {}: {}", prompt.prompt_id, e);
                    }
                },
            }
        }

        if embeddings.len() < 2 {
            info!("Not enough embedded prompts for clustering");
            return Ok(stats);
        }

        info!("Clustering {} embedded prompts", embeddings.len());
        let result = cluster(&embeddings, &self.params);
        info!("Found {} clusters", result.num_clusters);

        // Group members per label
        let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        let mut noise: Vec<String> = Vec::new();
        for (idx, &label) in result.labels.iter().enumerate() {
            if label == -1 {
                noise.push(ids[idx].clone());
            } else {
                members.entry(label).or_default().push(idx);
            }
        }

        for (label, idxs) in &members {
            let vectors: Vec<&[f32]> = idxs.iter().map(|&i| embeddings[i].as_slice()).collect();
            let Some(centroid) = mean_centroid(&vectors) else {
                continue;
            };

            let samples: Vec<String> = idxs.iter().take(5).map(|&i| texts[i].clone()).collect();
            let name = self.namer.name_cluster(&samples, *label).await;
            let description = self.provider.generate_explanation(&samples).await.ok();

            let member_ids: Vec<String> = idxs.iter().map(|&i| ids[i].clone()).collect();
            match self
                .db
                .commit_cluster(&name, description.as_deref(), &centroid, &member_ids)
            {
                Ok(_) => {
                    stats.clusters_created += 1;
                    stats.assigned += member_ids.len() as u64;
                }
                Err(e) => {
                    // Other families are unaffected; this one retries on
                    // the next pass
                    warn!("Failed to commit cluster '{}': {}", name, e);
                }
            }
        }

        self.db.clear_family_assignments(&noise)?;
        stats.unclustered = noise.len() as u64;

        self.db.recount_members()?;

        info!(
            "Full pass complete: {} clusters, {} assigned, {} unclustered",
            stats.clusters_created, stats.assigned, stats.unclustered
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use promptloom_core::normalize::{dedup_hash, normalize_text};
    use promptloom_core::simhash::{simhash64, to_hex};
    use promptloom_core::types::{new_id, now_utc_iso, Prompt};

    fn make_prompt(text: &str) -> Prompt {
        let normalized = normalize_text(text);
        Prompt {
            prompt_id: new_id(),
            original_text: text.to_string(),
            normalized_text: normalized.clone(),
            dedup_hash: dedup_hash(&normalized),
            simhash: to_hex(simhash64(&normalized)),
            embedding: None,
            family_id: None,
            metadata: None,
            is_template_seed: false,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        }
    }

    fn clusterer(db: Arc<Database>) -> FullClusterer {
        FullClusterer::new(
            db,
            Arc::new(HashEmbedder::default()),
            Arc::new(FamilyNamer::fallback_only()),
            Arc::new(ProviderWithFallback::heuristic()),
            HdbscanParams::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_corpus_no_families() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("test.db")).unwrap());

        let stats = clusterer(db.clone()).run().await.unwrap();
        assert_eq!(stats.clusters_created, 0);
        assert_eq!(db.family_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_prompt_no_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("test.db")).unwrap());
        db.insert_prompt(&make_prompt("only one prompt here")).unwrap();

        let stats = clusterer(db.clone()).run().await.unwrap();
        assert_eq!(stats.clusters_created, 0);
        assert_eq!(db.family_count().unwrap(), 0);
    }
}
