//! Incremental assignment worker
//!
//! Each tick: bootstrap gate (too little of the corpus labeled -> full
//! clustering pass), batch gate (too few pending prompts -> skip), then
//! per-prompt embed + nearest-centroid assignment with one commit per
//! prompt, a member recount, and a template sweep. The loop sleeps between
//! ticks; a shutdown signal interrupts the sleep immediately and lets an
//! in-flight tick finish its current prompt.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use promptloom_core::error::Result;
use promptloom_core::types::{TickMode, TickStats};
use promptloom_core::vector::cosine_similarity;
use promptloom_core::Config;
use promptloom_store::Database;

use crate::clusterer::FullClusterer;
use crate::embedding::Embedder;
use crate::hdbscan::HdbscanParams;
use crate::llm::ProviderWithFallback;
use crate::naming::FamilyNamer;
use crate::template::generator::TemplateEngine;

/// Cooperative shutdown signal shared between the worker and the signal
/// handler. Cancellation wakes any sleeping loop immediately.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ClassifyWorker {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    clusterer: FullClusterer,
    engine: Arc<TemplateEngine>,
    config: Config,
}

impl ClassifyWorker {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        namer: Arc<FamilyNamer>,
        provider: Arc<ProviderWithFallback>,
        config: Config,
    ) -> Self {
        let params = HdbscanParams {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            epsilon: config.epsilon,
        };
        let clusterer = FullClusterer::new(
            db.clone(),
            embedder.clone(),
            namer,
            provider.clone(),
            params,
        );
        let engine = Arc::new(TemplateEngine::new(db.clone(), provider));

        Self {
            db,
            embedder,
            clusterer,
            engine,
            config,
        }
    }

    pub fn template_engine(&self) -> Arc<TemplateEngine> {
        self.engine.clone()
    }

    pub fn full_clusterer(&self) -> &FullClusterer {
        &self.clusterer
    }

    /// One classification tick.
    ///
    /// `bypass_batch_gate` runs even when fewer than batch_size prompts are
    /// pending (the one-shot `run` command); `limit` caps the batch.
    pub async fn run_tick(
        &self,
        cancel: &CancelFlag,
        bypass_batch_gate: bool,
        limit: Option<usize>,
    ) -> Result<TickStats> {
        // Bootstrap gate: with too little of the corpus labeled, centroids
        // are not trustworthy yet; repartition everything instead.
        let classified = self.db.classified_count()?;
        if classified < self.config.bootstrap_threshold {
            info!(
                "Bootstrap mode: {}/{} classified, running full clustering",
                classified, self.config.bootstrap_threshold
            );
            let full = self.clusterer.run().await?;
            let templates_updated = self.engine.sweep(false).await?;
            return Ok(TickStats {
                mode: TickMode::FullClassification,
                pending: full.total_prompts,
                processed: full.assigned + full.unclustered,
                assigned: full.assigned,
                unclustered: full.unclustered,
                clusters_created: full.clusters_created,
                templates_updated,
            });
        }

        // Batch gate
        let batch_size = limit.unwrap_or(self.config.batch_size);
        let pending_count = self.db.pending_count()?;
        if !bypass_batch_gate && pending_count < self.config.batch_size as u64 {
            info!(
                "Not enough pending prompts ({}/{}), skipping cycle",
                pending_count, self.config.batch_size
            );
            return Ok(TickStats::skipped(pending_count));
        }

        let mut stats = TickStats {
            mode: TickMode::Incremental,
            pending: pending_count,
            processed: 0,
            assigned: 0,
            unclustered: 0,
            clusters_created: 0,
            templates_updated: 0,
        };

        let centroids = self.db.family_centroids()?;
        if centroids.is_empty() {
            warn!("No family centroids found; run full-classify first");
            stats.unclustered = pending_count.min(batch_size as u64);
            return Ok(stats);
        }
        info!("Loaded {} family centroids", centroids.len());

        let pending = self.db.pending_prompts(batch_size)?;
        for prompt in pending {
            // Finish the current prompt, then honor the stop signal
            if cancel.is_cancelled() {
                info!("Tick interrupted after {} prompts", stats.processed);
                break;
            }
            if prompt.normalized_text.is_empty() {
                continue;
            }

            let embedding = match prompt.embedding {
                // Reuse a vector computed by a different path
                Some(ref existing) if existing.len() == self.embedder.dim() => existing.clone(),
                _ => match self.embedder.embed(&prompt.normalized_text).await {
                    Ok(e) if e.len() == self.embedder.dim() => e,
                    Ok(e) => {
                        error!(
                            "Embedding dimension mismatch for prompt {} (expected {}, got {})",
                            prompt.prompt_id,
                            self.embedder.dim(),
                            e.len()
                        );
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to embed prompt {}: {}", prompt.prompt_id, e);
                        continue;
                    }
                },
            };

            let (family_id, similarity) = nearest_family(&embedding, &centroids);
            let accepted = similarity >= self.config.similarity_threshold;
            let family_ref = if accepted { family_id } else { None };

            self.db.update_embedding_and_family(
                &prompt.prompt_id,
                &embedding,
                family_ref.as_deref(),
            )?;

            if family_ref.is_some() {
                stats.assigned += 1;
            } else {
                stats.unclustered += 1;
            }
            stats.processed += 1;
        }

        self.db.recount_members()?;
        stats.templates_updated = self.engine.sweep(false).await?;

        info!(
            "Tick complete: {} processed, {} assigned, {} unclustered, {} templates",
            stats.processed, stats.assigned, stats.unclustered, stats.templates_updated
        );
        Ok(stats)
    }

    /// The long-running worker loop. Tick errors are logged and the loop
    /// continues; cancellation interrupts the sleep immediately.
    pub async fn run_loop(&self, cancel: CancelFlag) {
        let interval = Duration::from_secs(self.config.tick_interval_secs);
        info!(
            "Classification worker started (interval: {}s, batch: {})",
            self.config.tick_interval_secs, self.config.batch_size
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_tick(&cancel, false, None).await {
                Ok(stats) => {
                    if stats.mode != TickMode::Skipped {
                        info!(
                            "Processed: {} assigned, {} unclustered",
                            stats.assigned, stats.unclustered
                        );
                    }
                }
                Err(e) => {
                    error!("Error in classification cycle: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    info!("Classification worker stopping");
                    break;
                }
            }
        }
    }
}

/// Nearest family by cosine similarity against every centroid.
fn nearest_family(embedding: &[f32], centroids: &[(String, Vec<f32>)]) -> (Option<String>, f32) {
    let mut best: Option<&str> = None;
    let mut best_similarity = -1.0f32;

    for (family_id, centroid) in centroids {
        let similarity = cosine_similarity(embedding, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best = Some(family_id);
        }
    }

    (best.map(String::from), best_similarity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_family() {
        let centroids = vec![
            ("food".to_string(), vec![1.0, 0.0]),
            ("code".to_string(), vec![0.0, 1.0]),
        ];
        let (id, sim) = nearest_family(&[0.9, 0.1], &centroids);
        assert_eq!(id.as_deref(), Some("food"));
        assert!(sim > 0.9);

        let (id, sim) = nearest_family(&[1.0, 0.0], &[]);
        assert!(id.is_none());
        assert_eq!(sim, -1.0);
    }

    #[tokio::test]
    async fn test_cancel_flag_wakes_sleepers() {
        let cancel = CancelFlag::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(handle.await.unwrap());
        assert!(cancel.is_cancelled());
    }
}
