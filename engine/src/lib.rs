//! Promptloom Engine - classification and templating core
//!
//! This crate provides:
//! - Two-tier deduplication (exact SHA-256 + SimHash under Hamming distance)
//! - Density-based full clustering with family centroids
//! - The incremental assignment worker with bootstrap fallback
//! - The template extraction engine with immutable semantic versioning
//! - Embedding and LLM provider seams (HTTP-backed with local fallbacks)

pub mod assigner;
pub mod clusterer;
pub mod dedup;
pub mod embedding;
pub mod hdbscan;
pub mod llm;
pub mod naming;
pub mod template;

pub use assigner::{CancelFlag, ClassifyWorker};
pub use clusterer::FullClusterer;
pub use dedup::DedupIndex;
pub use embedding::{CachedEmbedder, Embedder, HashEmbedder, HttpEmbedder};
pub use llm::{HeuristicProvider, LlmProvider, ProviderWithFallback, TemplateProvider};
pub use naming::FamilyNamer;
pub use template::generator::TemplateEngine;
