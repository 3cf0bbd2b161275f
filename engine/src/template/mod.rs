//! Template extraction pipeline
//!
//! Per family: align member prompts, detect typed variable slots, assemble a
//! canonical parametric template, and maintain it under semantic versioning
//! with an immutable version chain. Alignment, slot typing, assembly,
//! versioning, and rendering are pure and synchronous; only the optional
//! LLM-backed steps suspend.

pub mod alignment;
pub mod builder;
pub mod generator;
pub mod refine;
pub mod render;
pub mod slots;
pub mod versioning;

pub use builder::CanonicalTemplate;
