//! Template engine: threshold-triggered extraction with version chains
//!
//! Create when a family has no active template and at least three members;
//! update when at least five members joined since the last extraction.
//! Extraction runs on a sample of up to twenty members through the
//! configured provider (LLM primary, heuristic fallback) and persists a new
//! immutable version linked to its predecessor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use promptloom_core::error::Result;
use promptloom_core::types::{new_id, now_utc_iso, TemplateRecord};
use promptloom_store::Database;

use super::builder::CanonicalTemplate;
use super::refine::apply_refinement;
use super::versioning::{compute_bump, BumpKind, TemplateVersion};
use crate::llm::ProviderWithFallback;

/// Members required before the first template is extracted.
const CREATE_MIN_MEMBERS: i64 = 3;

/// Members sampled per extraction.
const SAMPLE_CAP: usize = 20;

/// Sampled prompts flagged as template seeds.
const SEED_CAP: usize = 10;

pub struct TemplateEngine {
    db: Arc<Database>,
    provider: Arc<ProviderWithFallback>,
}

impl TemplateEngine {
    pub fn new(db: Arc<Database>, provider: Arc<ProviderWithFallback>) -> Self {
        Self { db, provider }
    }

    /// Run the template check across every family.
    ///
    /// A failure on one family is logged and does not stop the sweep.
    /// Returns how many families got a new template version.
    pub async fn sweep(&self, force: bool) -> Result<u64> {
        let mut updated = 0;
        for family in self.db.all_families()? {
            match self.process_family(&family.family_id, force).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Template processing failed for family {}: {}",
                    family.family_id, e
                ),
            }
        }
        Ok(updated)
    }

    /// Check one family and extract a new template version if required.
    ///
    /// Returns true when a new version was persisted.
    pub async fn process_family(&self, family_id: &str, force: bool) -> Result<bool> {
        let Some(family) = self.db.get_family(family_id)? else {
            return Ok(false);
        };
        let active = self.db.active_template(family_id)?;

        if family.needs_template_update && active.is_none() {
            // Inconsistent flag; recover by treating the state as a create.
            warn!(
                "Family {} flagged for update but has no active template",
                family_id
            );
        }

        let threshold = family.template_update_threshold.max(1);
        let should_generate = force
            || match active {
                None => family.member_count >= CREATE_MIN_MEMBERS,
                Some(_) => {
                    family.member_count - family.member_count_at_last_template >= threshold
                }
            };
        if !should_generate {
            return Ok(false);
        }

        let members = self.db.prompts_by_family(family_id)?;
        if members.is_empty() {
            return Ok(false);
        }

        let samples: Vec<String> = members
            .iter()
            .take(SAMPLE_CAP)
            .map(|p| {
                if p.normalized_text.is_empty() {
                    p.original_text.clone()
                } else {
                    p.normalized_text.clone()
                }
            })
            .collect();

        let canonical = self.provider.extract_template(&samples).await?;
        if canonical.text.trim().is_empty() {
            warn!("Extraction produced an empty template for family {}", family_id);
            return Ok(false);
        }

        let (version, parent_id) = match active {
            Some(ref prev) => {
                let old = CanonicalTemplate {
                    text: prev.template_text.clone(),
                    slots: prev.slots.clone(),
                };
                let bump = compute_bump(&old, &canonical);
                if bump.kind == BumpKind::None {
                    // Identical extraction; advance the watermark so the
                    // trigger re-arms at the next threshold.
                    debug!("Template unchanged for family {}", family_id);
                    self.db
                        .set_template_watermark(family_id, family.member_count)?;
                    return Ok(false);
                }
                let old_version = TemplateVersion {
                    major: prev.version_major,
                    minor: prev.version_minor,
                    patch: prev.version_patch,
                };
                (old_version.bump(bump.kind), Some(prev.template_id.clone()))
            }
            None => (TemplateVersion::initial(), None),
        };

        let record = TemplateRecord {
            template_id: new_id(),
            family_id: family_id.to_string(),
            parent_template_id: parent_id,
            is_active: true,
            template_text: canonical.text,
            slots: canonical.slots,
            version_major: version.major,
            version_minor: version.minor,
            version_patch: version.patch,
            quality_score: None,
            is_refined: false,
            intent_embedding: None,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        };
        self.db.insert_template_version(&record, family.member_count)?;

        let seeds: Vec<String> = members
            .iter()
            .take(SEED_CAP)
            .map(|p| p.prompt_id.clone())
            .collect();
        self.db.mark_template_seeds(&seeds)?;

        info!(
            "Template v{} for family '{}' ({} members)",
            record.version_string(),
            family.family_name,
            family.member_count
        );
        Ok(true)
    }

    /// Record an externally refined wording of the active template.
    ///
    /// The refined text must keep the active template's slot names, order,
    /// and count; it is persisted as a PATCH-level version flagged refined.
    pub async fn record_refinement(
        &self,
        family_id: &str,
        refined_text: &str,
    ) -> Result<TemplateRecord> {
        let Some(family) = self.db.get_family(family_id)? else {
            return Err(promptloom_core::Error::FamilyNotFound(family_id.to_string()));
        };
        let Some(active) = self.db.active_template(family_id)? else {
            return Err(promptloom_core::Error::TemplateNotFound(format!(
                "no active template for family {}",
                family_id
            )));
        };

        let canonical = CanonicalTemplate {
            text: active.template_text.clone(),
            slots: active.slots.clone(),
        };
        let refined = apply_refinement(&canonical, refined_text)
            .map_err(|errors| promptloom_core::Error::InvalidInput(errors.join("; ")))?;

        let version = TemplateVersion {
            major: active.version_major,
            minor: active.version_minor,
            patch: active.version_patch,
        }
        .bump(BumpKind::Patch);

        let record = TemplateRecord {
            template_id: new_id(),
            family_id: family_id.to_string(),
            parent_template_id: Some(active.template_id.clone()),
            is_active: true,
            template_text: refined.text,
            slots: refined.slots,
            version_major: version.major,
            version_minor: version.minor,
            version_patch: version.patch,
            quality_score: active.quality_score,
            is_refined: true,
            intent_embedding: None,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        };
        self.db
            .insert_template_version(&record, family.member_count)?;
        Ok(record)
    }
}
