//! Core data types for Promptloom
//!
//! These types are shared between the store, the classification engine,
//! the ingestion adapters, and the CLI.

use serde::{Deserialize, Serialize};

/// Return the current UTC time as the ISO-8601 string stored in the database.
pub fn now_utc_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Generate a fresh prompt/family/template identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Typed hole in a canonical template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Numeric,
    Enum,
    Text,
    Date,
    Email,
    Url,
}

impl SlotType {
    /// Return the lowercase string representation used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Numeric => "numeric",
            SlotType::Enum => "enum",
            SlotType::Text => "text",
            SlotType::Date => "date",
            SlotType::Email => "email",
            SlotType::Url => "url",
        }
    }
}

/// A variable slot definition within a template.
///
/// # Fields
/// - `name`: Unique name within the template (`{{name}}` placeholder).
/// - `slot_type`: Detected type of the slot.
/// - `position`: Token index of the slot in the template skeleton.
/// - `examples`: Example values collected from member prompts (capped at 10).
/// - `enum_values`: Finite value set, only for enum slots.
/// - `validation_pattern`: Optional regex a value must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub slot_type: SlotType,
    pub position: usize,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub validation_pattern: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Mutation tag on a lineage edge between two prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    MinorEdit,
    VariableChange,
    SystemChange,
    ModerateChange,
    MajorChange,
}

impl MutationKind {
    /// Return the snake_case string representation used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::MinorEdit => "minor_edit",
            MutationKind::VariableChange => "variable_change",
            MutationKind::SystemChange => "system_change",
            MutationKind::ModerateChange => "moderate_change",
            MutationKind::MajorChange => "major_change",
        }
    }

    /// Parse a stored mutation tag. Unknown tags map to `MajorChange`.
    pub fn parse(s: &str) -> Self {
        match s {
            "minor_edit" => MutationKind::MinorEdit,
            "variable_change" => MutationKind::VariableChange,
            "system_change" => MutationKind::SystemChange,
            "moderate_change" => MutationKind::ModerateChange,
            _ => MutationKind::MajorChange,
        }
    }
}

/// A prompt as stored in the database.
///
/// Immutable once written except for the embedding vector, the family
/// assignment, and the template-seed flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub prompt_id: String,
    pub original_text: String,
    pub normalized_text: String,
    /// SHA-256 hex of the normalized text
    pub dedup_hash: String,
    /// 64-bit SimHash of the normalized text, lower hex
    pub simhash: String,
    pub embedding: Option<Vec<f32>>,
    pub family_id: Option<String>,
    /// Opaque JSON metadata bag (source, timestamps, model, cost)
    pub metadata: Option<String>,
    pub is_template_seed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A family of semantically similar prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub family_id: String,
    pub family_name: String,
    pub description: Option<String>,
    pub member_count: i64,
    /// Arithmetic mean of member embeddings. Stored unnormalized;
    /// downstream comparison is cosine, which normalizes internally.
    pub centroid: Option<Vec<f32>>,
    /// Incremented on each full-pass recompute
    pub version: i64,
    pub member_count_at_last_template: i64,
    pub needs_template_update: bool,
    pub template_update_threshold: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A canonical template version derived from a family.
///
/// Versions form an immutable linear chain per family via
/// `parent_template_id`; exactly one version is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub template_id: String,
    pub family_id: String,
    pub parent_template_id: Option<String>,
    pub is_active: bool,
    pub template_text: String,
    pub slots: Vec<Slot>,
    pub version_major: i64,
    pub version_minor: i64,
    pub version_patch: i64,
    pub quality_score: Option<f64>,
    pub is_refined: bool,
    pub intent_embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

impl TemplateRecord {
    /// Semantic version rendered as "major.minor.patch".
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_patch
        )
    }
}

/// Directed parent-to-child link between two prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub lineage_id: String,
    pub parent_prompt_id: Option<String>,
    pub child_prompt_id: String,
    pub mutation: MutationKind,
    pub confidence: f64,
    pub created_at: String,
}

/// Outcome counters for one ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub saved: u64,
    pub exact_duplicates: u64,
    pub near_duplicates: u64,
    pub skipped_empty: u64,
}

/// Outcome counters for a full clustering pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullPassStats {
    pub total_prompts: u64,
    pub embedded: u64,
    pub clusters_created: u64,
    pub assigned: u64,
    pub unclustered: u64,
    pub templates_updated: u64,
}

/// Which path a classification tick took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    FullClassification,
    Incremental,
    Skipped,
}

/// Outcome counters for one incremental-assignment tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickStats {
    pub mode: TickMode,
    pub pending: u64,
    pub processed: u64,
    pub assigned: u64,
    pub unclustered: u64,
    pub clusters_created: u64,
    pub templates_updated: u64,
}

impl TickStats {
    pub fn skipped(pending: u64) -> Self {
        Self {
            mode: TickMode::Skipped,
            pending,
            processed: 0,
            assigned: 0,
            unclustered: 0,
            clusters_created: 0,
            templates_updated: 0,
        }
    }
}

/// Aggregate corpus statistics for the `stats` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_prompts: u64,
    pub pending_prompts: u64,
    pub classified_prompts: u64,
    pub total_families: u64,
    pub average_family_size: f64,
    pub total_templates: u64,
    pub total_lineage_edges: u64,
    pub last_ingestion: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_type_roundtrip() {
        let slot = Slot {
            name: "task".to_string(),
            slot_type: SlotType::Text,
            position: 4,
            examples: vec!["scrape a website".to_string()],
            enum_values: None,
            validation_pattern: None,
            description: None,
            required: true,
            default_value: None,
        };

        let json = serde_json::to_string(&slot).unwrap();
        let back: Slot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "task");
        assert_eq!(back.slot_type, SlotType::Text);
        assert!(back.required);
    }

    #[test]
    fn test_mutation_kind_parse() {
        assert_eq!(MutationKind::parse("minor_edit"), MutationKind::MinorEdit);
        assert_eq!(MutationKind::parse("bogus"), MutationKind::MajorChange);
        assert_eq!(
            MutationKind::parse(MutationKind::VariableChange.as_str()),
            MutationKind::VariableChange
        );
    }

    #[test]
    fn test_version_string() {
        let t = TemplateRecord {
            template_id: new_id(),
            family_id: new_id(),
            parent_template_id: None,
            is_active: true,
            template_text: "Write a {{language}} script".to_string(),
            slots: vec![],
            version_major: 1,
            version_minor: 2,
            version_patch: 3,
            quality_score: None,
            is_refined: false,
            intent_embedding: None,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        };
        assert_eq!(t.version_string(), "1.2.3");
    }
}
