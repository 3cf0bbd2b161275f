//! Semantic versioning for templates
//!
//! Bump rules: a removed or retyped slot is MAJOR, an added slot is MINOR,
//! a text-only change is PATCH, identical templates are NONE.

use std::collections::HashMap;

use super::builder::CanonicalTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpKind {
    None,
    Patch,
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateVersion {
    pub major: i64,
    pub minor: i64,
    pub patch: i64,
}

impl TemplateVersion {
    pub fn initial() -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
        }
    }

    pub fn bump(&self, kind: BumpKind) -> Self {
        match kind {
            BumpKind::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
            BumpKind::Minor => Self {
                major: self.major,
                minor: self.minor + 1,
                patch: 0,
            },
            BumpKind::Patch => Self {
                major: self.major,
                minor: self.minor,
                patch: self.patch + 1,
            },
            BumpKind::None => *self,
        }
    }
}

impl std::fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Changes between two template versions, with the resulting bump.
#[derive(Debug, Clone)]
pub struct BumpResult {
    pub kind: BumpKind,
    pub changes: Vec<String>,
}

/// Compare the active template against a freshly extracted one.
pub fn compute_bump(old: &CanonicalTemplate, new: &CanonicalTemplate) -> BumpResult {
    let old_types: HashMap<&str, _> = old
        .slots
        .iter()
        .map(|s| (s.name.as_str(), s.slot_type))
        .collect();
    let new_types: HashMap<&str, _> = new
        .slots
        .iter()
        .map(|s| (s.name.as_str(), s.slot_type))
        .collect();

    let mut kind = BumpKind::None;
    let mut changes = Vec::new();

    let removed: Vec<&str> = old_types
        .keys()
        .filter(|k| !new_types.contains_key(**k))
        .copied()
        .collect();
    if !removed.is_empty() {
        kind = BumpKind::Major;
        changes.push(format!("Removed slots: {:?}", removed));
    }

    for (name, old_type) in &old_types {
        if let Some(new_type) = new_types.get(name) {
            if new_type != old_type {
                kind = BumpKind::Major;
                changes.push(format!(
                    "Slot '{}' type changed: {} -> {}",
                    name,
                    old_type.as_str(),
                    new_type.as_str()
                ));
            }
        }
    }

    let added: Vec<&str> = new_types
        .keys()
        .filter(|k| !old_types.contains_key(**k))
        .copied()
        .collect();
    if !added.is_empty() {
        if kind != BumpKind::Major {
            kind = BumpKind::Minor;
        }
        changes.push(format!("Added slots: {:?}", added));
    }

    if kind == BumpKind::None && old.text != new.text {
        kind = BumpKind::Patch;
        changes.push("Template wording changed".to_string());
    }

    BumpResult { kind, changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloom_core::types::{Slot, SlotType};

    fn slot(name: &str, slot_type: SlotType) -> Slot {
        Slot {
            name: name.to_string(),
            slot_type,
            position: 0,
            examples: vec![],
            enum_values: None,
            validation_pattern: None,
            description: None,
            required: true,
            default_value: None,
        }
    }

    fn template(text: &str, slots: Vec<Slot>) -> CanonicalTemplate {
        CanonicalTemplate {
            text: text.to_string(),
            slots,
        }
    }

    #[test]
    fn test_identical_is_none() {
        let t = template("write {{task}}", vec![slot("task", SlotType::Text)]);
        assert_eq!(compute_bump(&t, &t.clone()).kind, BumpKind::None);
    }

    #[test]
    fn test_added_slot_is_minor() {
        let old = template("write {{task}}", vec![slot("task", SlotType::Text)]);
        let new = template(
            "write {{language}} {{task}}",
            vec![slot("language", SlotType::Text), slot("task", SlotType::Text)],
        );
        assert_eq!(compute_bump(&old, &new).kind, BumpKind::Minor);
    }

    #[test]
    fn test_removed_slot_is_major() {
        let old = template(
            "write {{language}} {{task}}",
            vec![slot("language", SlotType::Text), slot("task", SlotType::Text)],
        );
        let new = template("write {{task}}", vec![slot("task", SlotType::Text)]);
        assert_eq!(compute_bump(&old, &new).kind, BumpKind::Major);
    }

    #[test]
    fn test_retyped_slot_is_major_even_with_additions() {
        let old = template("in {{count}} words", vec![slot("count", SlotType::Numeric)]);
        let new = template(
            "in {{count}} words about {{topic}}",
            vec![slot("count", SlotType::Text), slot("topic", SlotType::Text)],
        );
        assert_eq!(compute_bump(&old, &new).kind, BumpKind::Major);
    }

    #[test]
    fn test_wording_only_is_patch() {
        let old = template("write {{task}}", vec![slot("task", SlotType::Text)]);
        let new = template("please write {{task}}", vec![slot("task", SlotType::Text)]);
        assert_eq!(compute_bump(&old, &new).kind, BumpKind::Patch);
    }

    #[test]
    fn test_bump_arithmetic() {
        let v = TemplateVersion {
            major: 1,
            minor: 2,
            patch: 3,
        };
        assert_eq!(v.bump(BumpKind::Major).to_string(), "2.0.0");
        assert_eq!(v.bump(BumpKind::Minor).to_string(), "1.3.0");
        assert_eq!(v.bump(BumpKind::Patch).to_string(), "1.2.4");
        assert_eq!(v.bump(BumpKind::None), v);
    }
}
