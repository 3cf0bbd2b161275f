//! Refinement validation
//!
//! An LLM may re-word a template. The refined text must keep the same slot
//! names, relative order, and count; anything else is rejected before it
//! reaches the store. Accepted refinements insert as a PATCH-level version
//! flagged `is_refined`.

use super::builder::{extract_slot_names, CanonicalTemplate};

/// Check that a refinement preserves template structure.
pub fn validate_refinement(original: &CanonicalTemplate, refined_text: &str) -> Vec<String> {
    let mut errors = Vec::new();

    let original_order = extract_slot_names(&original.text);
    let refined_order = extract_slot_names(refined_text);

    let original_set: std::collections::BTreeSet<&String> = original_order.iter().collect();
    let refined_set: std::collections::BTreeSet<&String> = refined_order.iter().collect();

    let missing: Vec<&&String> = original_set.difference(&refined_set).collect();
    if !missing.is_empty() {
        errors.push(format!("Slots removed during refinement: {:?}", missing));
    }

    let added: Vec<&&String> = refined_set.difference(&original_set).collect();
    if !added.is_empty() {
        errors.push(format!("New slots added during refinement: {:?}", added));
    }

    if errors.is_empty() && original_order != refined_order {
        errors.push("Slot order changed during refinement".to_string());
    }

    errors
}

/// Apply a validated refinement, producing the new canonical template.
pub fn apply_refinement(
    original: &CanonicalTemplate,
    refined_text: &str,
) -> Result<CanonicalTemplate, Vec<String>> {
    let errors = validate_refinement(original, refined_text);
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(CanonicalTemplate {
        text: refined_text.to_string(),
        slots: original.slots.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloom_core::types::{Slot, SlotType};

    fn template() -> CanonicalTemplate {
        CanonicalTemplate {
            text: "write a {{language}} script to {{task}}".to_string(),
            slots: vec![
                Slot {
                    name: "language".to_string(),
                    slot_type: SlotType::Text,
                    position: 2,
                    examples: vec![],
                    enum_values: None,
                    validation_pattern: None,
                    description: None,
                    required: true,
                    default_value: None,
                },
                Slot {
                    name: "task".to_string(),
                    slot_type: SlotType::Text,
                    position: 6,
                    examples: vec![],
                    enum_values: None,
                    validation_pattern: None,
                    description: None,
                    required: true,
                    default_value: None,
                },
            ],
        }
    }

    #[test]
    fn test_accepts_wording_change() {
        let refined = "Please write a {{language}} script that will {{task}}.";
        assert!(validate_refinement(&template(), refined).is_empty());
        let applied = apply_refinement(&template(), refined).unwrap();
        assert_eq!(applied.text, refined);
        assert_eq!(applied.slots.len(), 2);
    }

    #[test]
    fn test_rejects_dropped_slot() {
        let refined = "Please write a {{language}} script.";
        let errors = validate_refinement(&template(), refined);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("removed"));
    }

    #[test]
    fn test_rejects_new_slot() {
        let refined = "Write a {{language}} script to {{task}} for {{audience}}.";
        let errors = validate_refinement(&template(), refined);
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_rejects_reordered_slots() {
        let refined = "To {{task}}, write a {{language}} script.";
        let errors = validate_refinement(&template(), refined);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("order"));
    }
}
