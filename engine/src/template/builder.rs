//! Canonical template assembly

use std::sync::OnceLock;

use regex::Regex;

use promptloom_core::types::Slot;

use super::alignment::Alignment;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex"))
}

/// A canonical parametric template: text with `{{name}}` placeholders plus
/// the ordered slot definitions behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTemplate {
    pub text: String,
    pub slots: Vec<Slot>,
}

impl CanonicalTemplate {
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }
}

/// Replace the alignment's `{{slot_k}}` placeholders with slot names and
/// attach the slot definitions.
pub fn build_template(alignment: &Alignment, slots: Vec<Slot>) -> CanonicalTemplate {
    let mut text = alignment.skeleton.clone();
    for (i, slot) in slots.iter().enumerate() {
        let generic = format!("{{{{slot_{}}}}}", i);
        let named = format!("{{{{{}}}}}", slot.name);
        text = text.replace(&generic, &named);
    }

    CanonicalTemplate { text, slots }
}

/// Slot names referenced by a template text, in order of appearance.
pub fn extract_slot_names(template_text: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template_text)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::alignment::align_prompts;
    use crate::template::slots::detect_slots;

    #[test]
    fn test_build_names_placeholders() {
        let prompts = vec![
            "write a python script to X".to_string(),
            "write a python script to Y".to_string(),
        ];
        let alignment = align_prompts(&prompts);
        let slots = detect_slots(&alignment);
        let template = build_template(&alignment, slots);

        assert_eq!(template.slots.len(), 1);
        let name = template.slots[0].name.clone();
        assert_eq!(
            template.text,
            format!("write a python script to {{{{{}}}}}", name)
        );
        assert_eq!(extract_slot_names(&template.text), vec![name]);
    }

    #[test]
    fn test_extract_slot_names_order() {
        let names = extract_slot_names("a {{x}} b {{y}} c {{x}}");
        assert_eq!(names, vec!["x", "y", "x"]);
    }
}
