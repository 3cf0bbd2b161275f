//! Variable slot detection, typing, and validation

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use promptloom_core::types::{Slot, SlotType};

use super::alignment::Alignment;

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+\.?\d*$").expect("numeric regex"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4})$").expect("date regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.\-]+@[\w.\-]+\.\w+$").expect("email regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(https?://|www\.)").expect("url regex"))
}

pub const NUMERIC_PATTERN: &str = r"^-?\d+\.?\d*$";
pub const EMAIL_PATTERN: &str = r"^[\w.\-]+@[\w.\-]+\.\w+$";
pub const URL_PATTERN: &str = r"^https?://";

/// Classify a variable region from its example values.
///
/// All-numeric, all-date, all-email, and all-URL sets get their specific
/// type; a small repeated value set (distinct <= 5, examples >= 3) becomes
/// an enum; everything else is free text.
pub fn detect_slot_type(examples: &[String]) -> SlotType {
    let cleaned: Vec<&str> = examples
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    if cleaned.is_empty() {
        return SlotType::Text;
    }

    if cleaned.iter().all(|e| numeric_re().is_match(e)) {
        return SlotType::Numeric;
    }
    if cleaned.iter().all(|e| date_re().is_match(e)) {
        return SlotType::Date;
    }
    if cleaned.iter().all(|e| email_re().is_match(e)) {
        return SlotType::Email;
    }
    if cleaned.iter().all(|e| url_re().is_match(e)) {
        return SlotType::Url;
    }

    let mut unique: Vec<&str> = cleaned.clone();
    unique.sort_unstable();
    unique.dedup();
    if unique.len() <= 5 && cleaned.len() >= 3 {
        return SlotType::Enum;
    }

    SlotType::Text
}

/// Generate a readable slot name from its type and examples.
pub fn generate_slot_name(index: usize, examples: &[String], slot_type: SlotType) -> String {
    match slot_type {
        SlotType::Numeric => {
            if examples.iter().any(|e| e.to_lowercase().contains("word")) {
                "word_count".to_string()
            } else if examples.iter().any(|e| e.contains('%')) {
                "percentage".to_string()
            } else {
                format!("number_{}", index)
            }
        }
        SlotType::Date => "date".to_string(),
        SlotType::Email => "email".to_string(),
        SlotType::Url => "url".to_string(),
        SlotType::Enum => match examples.first() {
            Some(first) => {
                let base: String = first
                    .to_lowercase()
                    .replace(' ', "_")
                    .chars()
                    .take(15)
                    .collect();
                format!("{}_option", base)
            }
            None => format!("option_{}", index),
        },
        SlotType::Text => format!("text_{}", index),
    }
}

/// Detect and classify slots from an alignment result.
///
/// Slot names are unique within the returned list; collisions get a
/// numeric suffix.
pub fn detect_slots(alignment: &Alignment) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut used_names: HashMap<String, usize> = HashMap::new();

    for (i, region) in alignment.regions.iter().enumerate() {
        let slot_type = detect_slot_type(&region.examples);
        let mut name = generate_slot_name(i, &region.examples, slot_type);

        let count = used_names.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            name = format!("{}_{}", name, *count);
        }

        let enum_values = if slot_type == SlotType::Enum {
            let mut values: Vec<String> = Vec::new();
            for ex in &region.examples {
                let trimmed = ex.trim().to_string();
                if !trimmed.is_empty() && !values.contains(&trimmed) {
                    values.push(trimmed);
                }
            }
            Some(values)
        } else {
            None
        };

        let validation_pattern = match slot_type {
            SlotType::Numeric => Some(NUMERIC_PATTERN.to_string()),
            SlotType::Email => Some(EMAIL_PATTERN.to_string()),
            SlotType::Url => Some(URL_PATTERN.to_string()),
            _ => None,
        };

        slots.push(Slot {
            name,
            slot_type,
            position: region.start,
            examples: region.examples.iter().take(10).cloned().collect(),
            enum_values,
            validation_pattern,
            description: None,
            required: true,
            default_value: None,
        });
    }

    slots
}

/// Result of validating render parameters against slot definitions.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate parameter values against slot types and constraints.
///
/// Missing required slots (without defaults) are errors; unknown parameter
/// names are warnings, not errors.
pub fn validate_slot_values(slots: &[Slot], params: &HashMap<String, String>) -> ValidationResult {
    let mut result = ValidationResult::default();
    let by_name: HashMap<&str, &Slot> = slots.iter().map(|s| (s.name.as_str(), s)).collect();

    for slot in slots {
        if slot.required && !params.contains_key(&slot.name) {
            if slot.default_value.is_some() {
                result
                    .warnings
                    .push(format!("Using default value for '{}'", slot.name));
            } else {
                result
                    .errors
                    .push(format!("Missing required slot: '{}'", slot.name));
            }
        }
    }

    for (name, value) in params {
        let Some(slot) = by_name.get(name.as_str()) else {
            result.warnings.push(format!("Unknown slot: '{}'", name));
            continue;
        };

        match slot.slot_type {
            SlotType::Numeric => {
                if !numeric_re().is_match(value) {
                    result
                        .errors
                        .push(format!("Slot '{}' must be numeric, got: '{}'", name, value));
                }
            }
            SlotType::Enum => {
                if let Some(ref values) = slot.enum_values {
                    if !values.contains(value) {
                        result.errors.push(format!(
                            "Slot '{}' must be one of {:?}, got: '{}'",
                            name, values, value
                        ));
                    }
                }
            }
            SlotType::Email => {
                if !email_re().is_match(value) {
                    result
                        .errors
                        .push(format!("Slot '{}' must be a valid email, got: '{}'", name, value));
                }
            }
            SlotType::Url => {
                if !url_re().is_match(value) {
                    result
                        .errors
                        .push(format!("Slot '{}' must be a valid URL, got: '{}'", name, value));
                }
            }
            SlotType::Date | SlotType::Text => {}
        }

        if let Some(ref pattern) = slot.validation_pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(value) {
                        result
                            .errors
                            .push(format!("Slot '{}' failed pattern validation: '{}'", name, value));
                    }
                }
                Err(_) => result
                    .warnings
                    .push(format!("Slot '{}' has an invalid validation pattern", name)),
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::alignment::VariableRegion;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_numeric() {
        assert_eq!(
            detect_slot_type(&strings(&["100", "250", "-3.5"])),
            SlotType::Numeric
        );
    }

    #[test]
    fn test_detect_date() {
        assert_eq!(
            detect_slot_type(&strings(&["2026-01-15", "3/14/2026"])),
            SlotType::Date
        );
    }

    #[test]
    fn test_detect_email_and_url() {
        assert_eq!(
            detect_slot_type(&strings(&["a@example.com", "b.c@test.org"])),
            SlotType::Email
        );
        assert_eq!(
            detect_slot_type(&strings(&["https://example.com", "http://test.org/x"])),
            SlotType::Url
        );
    }

    #[test]
    fn test_detect_enum_needs_repetition() {
        // 3+ examples with <= 5 distinct values
        assert_eq!(
            detect_slot_type(&strings(&["red", "green", "red"])),
            SlotType::Enum
        );
        // Only 2 examples stays text
        assert_eq!(detect_slot_type(&strings(&["red", "green"])), SlotType::Text);
    }

    #[test]
    fn test_slot_naming() {
        assert_eq!(
            generate_slot_name(0, &strings(&["500 words"]), SlotType::Numeric),
            "word_count"
        );
        assert_eq!(
            generate_slot_name(0, &strings(&["50%"]), SlotType::Numeric),
            "percentage"
        );
        assert_eq!(
            generate_slot_name(2, &strings(&["12"]), SlotType::Numeric),
            "number_2"
        );
        assert_eq!(
            generate_slot_name(0, &strings(&["formal tone"]), SlotType::Enum),
            "formal_tone_option"
        );
        assert_eq!(generate_slot_name(1, &strings(&["x"]), SlotType::Text), "text_1");
    }

    #[test]
    fn test_detect_slots_unique_names() {
        let alignment = Alignment {
            skeleton: "{{slot_0}} and {{slot_1}}".to_string(),
            regions: vec![
                VariableRegion {
                    start: 0,
                    end: 1,
                    examples: strings(&["2026-01-01", "1/2/2026"]),
                },
                VariableRegion {
                    start: 4,
                    end: 5,
                    examples: strings(&["2026-03-01", "4/5/2026"]),
                },
            ],
        };
        let slots = detect_slots(&alignment);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].name, "date");
        assert_eq!(slots[1].name, "date_2");
    }

    #[test]
    fn test_validate_missing_and_unknown() {
        let alignment = Alignment {
            skeleton: "{{slot_0}}".to_string(),
            regions: vec![VariableRegion {
                start: 0,
                end: 1,
                examples: strings(&["100", "200"]),
            }],
        };
        let slots = detect_slots(&alignment);

        let mut params = HashMap::new();
        params.insert("bogus".to_string(), "x".to_string());
        let result = validate_slot_values(&slots, &params);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);

        let mut params = HashMap::new();
        params.insert("number_0".to_string(), "42".to_string());
        let result = validate_slot_values(&slots, &params);
        assert!(result.is_valid());

        let mut params = HashMap::new();
        params.insert("number_0".to_string(), "forty-two".to_string());
        let result = validate_slot_values(&slots, &params);
        assert!(!result.is_valid());
    }
}
