//! File-based ingestion (TXT, CSV, JSON, JSON Lines)

use std::path::Path;

use serde_json::{json, Value};

use promptloom_core::error::{Error, Result};

/// One raw record read from an import file.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub text: String,
    pub metadata: Value,
}

/// Read prompts from a file, dispatching on the extension. Unknown
/// extensions are treated as plain text, one prompt per line.
pub fn read_file(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "File not found: {}",
            path.display()
        )));
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => read_json(path),
        Some("jsonl") => read_jsonl(path),
        Some("csv") => read_csv(path),
        _ => read_text(path),
    }
}

/// Pull the prompt text out of a JSON object, trying the common keys.
pub fn extract_text(value: &Value) -> Option<String> {
    for key in ["text", "prompt", "content"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }
    // OpenAI-style request bodies: last user message
    if let Some(messages) = value
        .pointer("/request/messages")
        .or_else(|| value.get("messages"))
        .and_then(|m| m.as_array())
    {
        for message in messages.iter().rev() {
            if message.get("role").and_then(|r| r.as_str()) == Some("user") {
                if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                    if !content.trim().is_empty() {
                        return Some(content.to_string());
                    }
                }
            }
        }
    }
    None
}

fn record_from_value(value: &Value, source: &str) -> Option<RawRecord> {
    let text = extract_text(value)?;
    let mut metadata = json!({ "source": source });
    for key in ["timestamp", "created_at", "model", "user_id", "cost"] {
        if let Some(v) = value.get(key) {
            metadata[key] = v.clone();
        }
    }
    Some(RawRecord { text, metadata })
}

fn read_json(path: &Path) -> Result<Vec<RawRecord>> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;

    let items: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&value],
        _ => vec![],
    };

    Ok(items
        .into_iter()
        .filter_map(|v| record_from_value(v, "file"))
        .collect())
}

fn read_jsonl(path: &Path) -> Result<Vec<RawRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|v| record_from_value(&v, "file"))
        .collect())
}

fn read_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("Malformed CSV: {}", e)))?;
    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("Malformed CSV header: {}", e)))?
        .clone();

    let text_column = headers
        .iter()
        .position(|h| matches!(h.to_lowercase().as_str(), "text" | "prompt" | "content"))
        .unwrap_or(0);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| Error::InvalidInput(format!("Malformed CSV row: {}", e)))?;
        let Some(text) = row.get(text_column) else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }

        let mut metadata = json!({ "source": "file" });
        for (header, field) in headers.iter().zip(row.iter()) {
            if header
                .to_lowercase()
                .as_str()
                != headers.get(text_column).unwrap_or("").to_lowercase().as_str()
            {
                metadata[header] = json!(field);
            }
        }
        records.push(RawRecord {
            text: text.to_string(),
            metadata,
        });
    }
    Ok(records)
}

fn read_text(path: &Path) -> Result<Vec<RawRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| RawRecord {
            text: line.to_string(),
            metadata: json!({ "source": "file" }),
        })
        .collect())
}
