//! Family naming
//!
//! A short human-readable name for each cluster, generated from a few
//! sample texts. The LLM path is best-effort; the mandatory fallback is
//! `Cluster-<label>`.

use tracing::warn;

use crate::llm::ChatClient;

const NAMING_PROMPT: &str = "Based on these sample prompts from one cluster, produce a short (2-4 \
word) category name describing what they have in common, in Title Case, \
with no quotes or punctuation. Examples: Code Generation, Email Writing, \
Data Analysis.\n\nSample prompts:\n{samples}\n\nCategory name:";

pub struct FamilyNamer {
    chat: Option<ChatClient>,
}

impl FamilyNamer {
    pub fn new(chat: Option<ChatClient>) -> Self {
        Self { chat }
    }

    /// Namer that always uses the fallback.
    pub fn fallback_only() -> Self {
        Self { chat: None }
    }

    pub fn from_config(config: &promptloom_core::Config) -> Self {
        let chat = config.llm_endpoint.as_ref().and_then(|endpoint| {
            ChatClient::new(
                endpoint.clone(),
                config.llm_api_key.clone(),
                config.llm_model.clone(),
            )
            .map_err(|e| warn!("Failed to build naming client: {}", e))
            .ok()
        });
        Self { chat }
    }

    /// Name a cluster from up to three samples. Never fails.
    pub async fn name_cluster(&self, samples: &[String], label: i32) -> String {
        let fallback = format!("Cluster-{}", label);
        let Some(ref chat) = self.chat else {
            return fallback;
        };
        if samples.is_empty() {
            return fallback;
        }

        let listed = samples
            .iter()
            .take(3)
            .map(|s| {
                let snippet: String = s.chars().take(100).collect();
                format!("- {}", snippet)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = NAMING_PROMPT.replace("{samples}", &listed);

        match chat.complete(&prompt, 20, 0.3).await {
            Ok(name) => {
                let name = name.trim().to_string();
                if name.is_empty() || name.len() >= 50 {
                    fallback
                } else {
                    name
                }
            }
            Err(e) => {
                warn!("Cluster naming failed for label {}: {}", label, e);
                fallback
            }
        }
    }
}
