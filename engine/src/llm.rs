//! Template extraction providers
//!
//! One capability set (extract_template, generate_explanation) with two
//! variants: an LLM-backed provider speaking the chat-completions protocol
//! and a heuristic provider running the alignment pipeline locally. The
//! engine holds a primary and a fallback; a primary failure degrades to the
//! fallback at the call boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use promptloom_core::error::{Error, Result};
use promptloom_core::types::{Slot, SlotType};

use crate::template::alignment::align_prompts;
use crate::template::builder::{build_template, extract_slot_names, CanonicalTemplate};
use crate::template::slots::detect_slots;

/// Retry schedule for transient provider failures (seconds).
const BACKOFF_SECS: [u64; 3] = [1, 2, 4];

const EXTRACTION_PROMPT: &str = "You are an expert prompt engineer. Generalize the following similar \
prompts into a single canonical template. Replace the parts that vary with \
{{variable_name}} placeholders using descriptive snake_case names. The \
template must cover every example. Respond with strictly valid JSON of the \
form {\"template\": \"...\", \"variables\": [\"...\"]} and nothing else.\n\n\
Prompts:\n{prompts}";

const EXPLANATION_PROMPT: &str = "The following prompts were grouped into one family. In two or three \
sentences, explain what they have in common: shared intent, structure, and \
use case. Return only the explanation text.\n\nPrompts:\n{prompts}";

/// Capability set shared by all template providers.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn extract_template(&self, samples: &[String]) -> Result<CanonicalTemplate>;
    async fn generate_explanation(&self, samples: &[String]) -> Result<String>;
}

/// Heuristic provider: the alignment pipeline, no network.
pub struct HeuristicProvider;

#[async_trait]
impl TemplateProvider for HeuristicProvider {
    async fn extract_template(&self, samples: &[String]) -> Result<CanonicalTemplate> {
        let alignment = align_prompts(samples);
        let slots = detect_slots(&alignment);
        Ok(build_template(&alignment, slots))
    }

    async fn generate_explanation(&self, samples: &[String]) -> Result<String> {
        if samples.is_empty() {
            return Ok("No prompts provided".to_string());
        }
        let alignment = align_prompts(samples);
        Ok(format!(
            "This family contains {} prompts with a shared structure and {} variable region(s).",
            samples.len(),
            alignment.regions.len()
        ))
    }
}

/// Minimal chat-completions client shared by the LLM provider and the
/// family namer.
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(endpoint: String, api_key: Option<String>, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }

    /// One completion with exponential backoff across transient failures.
    pub async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        let mut last_error = None;
        for (attempt, backoff) in BACKOFF_SECS.iter().enumerate() {
            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::Llm(format!("Malformed response: {}", e)))?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default();
                    if content.trim().is_empty() {
                        return Err(Error::Llm("Empty response".to_string()));
                    }
                    return Ok(content.trim().to_string());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(Error::Llm(format!("HTTP {}: {}", status, text)));
                }
                Err(e) => {
                    last_error = Some(Error::Llm(format!("Request failed: {}", e)));
                }
            }

            if attempt + 1 < BACKOFF_SECS.len() {
                warn!(
                    "LLM call failed (attempt {}/{}), retrying in {}s",
                    attempt + 1,
                    BACKOFF_SECS.len(),
                    backoff
                );
                tokio::time::sleep(Duration::from_secs(*backoff)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Llm("exhausted retries".to_string())))
    }
}

/// LLM-backed template provider.
pub struct LlmProvider {
    chat: ChatClient,
}

impl LlmProvider {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

fn numbered(samples: &[String]) -> String {
    samples
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the first JSON object out of an LLM reply, tolerating code fences.
fn extract_json(content: &str) -> &str {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[derive(Deserialize)]
struct ExtractionReply {
    template: String,
    #[serde(default)]
    variables: Vec<String>,
}

#[async_trait]
impl TemplateProvider for LlmProvider {
    async fn extract_template(&self, samples: &[String]) -> Result<CanonicalTemplate> {
        if samples.is_empty() {
            return Ok(CanonicalTemplate {
                text: String::new(),
                slots: Vec::new(),
            });
        }

        let prompt = EXTRACTION_PROMPT.replace("{prompts}", &numbered(samples));
        let content = self.chat.complete(&prompt, 2000, 0.0).await?;

        let reply: ExtractionReply = serde_json::from_str(extract_json(&content))
            .map_err(|e| Error::Llm(format!("Unparseable extraction reply: {}", e)))?;

        // Slot order follows appearance in the template text; names the
        // model listed but never placed are appended after.
        let mut names = Vec::new();
        for name in extract_slot_names(&reply.template) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in reply.variables {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let slots = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Slot {
                name,
                slot_type: SlotType::Text,
                position: i,
                examples: Vec::new(),
                enum_values: None,
                validation_pattern: None,
                description: None,
                required: true,
                default_value: None,
            })
            .collect();

        debug!("LLM extracted template: {}", reply.template);
        Ok(CanonicalTemplate {
            text: reply.template,
            slots,
        })
    }

    async fn generate_explanation(&self, samples: &[String]) -> Result<String> {
        if samples.is_empty() {
            return Ok("No prompts provided".to_string());
        }
        let prompt = EXPLANATION_PROMPT.replace("{prompts}", &numbered(samples));
        self.chat.complete(&prompt, 300, 0.3).await
    }
}

/// Primary provider with degradation to a fallback at the call boundary.
pub struct ProviderWithFallback {
    primary: Option<Box<dyn TemplateProvider>>,
    fallback: Box<dyn TemplateProvider>,
}

impl ProviderWithFallback {
    pub fn new(primary: Option<Box<dyn TemplateProvider>>, fallback: Box<dyn TemplateProvider>) -> Self {
        Self { primary, fallback }
    }

    /// Heuristic-only provider set.
    pub fn heuristic() -> Self {
        Self::new(None, Box::new(HeuristicProvider))
    }

    /// Build from configuration: LLM primary when an endpoint is set,
    /// heuristic fallback always.
    pub fn from_config(config: &promptloom_core::Config) -> Self {
        let primary = match config.llm_endpoint {
            Some(ref endpoint) => {
                match ChatClient::new(
                    endpoint.clone(),
                    config.llm_api_key.clone(),
                    config.llm_model.clone(),
                ) {
                    Ok(chat) => Some(Box::new(LlmProvider::new(chat)) as Box<dyn TemplateProvider>),
                    Err(e) => {
                        warn!("Failed to build LLM provider, using heuristic only: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        Self::new(primary, Box::new(HeuristicProvider))
    }

    pub async fn extract_template(&self, samples: &[String]) -> Result<CanonicalTemplate> {
        if let Some(ref primary) = self.primary {
            match primary.extract_template(samples).await {
                Ok(template) => return Ok(template),
                Err(e) => warn!("Primary template extraction failed, using fallback: {}", e),
            }
        }
        self.fallback.extract_template(samples).await
    }

    pub async fn generate_explanation(&self, samples: &[String]) -> Result<String> {
        if let Some(ref primary) = self.primary {
            match primary.generate_explanation(samples).await {
                Ok(text) => return Ok(text),
                Err(e) => warn!("Primary explanation failed, using fallback: {}", e),
            }
        }
        self.fallback.generate_explanation(samples).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heuristic_extracts_single_slot() {
        let samples = vec![
            "write a python script to X".to_string(),
            "write a python script to Y".to_string(),
            "write a python script to Z".to_string(),
        ];
        let template = HeuristicProvider.extract_template(&samples).await.unwrap();
        assert_eq!(template.slots.len(), 1);
        assert!(template.text.starts_with("write a python script to {{"));
    }

    #[tokio::test]
    async fn test_fallback_engages_on_primary_failure() {
        struct FailingProvider;

        #[async_trait]
        impl TemplateProvider for FailingProvider {
            async fn extract_template(&self, _: &[String]) -> Result<CanonicalTemplate> {
                Err(Error::Llm("down".to_string()))
            }
            async fn generate_explanation(&self, _: &[String]) -> Result<String> {
                Err(Error::Llm("down".to_string()))
            }
        }

        let provider =
            ProviderWithFallback::new(Some(Box::new(FailingProvider)), Box::new(HeuristicProvider));
        let samples = vec![
            "summarize this in 3 points".to_string(),
            "summarize this in 5 points".to_string(),
        ];
        let template = provider.extract_template(&samples).await.unwrap();
        assert!(!template.text.is_empty());
        let explanation = provider.generate_explanation(&samples).await.unwrap();
        assert!(explanation.contains("2 prompts"));
    }

    #[test]
    fn test_extract_json_tolerates_fences() {
        let content = "```json\n{\"template\": \"do {{x}}\", \"variables\": [\"x\"]}\n```";
        let json = extract_json(content);
        let reply: ExtractionReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.template, "do {{x}}");
        assert_eq!(reply.variables, vec!["x"]);
    }
}
