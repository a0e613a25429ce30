//! LLM-backed flag-to-field mapper
//!
//! Builds a constrained prompt from one grouped mapping request and
//! parses the JSON object the model returns. The prompt pins the model to
//! the allowed field list; anything else it returns is discarded by the
//! caller's validation.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::matcher::cache::FlagMapping;
use crate::matcher::fallback::{FieldMapper, MappingRequest};

use super::client::LlmClient;
use super::types::Message;

/// Field mapper backed by an OpenRouter chat model
#[derive(Debug, Clone)]
pub struct LlmFieldMapper {
    client: LlmClient,
}

impl LlmFieldMapper {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FieldMapper for LlmFieldMapper {
    async fn map_flags(&self, request: &MappingRequest) -> Result<FlagMapping> {
        if request.flags.is_empty() {
            return Ok(FlagMapping::new());
        }

        let prompt = build_prompt(request);
        let model = if request.model.is_empty() {
            None
        } else {
            Some(request.model.as_str())
        };

        let response = self.client.complete(vec![Message::user(prompt)], model).await?;
        debug!(
            resource = %request.resource,
            relation = %request.relation,
            tokens = response.tokens_used,
            "Flag mapping response received"
        );
        parse_mapping(&response.content)
    }
}

fn build_prompt(request: &MappingRequest) -> String {
    let mut lines = vec![
        "You map CLI flags to resource fields.".to_string(),
        format!("Resource: {}", request.resource),
        format!("Relation: {}", request.relation),
        String::new(),
        "Allowed fields (name + kind):".to_string(),
    ];
    for (name, kind) in &request.fields {
        lines.push(format!("- {} ({})", name, kind));
    }
    lines.push(String::new());
    lines.push("Flags to map:".to_string());
    for (name, description) in &request.flags {
        lines.push(format!("- {}: {}", name, description).trim_end().to_string());
    }
    lines.push(String::new());
    lines.push("Return JSON ONLY (no prose).".to_string());
    lines.push("Schema: {\"--flag-name\": \"field-name\" | null, ...}".to_string());
    lines.push("Rules:".to_string());
    lines.push("- Only use field names from the allowed list.".to_string());
    lines.push("- If no good match exists, use null.".to_string());
    lines.join("\n")
}

fn parse_mapping(content: &str) -> Result<FlagMapping> {
    let payload = extract_json_object(content)
        .ok_or_else(|| Error::LlmError("Response contained no JSON object".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| Error::LlmError(format!("Malformed JSON in response: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::LlmError("Response JSON is not an object".to_string()))?;

    let mut mapping = FlagMapping::new();
    for (flag, field) in object {
        mapping.insert(flag.clone(), field.as_str().map(str::to_string));
    }
    Ok(mapping)
}

/// Extract the outermost JSON object from a possibly chatty payload
pub fn extract_json_object(payload: &str) -> Option<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload.starts_with('{') && payload.ends_with('}') {
        return Some(payload.to_string());
    }
    let start = payload.find('{')?;
    let end = payload.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(payload[start..=end].to_string())
}
