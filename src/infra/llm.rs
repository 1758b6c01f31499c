//! Reasoning service client
//!
//! Thin JSON client over an LLM provider. Agents always ask for a single
//! JSON object and tolerate failures: a reasoning error drops the item (or
//! triggers the sentinel's defensive fallback), it never stops a loop.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::SwarmConfig;
use crate::error::{Error, Result};

/// Reasoning service client
pub struct LlmClient {
    http: reqwest::Client,
    provider: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider: config.llm_provider.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_tokens: config.llm_max_tokens,
        }
    }

    /// Ask the model for a JSON object and deserialize it.
    pub async fn reason_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let text = match self.provider.as_str() {
            "anthropic" => self.complete_anthropic(system, user).await?,
            _ => self.complete_openai(system, user).await?,
        };

        let value = extract_json_object(&text).ok_or_else(|| {
            Error::Reasoning(format!("no JSON object in reasoning response: {}", text))
        })?;
        serde_json::from_value(value).map_err(|e| {
            warn!("Reasoning response failed to deserialize: {}", e);
            Error::Reasoning(format!("malformed reasoning payload: {}", e))
        })
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response: Value = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Reasoning("empty completion".to_string()))
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let response: Value = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Reasoning("empty completion".to_string()))
    }
}

/// Pull the first balanced JSON object out of a completion, tolerating
/// surrounding prose or markdown fences.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        let value = extract_json_object(r#"{"convictionScore": 70}"#).unwrap();
        assert_eq!(value["convictionScore"], 70);
    }

    #[test]
    fn extracts_object_from_prose_and_fences() {
        let text = "Here is my analysis:\n```json\n{\"action\": \"enter\", \"baseAmount\": 0.1}\n```\nGood luck.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "enter");
    }

    #[test]
    fn handles_nested_objects_and_braces_in_strings() {
        let text = r#"{"reasoning": "risk {high}", "inner": {"a": 1}}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["inner"]["a"], 1);
    }

    #[test]
    fn returns_none_without_object() {
        assert!(extract_json_object("no json here").is_none());
    }
}
