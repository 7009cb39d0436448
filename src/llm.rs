//! OpenAI-compatible LLM client for a locally hosted model server.
//!
//! Local servers disagree on whether the API root carries a `/v1` prefix and
//! on whether chat or classic completion endpoints are mounted, so every call
//! walks a prioritized endpoint matrix and returns the first response that
//! parses and is not the server's "Unexpected endpoint" sentinel.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Chat,
    Completion,
    Embeddings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmHealth {
    pub chat: bool,
    pub embed: bool,
    pub chat_error: Option<String>,
    pub embed_error: Option<String>,
}

#[derive(Clone)]
pub struct LmClient {
    http: reqwest::Client,
    base: String,
    chat_model: String,
    embed_model: String,
    api_key: Option<String>,
}

impl LmClient {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.llm_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base: settings.llm_base_url.trim_end_matches('/').to_string(),
            chat_model: settings.llm_chat_model.clone(),
            embed_model: settings.llm_embed_model.clone(),
            api_key: settings.llm_api_key.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_base(base: &str, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            chat_model: "test-chat".into(),
            embed_model: "test-embed".into(),
            api_key: None,
        }
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    // ── Endpoint matrix ─────────────────────────────────────────────────

    /// Candidate URLs for a call, versioned roots first, normalized and
    /// deduped preserving order.
    fn endpoint_matrix(&self, kind: EndpointKind) -> Vec<String> {
        let base_v1 = if self.base.ends_with("/v1") {
            self.base.clone()
        } else {
            format!("{}/v1", self.base)
        };
        let base_no_v1 = base_v1[..base_v1.len() - 3].trim_end_matches('/').to_string();

        let ordered: Vec<String> = match kind {
            EndpointKind::Chat => vec![
                format!("{base_v1}/chat/completions"),
                format!("{base_v1}/completions"),
                format!("{base_no_v1}/v1/chat/completions"),
                format!("{base_no_v1}/v1/completions"),
                format!("{base_no_v1}/chat/completions"),
                format!("{base_no_v1}/completions"),
            ],
            EndpointKind::Completion => vec![
                format!("{base_v1}/completions"),
                format!("{base_no_v1}/v1/completions"),
                format!("{base_no_v1}/completions"),
            ],
            EndpointKind::Embeddings => vec![
                format!("{base_v1}/embeddings"),
                format!("{base_no_v1}/v1/embeddings"),
                format!("{base_no_v1}/embeddings"),
            ],
        };

        let mut seen = std::collections::HashSet::new();
        ordered
            .into_iter()
            .map(|u| normalize_slashes(&u))
            .filter(|u| seen.insert(u.clone()))
            .collect()
    }

    /// POST the payload to each candidate endpoint until one returns a
    /// usable body. A non-JSON body is returned as `{"raw": ...}` so chat
    /// parsing can still salvage plain-text replies.
    async fn post_with_fallback(&self, kind: EndpointKind, payload: &Value) -> Result<Value> {
        let mut last_error = String::from("no endpoints");
        for url in self.endpoint_matrix(kind) {
            let mut req = self.http.post(&url).json(payload);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            let resp = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("{url}: {e}");
                    continue;
                }
            };
            let text = match resp.text().await {
                Ok(t) => t,
                Err(e) => {
                    last_error = format!("{url}: {e}");
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(data) => {
                    if data.to_string().to_lowercase().contains("unexpected endpoint") {
                        last_error = format!("{url}: unexpected-endpoint");
                        continue;
                    }
                    return Ok(data);
                }
                Err(_) => {
                    if text.to_lowercase().contains("unexpected endpoint") {
                        last_error = format!("{url}: unexpected-endpoint");
                        continue;
                    }
                    if !text.trim().is_empty() {
                        return Ok(json!({ "raw": text.trim() }));
                    }
                    last_error = format!("{url}: empty non-JSON body");
                }
            }
        }
        bail!("all LLM endpoints failed: {last_error}")
    }

    // ── Chat ────────────────────────────────────────────────────────────

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        json_object: bool,
    ) -> Result<Value> {
        let mut payload = json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if json_object {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        self.post_with_fallback(EndpointKind::Chat, &payload).await
    }

    /// Chat call returning plain text. Parses `choices[0].message.content`,
    /// then `reasoning_content`, then `choices[0].text`, then the raw body.
    /// Template artifacts (`<|...`) are treated as broken output and retried
    /// once with a classic completion payload.
    pub async fn chat_text(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        json_object: bool,
    ) -> Result<String> {
        let data = self.chat(messages, temperature, max_tokens, json_object).await?;
        let content = extract_chat_content(&data);

        if let Some(content) = content {
            if !is_template_artifact(&content) {
                return Ok(content);
            }
        }

        // Completion-style retry: flatten the conversation into a prompt.
        let mut prompt = String::new();
        for m in messages {
            prompt.push_str(&format!("{}: {}\n", m.role.to_uppercase(), m.content));
        }
        prompt.push_str("ASSISTANT:");

        let payload = json!({
            "model": self.chat_model,
            "prompt": prompt,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let data = self.post_with_fallback(EndpointKind::Completion, &payload).await?;
        extract_chat_content(&data)
            .filter(|c| !is_template_artifact(c))
            .context("LLM returned no usable content")
    }

    // ── Embeddings ──────────────────────────────────────────────────────

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let payload = json!({ "model": self.embed_model, "input": texts });
        let data = self.post_with_fallback(EndpointKind::Embeddings, &payload).await?;
        let rows = data["data"]
            .as_array()
            .context("embeddings response missing data array")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let emb = row["embedding"]
                .as_array()
                .context("embedding entry missing vector")?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            out.push(emb);
        }
        Ok(out)
    }

    // ── Health ──────────────────────────────────────────────────────────

    pub async fn health_check(&self) -> LlmHealth {
        let mut health = LlmHealth { chat: false, embed: false, chat_error: None, embed_error: None };
        match self.chat(&[ChatMessage::user("ping")], 0.0, 1, false).await {
            Ok(data) => health.chat = data.get("choices").is_some(),
            Err(e) => health.chat_error = Some(e.to_string()),
        }
        match self.embed(&["ping".to_string()]).await {
            Ok(v) => health.embed = v.first().is_some_and(|e| !e.is_empty()),
            Err(e) => health.embed_error = Some(e.to_string()),
        }
        health
    }
}

fn normalize_slashes(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (Some(s), r),
        None => (None, url),
    };
    let mut cleaned = String::with_capacity(rest.len());
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        cleaned.push(c);
    }
    match scheme {
        Some(s) => format!("{s}://{cleaned}"),
        None => cleaned,
    }
}

fn is_template_artifact(content: &str) -> bool {
    let t = content.trim();
    t.is_empty() || t.starts_with("<|")
}

fn extract_chat_content(data: &Value) -> Option<String> {
    let message = &data["choices"][0]["message"];
    if let Some(content) = message["content"].as_str() {
        if !content.trim().is_empty() {
            return Some(content.trim().to_string());
        }
        // Some models emit their answer under reasoning_content instead.
        if let Some(reasoning) = message["reasoning_content"].as_str() {
            if !reasoning.trim().is_empty() {
                return Some(reasoning.trim().to_string());
            }
        }
    }
    if let Some(reasoning) = message["reasoning_content"].as_str() {
        if !reasoning.trim().is_empty() {
            return Some(reasoning.trim().to_string());
        }
    }
    if let Some(text) = data["choices"][0]["text"].as_str() {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }
    data["raw"].as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(base: &str) -> LmClient {
        LmClient::with_base(base, Duration::from_secs(1))
    }

    #[test]
    fn matrix_covers_versioned_and_unversioned_roots() {
        let c = client("http://localhost:1234");
        let urls = c.endpoint_matrix(EndpointKind::Chat);
        assert_eq!(urls[0], "http://localhost:1234/v1/chat/completions");
        assert!(urls.contains(&"http://localhost:1234/chat/completions".to_string()));
        assert!(urls.contains(&"http://localhost:1234/completions".to_string()));
        // dedupe preserves order, no repeats
        let mut sorted = urls.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), urls.len());
    }

    #[test]
    fn matrix_with_v1_base_dedupes() {
        let c = client("http://localhost:1234/v1");
        let urls = c.endpoint_matrix(EndpointKind::Embeddings);
        assert_eq!(urls[0], "http://localhost:1234/v1/embeddings");
        assert_eq!(urls.last().unwrap(), "http://localhost:1234/embeddings");
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn slash_normalization_keeps_scheme() {
        assert_eq!(
            normalize_slashes("http://host//v1///chat/completions"),
            "http://host/v1/chat/completions"
        );
    }

    #[test]
    fn chat_parse_prefers_message_content() {
        let data = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_chat_content(&data).as_deref(), Some("hello"));

        let data = json!({"choices": [{"message": {"content": "", "reasoning_content": "thought"}}]});
        assert_eq!(extract_chat_content(&data).as_deref(), Some("thought"));

        let data = json!({"choices": [{"text": "classic"}]});
        assert_eq!(extract_chat_content(&data).as_deref(), Some("classic"));

        let data = json!({"raw": "plain body"});
        assert_eq!(extract_chat_content(&data).as_deref(), Some("plain body"));
    }

    #[test]
    fn template_artifacts_are_rejected() {
        assert!(is_template_artifact("<|assistant|>"));
        assert!(is_template_artifact("  <|channel|>"));
        assert!(is_template_artifact(""));
        assert!(!is_template_artifact("real answer"));
    }
}
