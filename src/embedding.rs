//! Embedding client for the local OpenAI-compatible `/v1/embeddings`
//! endpoint. Retrieval is asymmetric: query text gets an instruction prefix,
//! document text (context summaries) is embedded bare. Mixing the two sides
//! degrades ranking quietly, so both templates live here and nowhere else.

use std::time::Duration;

use crate::types::CoreError;

const QUERY_INSTRUCTION: &str =
    "Given a user request, retrieve the topic context it belongs to";

pub(crate) trait Embedder: Send + Sync {
    /// Embed an incoming user request (query side).
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, CoreError>;
    /// Embed a context summary or name (document side).
    fn embed_document(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

pub(crate) struct HttpEmbedder {
    agent: ureq::Agent,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub(crate) fn new(base_url: &str, model: &str, timeout_ms: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .build();
        HttpEmbedder {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn embed_raw(&self, input: &str) -> Result<Vec<f32>, CoreError> {
        let url = format!("{}/embeddings", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({
                "model": self.model,
                "input": input,
            }))
            .map_err(|e| CoreError::BackendUnavailable(format!("embeddings: {e}")))?;
        let body: serde_json::Value = resp
            .into_json()
            .map_err(|e| CoreError::BackendUnavailable(format!("embeddings body: {e}")))?;
        let values = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| CoreError::SchemaViolation {
                backend: "embeddings".into(),
                reason: "missing data[0].embedding".into(),
            })?;
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            let f = v.as_f64().ok_or_else(|| CoreError::SchemaViolation {
                backend: "embeddings".into(),
                reason: "non-numeric embedding component".into(),
            })?;
            out.push(f as f32);
        }
        if out.is_empty() {
            return Err(CoreError::SchemaViolation {
                backend: "embeddings".into(),
                reason: "empty embedding".into(),
            });
        }
        Ok(out)
    }
}

impl Embedder for HttpEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.embed_raw(&format!("Instruct: {QUERY_INSTRUCTION}\nQuery: {text}"))
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.embed_raw(text)
    }
}
