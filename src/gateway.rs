//! Reasoning gateway: routes each request to a tier by capability hint and
//! fails over local → cloud transparently. Callers see one `complete` call
//! and never learn which backend answered; the op log carries that detail.
//!
//! Attempt plans:
//!   fast_local → [local, cloud]   (cloud as fallback)
//!   deep_cloud → [cloud]          (never silently downgraded to local)

use std::time::{Duration, Instant};

use crate::config::{jitter_ratio, parse_retry_after};
use crate::oplog::{OpLog, OpLogEntry};
use crate::types::{CapabilityHint, CoreError, LlmReply, LlmRequest, ToolCall};

const MAX_HTTP_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: f64 = 1.0;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLOUD_MAX_TOKENS: u32 = 4096;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Backend trait ────────────────────────────────────────────────────────

pub(crate) trait LlmBackend: Send + Sync {
    /// Short label for op-log entries ("local" / "cloud").
    fn name(&self) -> &str;
    fn invoke(&self, req: &LlmRequest) -> Result<LlmReply, CoreError>;
}

/// Shared HTTP retry loop: transient statuses back off exponentially with
/// jitter, honoring Retry-After when present. Anything else fails fast.
fn post_with_retries(
    backend: &str,
    build: impl Fn() -> ureq::Request,
    body: &serde_json::Value,
) -> Result<serde_json::Value, CoreError> {
    let mut last_err = String::new();
    for attempt in 0..MAX_HTTP_ATTEMPTS {
        match build().send_json(body.clone()) {
            Ok(resp) => {
                return resp
                    .into_json()
                    .map_err(|e| CoreError::BackendUnavailable(format!("{backend}: bad body: {e}")));
            }
            Err(ureq::Error::Status(code, resp)) if is_retryable_status(code) => {
                let wait = parse_retry_after(&resp)
                    .unwrap_or_else(|| BACKOFF_BASE_SECS * f64::from(1u32 << attempt) + jitter_ratio());
                last_err = format!("{backend}: status {code}");
                if attempt + 1 < MAX_HTTP_ATTEMPTS {
                    std::thread::sleep(Duration::from_secs_f64(wait));
                }
            }
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                return Err(CoreError::BackendUnavailable(format!(
                    "{backend}: status {code}: {detail}"
                )));
            }
            Err(e) => {
                return Err(CoreError::BackendUnavailable(format!("{backend}: {e}")));
            }
        }
    }
    Err(CoreError::BackendUnavailable(last_err))
}

// ── OpenAI-compatible backend (LM Studio / llama.cpp) ────────────────────

pub(crate) struct OpenAiCompatBackend {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatBackend {
    pub(crate) fn new(base_url: &str, model: &str, api_key: &str, timeout_ms: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .build();
        OpenAiCompatBackend {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_body(&self, req: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": req.instruction },
                { "role": "user", "content": req.input },
            ],
        });
        if !req.tools.is_empty() {
            let tools: Vec<serde_json::Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t["name"],
                            "description": t["description"],
                            "parameters": t["input_schema"],
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::from(tools);
            if let Some(name) = &req.force_tool {
                body["tool_choice"] = serde_json::json!({
                    "type": "function",
                    "function": { "name": name }
                });
            }
        }
        body
    }

    fn parse_reply(&self, body: &serde_json::Value) -> Result<LlmReply, CoreError> {
        let message = &body["choices"][0]["message"];
        if message.is_null() {
            return Err(CoreError::SchemaViolation {
                backend: self.name().to_string(),
                reason: "missing choices[0].message".into(),
            });
        }
        let mut reply = LlmReply::default();
        if let Some(text) = message["content"].as_str() {
            if !text.trim().is_empty() {
                reply.text = Some(text.to_string());
            }
        }
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let name = call["function"]["name"].as_str().unwrap_or_default();
                let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                let args = serde_json::from_str(raw_args).map_err(|e| CoreError::SchemaViolation {
                    backend: self.name().to_string(),
                    reason: format!("tool arguments not valid JSON: {e}"),
                })?;
                reply.tool_calls.push(ToolCall {
                    name: name.to_string(),
                    args,
                });
            }
        }
        Ok(reply)
    }
}

impl LlmBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn invoke(&self, req: &LlmRequest) -> Result<LlmReply, CoreError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);
        let auth = format!("Bearer {}", self.api_key);
        let resp = post_with_retries(
            self.name(),
            || self.agent.post(&url).set("authorization", &auth),
            &body,
        )?;
        self.parse_reply(&resp)
    }
}

// ── Anthropic messages backend ───────────────────────────────────────────

pub(crate) struct AnthropicBackend {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: String,
}

impl AnthropicBackend {
    pub(crate) fn new(url: &str, model: &str, api_key: &str, timeout_ms: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .build();
        AnthropicBackend {
            agent,
            url: url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_body(&self, req: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": CLOUD_MAX_TOKENS,
            "system": req.instruction,
            "messages": [
                { "role": "user", "content": req.input },
            ],
        });
        if !req.tools.is_empty() {
            // Neutral descriptors are already in Anthropic shape.
            body["tools"] = serde_json::Value::from(req.tools.clone());
            if let Some(name) = &req.force_tool {
                body["tool_choice"] = serde_json::json!({ "type": "tool", "name": name });
            }
        }
        body
    }

    fn parse_reply(&self, body: &serde_json::Value) -> Result<LlmReply, CoreError> {
        let blocks = body["content"].as_array().ok_or_else(|| CoreError::SchemaViolation {
            backend: self.name().to_string(),
            reason: "missing content array".into(),
        })?;
        let mut reply = LlmReply::default();
        let mut text_parts = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t.to_string());
                    }
                }
                Some("tool_use") => {
                    reply.tool_calls.push(ToolCall {
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        args: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }
        if !text_parts.is_empty() {
            reply.text = Some(text_parts.join("\n"));
        }
        Ok(reply)
    }
}

impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    fn invoke(&self, req: &LlmRequest) -> Result<LlmReply, CoreError> {
        let body = self.build_body(req);
        let resp = post_with_retries(
            self.name(),
            || {
                self.agent
                    .post(&self.url)
                    .set("x-api-key", &self.api_key)
                    .set("anthropic-version", ANTHROPIC_VERSION)
                    .set("content-type", "application/json")
            },
            &body,
        )?;
        self.parse_reply(&resp)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

pub(crate) struct Gateway {
    local: Box<dyn LlmBackend>,
    cloud: Box<dyn LlmBackend>,
    oplog: OpLog,
}

impl Gateway {
    pub(crate) fn new(local: Box<dyn LlmBackend>, cloud: Box<dyn LlmBackend>, oplog: OpLog) -> Self {
        Gateway { local, cloud, oplog }
    }

    fn attempt_plan(&self, hint: CapabilityHint) -> Vec<&dyn LlmBackend> {
        match hint {
            CapabilityHint::FastLocal => vec![self.local.as_ref(), self.cloud.as_ref()],
            CapabilityHint::DeepCloud => vec![self.cloud.as_ref()],
        }
    }

    /// One reasoning call. Walks the hint's attempt plan; the first backend
    /// that answers wins. Exhausting the plan is `BackendUnavailable`.
    pub(crate) fn complete(
        &self,
        req: &LlmRequest,
        hint: CapabilityHint,
    ) -> Result<LlmReply, CoreError> {
        let plan = self.attempt_plan(hint);
        let last = plan.len() - 1;
        let mut failures = Vec::new();
        for (i, backend) in plan.iter().enumerate() {
            let started = Instant::now();
            match backend.invoke(req) {
                Ok(reply) => {
                    self.oplog.append(
                        OpLogEntry::new("gateway", "attempt", "ok")
                            .backend(backend.name())
                            .latency_ms(started.elapsed().as_millis() as u64),
                    );
                    return Ok(reply);
                }
                Err(e) => {
                    self.oplog.append(
                        OpLogEntry::new("gateway", "attempt", "error")
                            .backend(backend.name())
                            .latency_ms(started.elapsed().as_millis() as u64)
                            .detail(e.to_string()),
                    );
                    if i < last {
                        self.oplog.append(
                            OpLogEntry::new("gateway", "failover", "ok").backend(backend.name()),
                        );
                    }
                    failures.push(format!("{}: {e}", backend.name()));
                }
            }
        }
        Err(CoreError::BackendUnavailable(failures.join("; ")))
    }

    /// `complete` plus shape enforcement. When the validator rejects a reply
    /// the same tier gets exactly one corrective retry with the violation
    /// quoted back; a second rejection is a hard `SchemaViolation`.
    pub(crate) fn complete_validated<T>(
        &self,
        req: &LlmRequest,
        hint: CapabilityHint,
        validate: impl Fn(&LlmReply) -> Result<T, String>,
    ) -> Result<T, CoreError> {
        let reply = self.complete(req, hint)?;
        match validate(&reply) {
            Ok(parsed) => Ok(parsed),
            Err(reason) => {
                self.oplog.append(
                    OpLogEntry::new("gateway", "corrective_retry", "schema_mismatch")
                        .detail(reason.clone()),
                );
                let mut retry = req.clone();
                retry.instruction = format!(
                    "{}\n\nYour previous reply was malformed: {reason}. \
                     Reply again following the required shape exactly.",
                    req.instruction
                );
                let reply = self.complete(&retry, hint)?;
                validate(&reply).map_err(|reason| CoreError::SchemaViolation {
                    backend: hint.as_str().to_string(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted backend: pops one canned result per invoke.
    pub(crate) struct ScriptedBackend {
        label: &'static str,
        script: Mutex<Vec<Result<LlmReply, CoreError>>>,
        pub(crate) calls: Mutex<u32>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(label: &'static str, script: Vec<Result<LlmReply, CoreError>>) -> Self {
            ScriptedBackend {
                label,
                script: Mutex::new(script),
                calls: Mutex::new(0),
                inputs: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Like `new`, but also hands back a shared view of every prompt
        /// input the backend receives, for asserting on framing.
        pub(crate) fn recording(
            label: &'static str,
            script: Vec<Result<LlmReply, CoreError>>,
        ) -> (Self, Arc<Mutex<Vec<String>>>) {
            let backend = Self::new(label, script);
            let inputs = backend.inputs.clone();
            (backend, inputs)
        }

        pub(crate) fn text_reply(text: &str) -> Result<LlmReply, CoreError> {
            Ok(LlmReply {
                text: Some(text.to_string()),
                tool_calls: Vec::new(),
            })
        }

        pub(crate) fn down() -> Result<LlmReply, CoreError> {
            Err(CoreError::BackendUnavailable("connection refused".into()))
        }
    }

    impl LlmBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.label
        }

        fn invoke(&self, req: &LlmRequest) -> Result<LlmReply, CoreError> {
            *self.calls.lock().unwrap() += 1;
            self.inputs.lock().unwrap().push(req.input.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(CoreError::BackendUnavailable("script exhausted".into()));
            }
            script.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use std::path::PathBuf;

    fn temp_oplog(name: &str) -> (OpLog, PathBuf) {
        let dir = std::env::temp_dir()
            .join("aura_test")
            .join(format!("gateway_{}_{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        (OpLog::new(dir.clone()), dir)
    }

    fn req() -> LlmRequest {
        LlmRequest {
            instruction: "be brief".into(),
            input: "hello".into(),
            tools: Vec::new(),
            force_tool: None,
        }
    }

    #[test]
    fn test_fast_local_prefers_local() {
        let (oplog, dir) = temp_oplog("prefers_local");
        let local = Box::new(ScriptedBackend::new(
            "local",
            vec![ScriptedBackend::text_reply("from local")],
        ));
        let cloud = Box::new(ScriptedBackend::new("cloud", vec![]));
        let gw = Gateway::new(local, cloud, oplog);

        let reply = gw.complete(&req(), CapabilityHint::FastLocal).unwrap();
        assert_eq!(reply.text.as_deref(), Some("from local"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fast_local_fails_over_to_cloud() {
        let (oplog, dir) = temp_oplog("failover");
        let local = Box::new(ScriptedBackend::new("local", vec![ScriptedBackend::down()]));
        let cloud = Box::new(ScriptedBackend::new(
            "cloud",
            vec![ScriptedBackend::text_reply("from cloud")],
        ));
        let gw = Gateway::new(local, cloud, oplog);

        let reply = gw.complete(&req(), CapabilityHint::FastLocal).unwrap();
        assert_eq!(reply.text.as_deref(), Some("from cloud"));

        let entries = crate::oplog::load_recent_entries(&dir, 10);
        assert!(entries.iter().any(|e| e.event == "failover"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_deep_cloud_never_downgrades() {
        let (oplog, dir) = temp_oplog("no_downgrade");
        let local = Box::new(ScriptedBackend::new(
            "local",
            vec![ScriptedBackend::text_reply("should not be used")],
        ));
        let cloud = Box::new(ScriptedBackend::new("cloud", vec![ScriptedBackend::down()]));
        let gw = Gateway::new(local, cloud, oplog);

        let err = gw.complete(&req(), CapabilityHint::DeepCloud).unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_both_tiers_down_is_unavailable() {
        let (oplog, dir) = temp_oplog("all_down");
        let local = Box::new(ScriptedBackend::new("local", vec![ScriptedBackend::down()]));
        let cloud = Box::new(ScriptedBackend::new("cloud", vec![ScriptedBackend::down()]));
        let gw = Gateway::new(local, cloud, oplog);

        let err = gw.complete(&req(), CapabilityHint::FastLocal).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("local") && msg.contains("cloud"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validated_retries_once_then_fails() {
        let (oplog, dir) = temp_oplog("validated");
        let local = Box::new(ScriptedBackend::new(
            "local",
            vec![
                ScriptedBackend::text_reply("garbage"),
                ScriptedBackend::text_reply("still garbage"),
            ],
        ));
        let cloud = Box::new(ScriptedBackend::new("cloud", vec![]));
        let gw = Gateway::new(local, cloud, oplog);

        let err = gw
            .complete_validated(&req(), CapabilityHint::FastLocal, |_reply| {
                Err::<(), String>("expected a tool call".into())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validated_corrective_retry_succeeds() {
        let (oplog, dir) = temp_oplog("corrective");
        let local = Box::new(ScriptedBackend::new(
            "local",
            vec![
                ScriptedBackend::text_reply("garbage"),
                ScriptedBackend::text_reply("fixed"),
            ],
        ));
        let cloud = Box::new(ScriptedBackend::new("cloud", vec![]));
        let gw = Gateway::new(local, cloud, oplog);

        let out = gw
            .complete_validated(&req(), CapabilityHint::FastLocal, |reply| {
                match reply.text.as_deref() {
                    Some("fixed") => Ok("fixed".to_string()),
                    _ => Err("expected the word fixed".into()),
                }
            })
            .unwrap();
        assert_eq!(out, "fixed");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_openai_body_shape() {
        let backend = OpenAiCompatBackend::new("http://127.0.0.1:1234/v1", "qwen3-14b", "k", 1000);
        let mut r = req();
        r.tools = vec![serde_json::json!({
            "name": "classify_request",
            "description": "Classify an inbound request",
            "input_schema": { "type": "object" }
        })];
        r.force_tool = Some("classify_request".into());
        let body = backend.build_body(&r);
        assert_eq!(body["tools"][0]["function"]["name"], "classify_request");
        assert_eq!(body["tool_choice"]["function"]["name"], "classify_request");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_openai_parses_tool_calls() {
        let backend = OpenAiCompatBackend::new("http://127.0.0.1:1234/v1", "qwen3-14b", "k", 1000);
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "function": {
                            "name": "store_note",
                            "arguments": "{\"content\": \"hi\"}"
                        }
                    }]
                }
            }]
        });
        let reply = backend.parse_reply(&body).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "store_note");
        assert_eq!(reply.tool_calls[0].args["content"], "hi");
    }

    #[test]
    fn test_anthropic_parses_blocks() {
        let backend = AnthropicBackend::new("https://example.invalid/v1/messages", "m", "k", 1000);
        let body = serde_json::json!({
            "content": [
                { "type": "text", "text": "placing this in Guitar" },
                { "type": "tool_use", "name": "assign_context",
                  "input": { "context_id": "ctx-abc" } }
            ]
        });
        let reply = backend.parse_reply(&body).unwrap();
        assert_eq!(reply.text.as_deref(), Some("placing this in Guitar"));
        assert_eq!(reply.tool_calls[0].name, "assign_context");
        assert_eq!(reply.tool_calls[0].args["context_id"], "ctx-abc");
    }
}
