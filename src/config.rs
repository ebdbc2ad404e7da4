use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Env helpers ──────────────────────────────────────────────────────────

pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("invalid {name}: '{raw}'").into()),
        None => Ok(default),
    }
}

// ── Retry helpers ────────────────────────────────────────────────────────

/// Pseudo-random ratio in [0, 1) for backoff jitter. Clock-derived; this is
/// jitter, not cryptography.
pub(crate) fn jitter_ratio() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after").and_then(|v| v.parse::<f64>().ok())
}

// ── Config file ──────────────────────────────────────────────────────────

pub(crate) const DEFAULT_LOCAL_BASE_URL: &str = "http://127.0.0.1:1234/v1";
pub(crate) const DEFAULT_CLOUD_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AuraConfig {
    /// Workspace root: database, spool directories and logs live under it.
    #[serde(default = "default_workspace")]
    pub(crate) workspace: PathBuf,

    /// OpenAI-compatible local reasoning endpoint (LM Studio / llama.cpp).
    #[serde(default = "default_local_base_url")]
    pub(crate) local_base_url: String,
    #[serde(default = "default_local_model")]
    pub(crate) local_model: String,
    /// Not used for auth by local servers, but the header must be present.
    #[serde(default = "default_local_api_key")]
    pub(crate) local_api_key: String,

    /// Anthropic messages endpoint for the deep cloud tier.
    #[serde(default = "default_cloud_base_url")]
    pub(crate) cloud_base_url: String,
    #[serde(default = "default_cloud_model")]
    pub(crate) cloud_model: String,

    /// Embedding endpoint (OpenAI-compatible /v1/embeddings). Defaults to
    /// the local base URL; embeddings never go to the cloud tier.
    #[serde(default)]
    pub(crate) embed_base_url: Option<String>,
    #[serde(default = "default_embed_model")]
    pub(crate) embed_model: String,

    /// Per reasoning/store call; exceeding it triggers failover, never a hang.
    #[serde(default = "default_request_timeout_ms")]
    pub(crate) request_timeout_ms: u64,

    /// Main-loop idle sleep between transport polls.
    #[serde(default = "default_poll_interval_secs")]
    pub(crate) poll_interval_secs: u64,
    /// Summarization sweep / reminder / purge interval.
    #[serde(default = "default_sweep_interval_secs")]
    pub(crate) sweep_interval_secs: u64,
    /// Local hour (UTC) at which the nightly audit runs, once per day.
    #[serde(default = "default_audit_hour")]
    pub(crate) audit_hour: u32,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".aura")
}
fn default_local_base_url() -> String {
    DEFAULT_LOCAL_BASE_URL.to_string()
}
fn default_local_model() -> String {
    "qwen3-14b".to_string()
}
fn default_local_api_key() -> String {
    "lm-studio".to_string()
}
fn default_cloud_base_url() -> String {
    DEFAULT_CLOUD_BASE_URL.to_string()
}
fn default_cloud_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_embed_model() -> String {
    "qwen3-embedding".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_audit_hour() -> u32 {
    3
}

impl Default for AuraConfig {
    fn default() -> Self {
        AuraConfig {
            workspace: default_workspace(),
            local_base_url: default_local_base_url(),
            local_model: default_local_model(),
            local_api_key: default_local_api_key(),
            cloud_base_url: default_cloud_base_url(),
            cloud_model: default_cloud_model(),
            embed_base_url: None,
            embed_model: default_embed_model(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            audit_hour: default_audit_hour(),
        }
    }
}

impl AuraConfig {
    pub(crate) fn db_path(&self) -> PathBuf {
        self.workspace.join("aura.sqlite")
    }
    pub(crate) fn log_dir(&self) -> PathBuf {
        self.workspace.join("logs")
    }
    pub(crate) fn spool_dir(&self) -> PathBuf {
        self.workspace.join("spool")
    }
    pub(crate) fn embed_base_url(&self) -> &str {
        self.embed_base_url.as_deref().unwrap_or(&self.local_base_url)
    }
}

pub(crate) fn config_file_path(workspace: &Path) -> PathBuf {
    workspace.join("config.json")
}

/// Load config from `<workspace>/config.json` (missing file → defaults),
/// then apply env overrides. Secrets (API keys) come only from env.
pub(crate) fn load_config(workspace: Option<PathBuf>) -> AuraConfig {
    let workspace = workspace
        .or_else(|| env_optional("AURA_WORKSPACE").map(PathBuf::from))
        .unwrap_or_else(default_workspace);
    let path = config_file_path(&workspace);
    let mut config: AuraConfig = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| match serde_json::from_str(&text) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                eprintln!("[config] ignoring malformed {}: {e}", path.display());
                None
            }
        })
        .unwrap_or_default();
    config.workspace = workspace;

    if let Some(url) = env_optional("AURA_LOCAL_BASE_URL") {
        config.local_base_url = url;
    }
    if let Some(model) = env_optional("AURA_LOCAL_MODEL") {
        config.local_model = model;
    }
    if let Some(url) = env_optional("AURA_CLOUD_BASE_URL") {
        config.cloud_base_url = url;
    }
    if let Some(model) = env_optional("AURA_CLOUD_MODEL") {
        config.cloud_model = model;
    }
    if let Some(url) = env_optional("AURA_EMBED_BASE_URL") {
        config.embed_base_url = Some(url);
    }
    if let Some(model) = env_optional("AURA_EMBED_MODEL") {
        config.embed_model = model;
    }
    if let Ok(ms) = env_u64("AURA_REQUEST_TIMEOUT_MS", config.request_timeout_ms) {
        config.request_timeout_ms = ms;
    }
    config
}

pub(crate) fn save_config(config: &AuraConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.workspace)?;
    let path = config_file_path(&config.workspace);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AuraConfig::default();
        assert_eq!(cfg.local_base_url, DEFAULT_LOCAL_BASE_URL);
        assert_eq!(cfg.request_timeout_ms, 30_000);
        assert_eq!(cfg.embed_base_url(), DEFAULT_LOCAL_BASE_URL);
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let cfg: AuraConfig =
            serde_json::from_str(r#"{"local_model": "phi-4", "audit_hour": 5}"#).unwrap();
        assert_eq!(cfg.local_model, "phi-4");
        assert_eq!(cfg.audit_hour, 5);
        assert_eq!(cfg.cloud_base_url, DEFAULT_CLOUD_BASE_URL);
    }

    #[test]
    fn test_jitter_ratio_in_range() {
        for _ in 0..16 {
            let j = jitter_ratio();
            assert!((0.0..1.0).contains(&j));
        }
    }
}
