use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error taxonomy ───────────────────────────────────────────────────────
//
// `BackendUnavailable`, `SchemaViolation` and `DispatchFailed` abort the
// current chain. A resolver that finds no matching context is NOT an error;
// it surfaces as an empty candidate list and a "create new" decision.

#[derive(Debug, Error)]
pub(crate) enum CoreError {
    /// Both reasoning tiers failed for one request. The inbound message is
    /// left unhandled so the next poll retries it.
    #[error("reasoning backends unavailable: {0}")]
    BackendUnavailable(String),

    /// The response shape was unusable even after one corrective retry.
    #[error("schema violation from backend '{backend}': {reason}")]
    SchemaViolation { backend: String, reason: String },

    /// The store rejected a validated tool call. Not retried automatically.
    #[error("dispatch of '{tool}' failed: {reason}")]
    DispatchFailed { tool: String, reason: String },

    #[error("store error: {0}")]
    Store(String),
}

// ── Permanence ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Permanence {
    Permanent,
    NonPermanent,
}

impl Permanence {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::NonPermanent => "non-permanent",
        }
    }
    pub(crate) fn from_db_str(s: &str) -> Self {
        match s {
            "non-permanent" => Self::NonPermanent,
            _ => Self::Permanent,
        }
    }
}

// ── Knowledge items ──────────────────────────────────────────────────────
//
// Invariant (enforced in store.rs): non-permanent items carry a non-null
// expiry; permanent items must not.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Task {
    #[serde(default)]
    pub(crate) id: i64,
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) due_date: Option<i64>,
    pub(crate) permanence: Permanence,
    pub(crate) created_at: i64,
    #[serde(default)]
    pub(crate) completed: bool,
    #[serde(default)]
    pub(crate) reminder_sent: bool,
    #[serde(default)]
    pub(crate) expiry_date: Option<i64>,
    #[serde(default)]
    pub(crate) context_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Note {
    #[serde(default)]
    pub(crate) id: i64,
    pub(crate) content: String,
    pub(crate) permanence: Permanence,
    pub(crate) created_at: i64,
    #[serde(default)]
    pub(crate) expiry_date: Option<i64>,
    #[serde(default)]
    pub(crate) context_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Event {
    #[serde(default)]
    pub(crate) id: i64,
    pub(crate) title: String,
    pub(crate) start_time: i64,
    #[serde(default)]
    pub(crate) end_time: Option<i64>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) location: Option<String>,
    pub(crate) created_at: i64,
    #[serde(default)]
    pub(crate) reminder_sent: bool,
    #[serde(default)]
    pub(crate) expiry_date: Option<i64>,
    #[serde(default)]
    pub(crate) context_id: Option<String>,
}

/// A task or event whose reminder is due. Inert DTO for the reminder job.
#[derive(Debug, Clone)]
pub(crate) struct DueItem {
    pub(crate) id: i64,
    pub(crate) kind: DueItemKind,
    pub(crate) content: String,
    pub(crate) due_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DueItemKind {
    Task,
    Event,
}

// ── Contexts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ContextState {
    Stable,
    NeedsSummary,
}

impl ContextState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::NeedsSummary => "needs_summary",
        }
    }
    pub(crate) fn from_db_str(s: &str) -> Self {
        match s {
            "needs_summary" => Self::NeedsSummary,
            _ => Self::Stable,
        }
    }
}

/// A durable topic/project grouping that knowledge items attach to.
/// Exactly one row per distinct real-world topic; merges reassign all
/// item references before deleting the losing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Context {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) summary: String,
    pub(crate) state: ContextState,
    pub(crate) updated_at: i64,
}

/// One entry of the resolver's ranked output. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CandidateMatch {
    pub(crate) context_id: String,
    pub(crate) score: f32,
    pub(crate) summary: String,
    pub(crate) updated_at: i64,
}

// ── Conversations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ConversationState {
    AwaitingReply,
    Resolved,
}

impl ConversationState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingReply => "awaiting_reply",
            Self::Resolved => "resolved",
        }
    }
    pub(crate) fn from_db_str(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            _ => Self::AwaitingReply,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingQuestion {
    /// Stable index used to correlate an answer back to its question.
    pub(crate) index: usize,
    pub(crate) text: String,
}

/// An outstanding exchange with the user, keyed by thread token.
/// `resolved` is terminal: further replies on the token are logged and
/// ignored, which prevents replay-driven duplicate actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Conversation {
    pub(crate) id: String,
    pub(crate) thread_token: String,
    pub(crate) state: ConversationState,
    pub(crate) questions: Vec<PendingQuestion>,
    pub(crate) created_at: i64,
    #[serde(default)]
    pub(crate) resolved_at: Option<i64>,
}

// ── Reasoning wire types ─────────────────────────────────────────────────

/// Selects the reasoning tier for one gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CapabilityHint {
    FastLocal,
    DeepCloud,
}

impl CapabilityHint {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::FastLocal => "fast_local",
            Self::DeepCloud => "deep_cloud",
        }
    }
}

/// One reasoning request: system instruction, user input, optional tool
/// subset, optional forced-call constraint.
#[derive(Debug, Clone)]
pub(crate) struct LlmRequest {
    pub(crate) instruction: String,
    pub(crate) input: String,
    pub(crate) tools: Vec<serde_json::Value>,
    pub(crate) force_tool: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolCall {
    pub(crate) name: String,
    pub(crate) args: serde_json::Value,
}

/// Parsed backend reply: free text and/or tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LlmReply {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Vec<ToolCall>,
}

// ── Classification ───────────────────────────────────────────────────────

/// Output of the Classify step (fast local tier).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Classification {
    pub(crate) kind: RequestKind,
    #[serde(default = "default_true")]
    pub(crate) context_sensitive: bool,
    pub(crate) permanence: Permanence,
    /// RFC 3339; required when permanence is non-permanent.
    #[serde(default)]
    pub(crate) expiry: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RequestKind {
    Task,
    Note,
    Event,
    Other,
}

// ── Id derivation ────────────────────────────────────────────────────────

/// Short stable id: `<prefix>-<12 hex chars of blake3(seed|ts)>`.
pub(crate) fn derive_id(prefix: &str, seed: &str, ts: i64) -> String {
    let hash = blake3::hash(format!("{seed}|{ts}").as_bytes());
    let hex = hash.to_hex();
    format!("{prefix}-{}", &hex.as_str()[..12])
}
