//! Tool descriptors handed to the reasoning tiers. Neutral shape is
//! `{name, description, input_schema}`; the gateway backends translate to
//! their wire formats. Schemas stay deliberately small — every required
//! field here is a field a local 14B model must reliably fill.

use serde_json::{Value, json};

use crate::types::CapabilityHint;

/// Forced call on the fast local tier: every inbound request gets routed
/// through this exact shape before anything else happens.
pub(crate) fn classify_tool() -> Value {
    json!({
        "name": "classify_request",
        "description": "Classify an inbound user request before any action is taken.",
        "input_schema": {
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": ["task", "note", "event", "other"],
                    "description": "What the user is asking the assistant to record or do."
                },
                "context_sensitive": {
                    "type": "boolean",
                    "description": "Whether the request belongs to an ongoing topic context."
                },
                "permanence": {
                    "type": "string",
                    "enum": ["permanent", "non-permanent"],
                    "description": "Whether the information stays relevant indefinitely."
                },
                "expiry": {
                    "type": ["string", "null"],
                    "description": "RFC 3339 date after which a non-permanent item may be purged."
                }
            },
            "required": ["kind", "permanence"]
        }
    })
}

/// Tools for the context decision on the deep tier: pick one ranked
/// candidate or reject them all and open a new context.
pub(crate) fn decide_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "assign_context",
            "description": "Attach the request to one of the candidate contexts.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "context_id": {
                        "type": "string",
                        "description": "Id of the chosen candidate, exactly as listed."
                    }
                },
                "required": ["context_id"]
            }
        }),
        json!({
            "name": "create_context",
            "description": "No candidate fits; open a new context for this topic.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Short human-readable topic name, e.g. 'Guitar'."
                    }
                },
                "required": ["name"]
            }
        }),
    ]
}

/// Dispatchable action tools. The executor validates arguments against
/// these schemas (via tool_args) before anything touches the store.
pub(crate) fn action_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "create_task",
            "description": "Record something the user needs to do, optionally with a due date.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "due_date": {
                        "type": ["string", "null"],
                        "description": "RFC 3339 timestamp the task is due, if any."
                    }
                },
                "required": ["content"]
            }
        }),
        json!({
            "name": "store_note",
            "description": "Store a piece of information the user wants remembered.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "content": { "type": "string" }
                },
                "required": ["content"]
            }
        }),
        json!({
            "name": "create_event",
            "description": "Record a calendar event with a start time.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "start_time": {
                        "type": "string",
                        "description": "RFC 3339 start timestamp."
                    },
                    "end_time": { "type": ["string", "null"] },
                    "description": { "type": ["string", "null"] },
                    "location": { "type": ["string", "null"] }
                },
                "required": ["title", "start_time"]
            }
        }),
        json!({
            "name": "delete_note",
            "description": "Delete a stored note by id.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "note_id": { "type": "integer" }
                },
                "required": ["note_id"]
            }
        }),
        json!({
            "name": "ask_user",
            "description": "Pause and ask the user one or more clarifying questions.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    }
                },
                "required": ["questions"]
            }
        }),
    ]
}

/// Cloud-only: schedule a follow-up task with a due date, used when a reply
/// or audit pass defers something rather than acting now.
pub(crate) fn schedule_followup_tool() -> Value {
    json!({
        "name": "schedule_followup_task",
        "description": "Create a follow-up task to revisit something at a later date.",
        "input_schema": {
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "due_date": {
                    "type": "string",
                    "description": "RFC 3339 timestamp to revisit this."
                }
            },
            "required": ["content", "due_date"]
        }
    })
}

/// Cloud-only: merge a duplicate context, offered during the nightly audit.
pub(crate) fn merge_tool() -> Value {
    json!({
        "name": "merge_contexts",
        "description": "Merge a duplicate context into its canonical twin.",
        "input_schema": {
            "type": "object",
            "properties": {
                "from_id": { "type": "string" },
                "into_id": { "type": "string" }
            },
            "required": ["from_id", "into_id"]
        }
    })
}

/// Registry lookup by tool name.
pub(crate) fn get(name: &str) -> Option<Value> {
    let mut all = vec![classify_tool(), merge_tool(), schedule_followup_tool()];
    all.extend(decide_tools());
    all.extend(action_tools());
    all.into_iter().find(|t| t["name"] == name)
}

/// Tool subset a tier may see. The local tier never sees the advanced
/// tools; merges and deferred follow-ups are cloud-only decisions.
pub(crate) fn all_for(hint: CapabilityHint) -> Vec<Value> {
    let mut tools = action_tools();
    if hint == CapabilityHint::DeepCloud {
        tools.push(schedule_followup_tool());
        tools.push(merge_tool());
    }
    tools
}

pub(crate) fn tool_names(tools: &[Value]) -> Vec<&str> {
    tools.iter().filter_map(|t| t["name"].as_str()).collect()
}
