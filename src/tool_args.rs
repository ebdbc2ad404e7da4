//! Typed argument structs for the dispatchable tools, plus timestamp
//! parsing. Deserialization through these types is the validation step:
//! a tool call whose args fail to parse is rejected before dispatch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTaskArgs {
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StoreNoteArgs {
    pub(crate) content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateEventArgs {
    pub(crate) title: String,
    pub(crate) start_time: String,
    #[serde(default)]
    pub(crate) end_time: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteNoteArgs {
    pub(crate) note_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AskUserArgs {
    pub(crate) questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleFollowupArgs {
    pub(crate) content: String,
    pub(crate) due_date: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignContextArgs {
    pub(crate) context_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateContextArgs {
    pub(crate) name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MergeContextsArgs {
    pub(crate) from_id: String,
    pub(crate) into_id: String,
}

/// Parse a model-supplied timestamp. Accepts RFC 3339 or a bare date
/// (midnight UTC); anything else is a validation error, not a guess.
pub(crate) fn parse_timestamp(raw: &str) -> Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    Err(format!("unparseable timestamp '{raw}'"))
}

pub(crate) fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:00Z").unwrap(), 0);
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), 86_400);
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn test_args_reject_missing_required() {
        let err = serde_json::from_value::<CreateTaskArgs>(serde_json::json!({
            "due_date": "2026-09-01"
        }));
        assert!(err.is_err());

        let ok: CreateTaskArgs = serde_json::from_value(serde_json::json!({
            "content": "water plants"
        }))
        .unwrap();
        assert_eq!(ok.content, "water plants");
        assert!(ok.due_date.is_none());
    }

    #[test]
    fn test_ask_user_args() {
        let args: AskUserArgs = serde_json::from_value(serde_json::json!({
            "questions": ["Which note?", "Are you sure?"]
        }))
        .unwrap();
        assert_eq!(args.questions.len(), 2);
    }
}
