//! Conversation lifecycle. A conversation opens when the assistant asks the
//! user something and closes once a reply has been fully acted on. The
//! transition set is exactly `awaiting_reply → resolved`, and resolution
//! happens only after every tool call derived from the reply dispatched
//! successfully; a partial failure keeps the conversation open with its
//! questions intact. Replies to a resolved thread are logged and dropped so
//! a redelivered message can never double-execute.

use crate::oplog::{OpLog, OpLogEntry};
use crate::store::Store;
use crate::tool_args::now_epoch;
use crate::types::{Conversation, ConversationState, CoreError, PendingQuestion, derive_id};

/// What an inbound message on a thread token means.
#[derive(Debug)]
pub(crate) enum ReplyDisposition {
    /// No conversation on this token; treat the message as a fresh request.
    NewRequest,
    /// Reply to an open conversation. The caller reconciles it into tool
    /// calls and resolves the conversation once they all dispatch.
    Reply(Conversation),
    /// Reply to an already-resolved conversation. Dropped.
    ReplayIgnored,
}

pub(crate) struct Conversations {
    oplog: OpLog,
}

impl Conversations {
    pub(crate) fn new(oplog: OpLog) -> Self {
        Conversations { oplog }
    }

    /// Open a conversation for a set of outbound questions. One open
    /// conversation per thread token; asking again on a busy token is a
    /// caller bug surfaced as a store error (unique constraint).
    pub(crate) fn open(
        &self,
        store: &Store,
        thread_token: &str,
        questions: &[String],
    ) -> Result<Conversation, CoreError> {
        let now = now_epoch();
        let conv = Conversation {
            id: derive_id("conv", thread_token, now),
            thread_token: thread_token.to_string(),
            state: ConversationState::AwaitingReply,
            questions: questions
                .iter()
                .enumerate()
                .map(|(index, text)| PendingQuestion {
                    index,
                    text: text.clone(),
                })
                .collect(),
            created_at: now,
            resolved_at: None,
        };
        store.insert_conversation(&conv).map_err(CoreError::Store)?;
        self.oplog.append(
            OpLogEntry::new("conversation", "opened", "ok").detail(conv.id.clone()),
        );
        Ok(conv)
    }

    /// Classify an inbound message by its thread token. Read-only: the
    /// state transition is `resolve`, which the caller invokes only after
    /// the reply's tool calls have all landed.
    pub(crate) fn on_inbound(
        &self,
        store: &Store,
        thread_token: &str,
    ) -> Result<ReplyDisposition, CoreError> {
        let Some(conv) = store.conversation_by_token(thread_token) else {
            return Ok(ReplyDisposition::NewRequest);
        };
        match conv.state {
            ConversationState::Resolved => {
                self.oplog.append(
                    OpLogEntry::new("conversation", "replay_ignored", "ok")
                        .detail(conv.id.clone()),
                );
                Ok(ReplyDisposition::ReplayIgnored)
            }
            ConversationState::AwaitingReply => Ok(ReplyDisposition::Reply(conv)),
        }
    }

    /// Terminal transition, fired after successful dispatch.
    pub(crate) fn resolve(&self, store: &Store, conversation_id: &str) -> Result<(), CoreError> {
        store
            .resolve_conversation(conversation_id, now_epoch())
            .map_err(CoreError::Store)?;
        self.oplog.append(
            OpLogEntry::new("conversation", "resolved", "ok").detail(conversation_id.to_string()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> (Store, Conversations, PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join("aura_test");
        std::fs::create_dir_all(&dir).unwrap();
        let db = dir.join(format!("conv_{}_{name}.sqlite", std::process::id()));
        let logs = dir.join(format!("conv_logs_{}_{name}", std::process::id()));
        let _ = std::fs::remove_file(&db);
        let _ = std::fs::remove_dir_all(&logs);
        let store = Store::open_or_create(&db).unwrap();
        let convs = Conversations::new(OpLog::new(logs.clone()));
        (store, convs, db, logs)
    }

    #[test]
    fn test_unknown_token_is_new_request() {
        let (store, convs, db, logs) = fixture("unknown");
        let disp = convs.on_inbound(&store, "thread-1").unwrap();
        assert!(matches!(disp, ReplyDisposition::NewRequest));
        std::fs::remove_file(&db).ok();
        std::fs::remove_dir_all(&logs).ok();
    }

    #[test]
    fn test_reply_stays_open_until_resolved() {
        let (store, convs, db, logs) = fixture("resolve");
        let conv = convs
            .open(&store, "thread-2", &["Which note should I delete?".to_string()])
            .unwrap();

        // Inbound reply: surfaced with questions, but not yet resolved.
        let disp = convs.on_inbound(&store, "thread-2").unwrap();
        let ReplyDisposition::Reply(open) = disp else {
            panic!("expected Reply, got {disp:?}");
        };
        assert_eq!(open.questions.len(), 1);
        assert_eq!(open.questions[0].index, 0);

        // Until resolve fires, another inbound is still a Reply (the first
        // attempt may have failed dispatch).
        let disp = convs.on_inbound(&store, "thread-2").unwrap();
        assert!(matches!(disp, ReplyDisposition::Reply(_)));

        convs.resolve(&store, &conv.id).unwrap();
        let disp = convs.on_inbound(&store, "thread-2").unwrap();
        assert!(matches!(disp, ReplyDisposition::ReplayIgnored));

        let entries = crate::oplog::load_recent_entries(&logs, 10);
        assert!(entries.iter().any(|e| e.event == "replay_ignored"));
        std::fs::remove_file(&db).ok();
        std::fs::remove_dir_all(&logs).ok();
    }

    #[test]
    fn test_double_open_on_token_rejected() {
        let (store, convs, db, logs) = fixture("double_open");
        convs.open(&store, "thread-3", &["q1".to_string()]).unwrap();
        let err = convs.open(&store, "thread-3", &["q2".to_string()]);
        assert!(err.is_err());
        std::fs::remove_file(&db).ok();
        std::fs::remove_dir_all(&logs).ok();
    }
}
