//! SQLite-backed relational store for tasks, notes, events, contexts and
//! conversations.
//!
//! Design goals:
//!   - WAL mode so the maintenance thread reads while the worker writes
//!   - single-statement writes scoped to one row (no transaction ever spans
//!     a network round trip)
//!   - permanence invariant enforced at the write boundary: non-permanent
//!     rows carry an expiry, permanent rows must not

use std::path::Path;

use rusqlite::{Connection, params};

use crate::types::{
    Context, ContextState, Conversation, ConversationState, DueItem, DueItemKind, Event, Note,
    PendingQuestion, Permanence, Task,
};

pub(crate) struct Store {
    conn: Connection,
}

fn check_permanence(permanence: Permanence, expiry: Option<i64>) -> Result<(), String> {
    match (permanence, expiry) {
        (Permanence::NonPermanent, None) => {
            Err("non-permanent item requires an expiry date".into())
        }
        (Permanence::Permanent, Some(_)) => {
            Err("permanent item must not carry an expiry date".into())
        }
        _ => Ok(()),
    }
}

impl Store {
    pub(crate) fn open_or_create(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("create db dir: {e}"))?;
        }
        let conn = Connection::open(path).map_err(|e| format!("open db: {e}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| format!("set WAL: {e}"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS contexts (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                summary     TEXT NOT NULL DEFAULT '',
                state       TEXT NOT NULL DEFAULT 'needs_summary',
                updated_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                content       TEXT NOT NULL,
                due_date      INTEGER,
                permanence    TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                completed     INTEGER NOT NULL DEFAULT 0,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                expiry_date   INTEGER,
                context_id    TEXT
            );
            CREATE TABLE IF NOT EXISTS notes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                content     TEXT NOT NULL,
                permanence  TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                expiry_date INTEGER,
                context_id  TEXT
            );
            CREATE TABLE IF NOT EXISTS events (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                title         TEXT NOT NULL,
                start_time    INTEGER NOT NULL,
                end_time      INTEGER,
                description   TEXT,
                location      TEXT,
                created_at    INTEGER NOT NULL,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                expiry_date   INTEGER,
                context_id    TEXT
            );
            CREATE TABLE IF NOT EXISTS conversations (
                id           TEXT PRIMARY KEY,
                thread_token TEXT NOT NULL UNIQUE,
                state        TEXT NOT NULL DEFAULT 'awaiting_reply',
                questions    TEXT NOT NULL DEFAULT '[]',
                created_at   INTEGER NOT NULL,
                resolved_at  INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_context ON tasks(context_id);
            CREATE INDEX IF NOT EXISTS idx_notes_context ON notes(context_id);
            CREATE INDEX IF NOT EXISTS idx_events_context ON events(context_id);",
        )
        .map_err(|e| format!("schema: {e}"))?;
        Ok(Store { conn })
    }

    // ── Contexts ─────────────────────────────────────────────────────

    pub(crate) fn insert_context(&self, ctx: &Context) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO contexts (id, name, summary, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ctx.id, ctx.name, ctx.summary, ctx.state.as_str(), ctx.updated_at],
            )
            .map_err(|e| format!("insert context: {e}"))?;
        Ok(())
    }

    pub(crate) fn context_by_id(&self, id: &str) -> Result<Context, String> {
        self.conn
            .query_row(
                "SELECT id, name, summary, state, updated_at FROM contexts WHERE id = ?1",
                params![id],
                row_to_context,
            )
            .map_err(|e| format!("context {id}: {e}"))
    }

    pub(crate) fn context_by_name(&self, name: &str) -> Option<Context> {
        self.conn
            .query_row(
                "SELECT id, name, summary, state, updated_at FROM contexts
                 WHERE name = ?1 COLLATE NOCASE",
                params![name],
                row_to_context,
            )
            .ok()
    }

    pub(crate) fn list_contexts(&self) -> Result<Vec<Context>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, summary, state, updated_at FROM contexts ORDER BY updated_at DESC")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], row_to_context)
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
    }

    pub(crate) fn contexts_needing_summary(&self) -> Result<Vec<Context>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, summary, state, updated_at FROM contexts
                 WHERE state = 'needs_summary' ORDER BY updated_at ASC",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], row_to_context)
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
    }

    /// Mark a context dirty after an item lands in it.
    pub(crate) fn touch_context(&self, id: &str, now: i64) -> Result<(), String> {
        self.conn
            .execute(
                "UPDATE contexts SET state = 'needs_summary', updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )
            .map_err(|e| format!("touch context: {e}"))?;
        Ok(())
    }

    /// Store a fresh summary. The state only resets to `stable` when
    /// `updated_at` still matches the sweep's snapshot; a context mutated
    /// mid-summarization stays `needs_summary` and is re-selected next sweep.
    pub(crate) fn finish_summary(
        &self,
        id: &str,
        summary: &str,
        snapshot_updated_at: i64,
        now: i64,
    ) -> Result<bool, String> {
        self.conn
            .execute(
                "UPDATE contexts SET
                    summary = ?2,
                    state = CASE WHEN updated_at = ?3 THEN 'stable' ELSE state END,
                    updated_at = CASE WHEN updated_at = ?3 THEN ?4 ELSE updated_at END
                 WHERE id = ?1",
                params![id, summary, snapshot_updated_at, now],
            )
            .map_err(|e| format!("finish summary: {e}"))?;
        let ctx = self.context_by_id(id)?;
        Ok(ctx.state == ContextState::Stable)
    }

    /// Merge: reassign every item reference from `from` onto `into`, then
    /// delete the losing row. Returns the number of reassigned items.
    pub(crate) fn merge_contexts(&self, from: &str, into: &str, now: i64) -> Result<usize, String> {
        // Both rows must exist before anything moves.
        self.context_by_id(from)?;
        self.context_by_id(into)?;
        let mut moved = 0usize;
        for table in ["tasks", "notes", "events"] {
            moved += self
                .conn
                .execute(
                    &format!("UPDATE {table} SET context_id = ?2 WHERE context_id = ?1"),
                    params![from, into],
                )
                .map_err(|e| format!("merge {table}: {e}"))?;
        }
        self.conn
            .execute("DELETE FROM contexts WHERE id = ?1", params![from])
            .map_err(|e| format!("merge delete: {e}"))?;
        self.touch_context(into, now)?;
        Ok(moved)
    }

    /// Content of every item linked to a context, newest first. Feeds the
    /// summarization sweep; capped so a noisy context cannot blow a prompt.
    pub(crate) fn items_for_context(&self, id: &str, limit: usize) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT content, created_at FROM (
                    SELECT content, created_at FROM tasks WHERE context_id = ?1
                    UNION ALL
                    SELECT content, created_at FROM notes WHERE context_id = ?1
                    UNION ALL
                    SELECT title AS content, created_at FROM events WHERE context_id = ?1
                 ) ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![id, limit as i64], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
    }

    // ── Knowledge items ──────────────────────────────────────────────

    pub(crate) fn insert_task(&self, task: &Task) -> Result<i64, String> {
        check_permanence(task.permanence, task.expiry_date)?;
        self.conn
            .execute(
                "INSERT INTO tasks (content, due_date, permanence, created_at, completed,
                                    reminder_sent, expiry_date, context_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    task.content,
                    task.due_date,
                    task.permanence.as_str(),
                    task.created_at,
                    task.completed,
                    task.reminder_sent,
                    task.expiry_date,
                    task.context_id,
                ],
            )
            .map_err(|e| format!("insert task: {e}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn insert_note(&self, note: &Note) -> Result<i64, String> {
        check_permanence(note.permanence, note.expiry_date)?;
        self.conn
            .execute(
                "INSERT INTO notes (content, permanence, created_at, expiry_date, context_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note.content,
                    note.permanence.as_str(),
                    note.created_at,
                    note.expiry_date,
                    note.context_id,
                ],
            )
            .map_err(|e| format!("insert note: {e}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn insert_event(&self, event: &Event) -> Result<i64, String> {
        self.conn
            .execute(
                "INSERT INTO events (title, start_time, end_time, description, location,
                                     created_at, reminder_sent, expiry_date, context_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.title,
                    event.start_time,
                    event.end_time,
                    event.description,
                    event.location,
                    event.created_at,
                    event.reminder_sent,
                    event.expiry_date,
                    event.context_id,
                ],
            )
            .map_err(|e| format!("insert event: {e}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest notes first; batched input for the nightly audit.
    pub(crate) fn recent_notes(&self, limit: usize) -> Result<Vec<Note>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, content, permanence, created_at, expiry_date, context_id
                 FROM notes ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(Note {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    permanence: Permanence::from_db_str(&row.get::<_, String>(2)?),
                    created_at: row.get(3)?,
                    expiry_date: row.get(4)?,
                    context_id: row.get(5)?,
                })
            })
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
    }

    pub(crate) fn note_by_id(&self, id: i64) -> Option<Note> {
        self.conn
            .query_row(
                "SELECT id, content, permanence, created_at, expiry_date, context_id
                 FROM notes WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Note {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        permanence: Permanence::from_db_str(&row.get::<_, String>(2)?),
                        created_at: row.get(3)?,
                        expiry_date: row.get(4)?,
                        context_id: row.get(5)?,
                    })
                },
            )
            .ok()
    }

    pub(crate) fn delete_note(&self, id: i64) -> Result<bool, String> {
        let n = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?1", params![id])
            .map_err(|e| format!("delete note: {e}"))?;
        Ok(n > 0)
    }

    // ── Reminder / purge queries ─────────────────────────────────────

    /// Tasks past due (not completed, not reminded) and events past start
    /// (not reminded).
    pub(crate) fn due_items(&self, now: i64) -> Result<Vec<DueItem>, String> {
        let mut out = Vec::new();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, content, due_date FROM tasks
                 WHERE due_date IS NOT NULL AND due_date <= ?1
                   AND reminder_sent = 0 AND completed = 0",
            )
            .map_err(|e| e.to_string())?;
        let tasks = stmt
            .query_map(params![now], |row| {
                Ok(DueItem {
                    id: row.get(0)?,
                    kind: DueItemKind::Task,
                    content: row.get(1)?,
                    due_at: row.get(2)?,
                })
            })
            .map_err(|e| e.to_string())?;
        for item in tasks {
            out.push(item.map_err(|e| e.to_string())?);
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, start_time FROM events
                 WHERE start_time <= ?1 AND reminder_sent = 0",
            )
            .map_err(|e| e.to_string())?;
        let events = stmt
            .query_map(params![now], |row| {
                Ok(DueItem {
                    id: row.get(0)?,
                    kind: DueItemKind::Event,
                    content: row.get(1)?,
                    due_at: row.get(2)?,
                })
            })
            .map_err(|e| e.to_string())?;
        for item in events {
            out.push(item.map_err(|e| e.to_string())?);
        }
        Ok(out)
    }

    pub(crate) fn mark_reminded(&self, kind: DueItemKind, id: i64) -> Result<(), String> {
        let table = match kind {
            DueItemKind::Task => "tasks",
            DueItemKind::Event => "events",
        };
        self.conn
            .execute(
                &format!("UPDATE {table} SET reminder_sent = 1 WHERE id = ?1"),
                params![id],
            )
            .map_err(|e| format!("mark reminded: {e}"))?;
        Ok(())
    }

    /// Delete non-permanent rows past expiry. Returns rows removed.
    pub(crate) fn purge_expired(&self, now: i64) -> Result<usize, String> {
        let mut total = 0usize;
        for table in ["tasks", "notes"] {
            total += self
                .conn
                .execute(
                    &format!(
                        "DELETE FROM {table}
                         WHERE permanence = 'non-permanent'
                           AND expiry_date IS NOT NULL AND expiry_date <= ?1"
                    ),
                    params![now],
                )
                .map_err(|e| format!("purge {table}: {e}"))?;
        }
        // Events have no permanence column; expiry alone governs them.
        total += self
            .conn
            .execute(
                "DELETE FROM events WHERE expiry_date IS NOT NULL AND expiry_date <= ?1",
                params![now],
            )
            .map_err(|e| format!("purge events: {e}"))?;
        Ok(total)
    }

    // ── Conversations ────────────────────────────────────────────────

    pub(crate) fn insert_conversation(&self, conv: &Conversation) -> Result<(), String> {
        let questions =
            serde_json::to_string(&conv.questions).map_err(|e| format!("questions: {e}"))?;
        self.conn
            .execute(
                "INSERT INTO conversations (id, thread_token, state, questions, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conv.id,
                    conv.thread_token,
                    conv.state.as_str(),
                    questions,
                    conv.created_at,
                    conv.resolved_at,
                ],
            )
            .map_err(|e| format!("insert conversation: {e}"))?;
        Ok(())
    }

    pub(crate) fn conversation_by_token(&self, token: &str) -> Option<Conversation> {
        self.conn
            .query_row(
                "SELECT id, thread_token, state, questions, created_at, resolved_at
                 FROM conversations WHERE thread_token = ?1",
                params![token],
                row_to_conversation,
            )
            .ok()
    }

    /// Terminal transition. A resolved conversation is immutable.
    pub(crate) fn resolve_conversation(&self, id: &str, now: i64) -> Result<(), String> {
        self.conn
            .execute(
                "UPDATE conversations SET state = 'resolved', resolved_at = ?2
                 WHERE id = ?1 AND state = 'awaiting_reply'",
                params![id, now],
            )
            .map_err(|e| format!("resolve conversation: {e}"))?;
        Ok(())
    }

    pub(crate) fn counts(&self) -> Result<Vec<(String, i64)>, String> {
        let mut out = Vec::new();
        for table in ["tasks", "notes", "events", "contexts", "conversations"] {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(|e| e.to_string())?;
            out.push((table.to_string(), n));
        }
        Ok(out)
    }
}

fn row_to_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<Context> {
    Ok(Context {
        id: row.get(0)?,
        name: row.get(1)?,
        summary: row.get(2)?,
        state: ContextState::from_db_str(&row.get::<_, String>(3)?),
        updated_at: row.get(4)?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let questions_raw: String = row.get(3)?;
    let questions: Vec<PendingQuestion> =
        serde_json::from_str(&questions_raw).unwrap_or_default();
    Ok(Conversation {
        id: row.get(0)?,
        thread_token: row.get(1)?,
        state: ConversationState::from_db_str(&row.get::<_, String>(2)?),
        questions,
        created_at: row.get(4)?,
        resolved_at: row.get(5)?,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("aura_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_store_{}_{name}.sqlite", std::process::id()))
    }

    fn note(content: &str, permanence: Permanence, expiry: Option<i64>) -> Note {
        Note {
            id: 0,
            content: content.to_string(),
            permanence,
            created_at: 1_000,
            expiry_date: expiry,
            context_id: None,
        }
    }

    #[test]
    fn test_permanence_invariant_enforced() {
        let path = temp_db_path("perm");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        let err = db
            .insert_note(&note("fleeting", Permanence::NonPermanent, None))
            .unwrap_err();
        assert!(err.contains("requires an expiry"));

        let err = db
            .insert_note(&note("forever", Permanence::Permanent, Some(9_999)))
            .unwrap_err();
        assert!(err.contains("must not carry"));

        assert!(db.insert_note(&note("ok", Permanence::Permanent, None)).is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_context_touch_and_finish_summary() {
        let path = temp_db_path("summary");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        let ctx = Context {
            id: "ctx-abc".into(),
            name: "Guitar".into(),
            summary: String::new(),
            state: ContextState::NeedsSummary,
            updated_at: 100,
        };
        db.insert_context(&ctx).unwrap();

        // Clean sweep: snapshot matches, state resets.
        let stable = db.finish_summary("ctx-abc", "practice log", 100, 200).unwrap();
        assert!(stable);
        let got = db.context_by_id("ctx-abc").unwrap();
        assert_eq!(got.state, ContextState::Stable);
        assert_eq!(got.summary, "practice log");

        // Mutation mid-summarization: snapshot stale, state survives.
        db.touch_context("ctx-abc", 300).unwrap();
        let stable = db.finish_summary("ctx-abc", "newer summary", 100, 400).unwrap();
        assert!(!stable);
        let got = db.context_by_id("ctx-abc").unwrap();
        assert_eq!(got.state, ContextState::NeedsSummary);
        // Summary text still lands; only the state reset is conditional.
        assert_eq!(got.summary, "newer summary");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_merge_reassigns_before_delete() {
        let path = temp_db_path("merge");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        for (id, name) in [("ctx-a", "Guitar"), ("ctx-b", "Music")] {
            db.insert_context(&Context {
                id: id.into(),
                name: name.into(),
                summary: String::new(),
                state: ContextState::Stable,
                updated_at: 1,
            })
            .unwrap();
        }
        let mut n = note("scales", Permanence::Permanent, None);
        n.context_id = Some("ctx-a".into());
        db.insert_note(&n).unwrap();

        let moved = db.merge_contexts("ctx-a", "ctx-b", 50).unwrap();
        assert_eq!(moved, 1);
        assert!(db.context_by_id("ctx-a").is_err());
        let items = db.items_for_context("ctx-b", 10).unwrap();
        assert_eq!(items, vec!["scales".to_string()]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_due_items_and_mark_reminded() {
        let path = temp_db_path("due");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        let task_id = db
            .insert_task(&Task {
                id: 0,
                content: "water plants".into(),
                due_date: Some(500),
                permanence: Permanence::NonPermanent,
                created_at: 100,
                completed: false,
                reminder_sent: false,
                expiry_date: Some(10_000),
                context_id: None,
            })
            .unwrap();
        db.insert_event(&Event {
            id: 0,
            title: "dentist".into(),
            start_time: 2_000,
            end_time: None,
            description: None,
            location: None,
            created_at: 100,
            reminder_sent: false,
            expiry_date: None,
            context_id: None,
        })
        .unwrap();

        let due = db.due_items(600).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, DueItemKind::Task);

        db.mark_reminded(DueItemKind::Task, task_id).unwrap();
        assert!(db.due_items(600).unwrap().is_empty());

        // Event becomes due once its start time passes.
        let due = db.due_items(2_500).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, DueItemKind::Event);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_purge_expired_spares_permanent() {
        let path = temp_db_path("purge");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        db.insert_note(&note("temp", Permanence::NonPermanent, Some(100))).unwrap();
        db.insert_note(&note("keep", Permanence::Permanent, None)).unwrap();

        let purged = db.purge_expired(200).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(db.counts().unwrap()[1], ("notes".to_string(), 1));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_conversation_resolution_is_terminal() {
        let path = temp_db_path("conv");
        let _ = std::fs::remove_file(&path);
        let db = Store::open_or_create(&path).unwrap();

        let conv = Conversation {
            id: "conv-1".into(),
            thread_token: "thread-42".into(),
            state: ConversationState::AwaitingReply,
            questions: vec![PendingQuestion {
                index: 0,
                text: "Delete the stale note?".into(),
            }],
            created_at: 10,
            resolved_at: None,
        };
        db.insert_conversation(&conv).unwrap();

        let got = db.conversation_by_token("thread-42").unwrap();
        assert_eq!(got.state, ConversationState::AwaitingReply);
        assert_eq!(got.questions.len(), 1);

        db.resolve_conversation("conv-1", 20).unwrap();
        let got = db.conversation_by_token("thread-42").unwrap();
        assert_eq!(got.state, ConversationState::Resolved);
        assert_eq!(got.resolved_at, Some(20));

        // Resolving again is a no-op; the row stays as first resolved.
        db.resolve_conversation("conv-1", 99).unwrap();
        let got = db.conversation_by_token("thread-42").unwrap();
        assert_eq!(got.resolved_at, Some(20));
        std::fs::remove_file(&path).ok();
    }
}
