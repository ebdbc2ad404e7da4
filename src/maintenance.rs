//! Maintenance orchestrator: interval jobs driven from the daemon loop.
//!
//!   sweep     re-summarize dirty contexts and refresh their vectors
//!   reminders send one notification per due task/event
//!   purge     delete expired non-permanent items
//!   audit     nightly deep-tier passes over batched data
//!
//! Jobs are explicit descriptors with their own clocks; the loop just asks
//! "what is due now" so a slow job delays nothing but itself. Summaries and
//! every audit pass go straight to the deep tier: they are batch work where
//! quality matters and latency does not.

use chrono::{TimeZone, Timelike, Utc};

use crate::conversation::Conversations;
use crate::gateway::Gateway;
use crate::oplog::{OpLog, OpLogEntry};
use crate::resolver::Resolver;
use crate::store::Store;
use crate::tool_args::{MergeContextsArgs, ScheduleFollowupArgs, parse_timestamp};
use crate::tool_schema;
use crate::transport::MessageTransport;
use crate::types::{CapabilityHint, CoreError, LlmRequest, Note, Permanence, Task, derive_id};

/// Thread token reminders go out on; bridges map it to the owner's channel.
const REMINDER_THREAD: &str = "reminders";

/// Cap on items fed into one summarization prompt.
const SWEEP_ITEM_CAP: usize = 50;

/// Cap on notes fed into one audit pass.
const AUDIT_NOTE_CAP: usize = 100;

const SUMMARIZE_INSTRUCTION: &str = "Summarize this topic's items into 2-4 sentences \
    capturing what the topic is about and its current open threads. Plain prose, no lists.";

const CONTRADICTION_INSTRUCTION: &str = "You audit a personal assistant's stored notes. \
    If two listed notes contradict each other, call ask_user with one question per \
    contradiction so the owner can say which note is right. If nothing contradicts, \
    reply with the word 'clean'.";

const STALENESS_INSTRUCTION: &str = "You audit a personal assistant's stored notes for \
    staleness. If a note looks obsolete, either call ask_user to confirm it can go, or \
    call schedule_followup_task to revisit it at a concrete later date. If everything \
    still looks current, reply with the word 'clean'.";

const SYNTHESIS_INSTRUCTION: &str = "You audit a personal assistant's topic contexts for \
    duplicates. If two listed contexts clearly cover the same real-world topic, call \
    merge_contexts once with the newer duplicate as from_id and the older canonical one \
    as into_id. If nothing overlaps, reply with the word 'clean'.";

#[derive(Debug)]
pub(crate) struct JobDescriptor {
    pub(crate) name: &'static str,
    pub(crate) interval_secs: i64,
    pub(crate) next_run: i64,
}

impl JobDescriptor {
    fn reschedule(&mut self, now: i64) {
        self.next_run = now + self.interval_secs;
    }
}

/// Epoch second of the next `hour`:00 UTC strictly after `now`.
pub(crate) fn next_daily_run(now: i64, hour: u32) -> i64 {
    let dt = Utc.timestamp_opt(now, 0).single().unwrap_or_else(Utc::now);
    let today = dt
        .with_hour(hour)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt);
    if today.timestamp() > now {
        today.timestamp()
    } else {
        today.timestamp() + 86_400
    }
}

pub(crate) struct MaintenanceOrchestrator<'a> {
    gateway: &'a Gateway,
    resolver: &'a Resolver,
    transport: &'a dyn MessageTransport,
    conversations: Conversations,
    oplog: OpLog,
    jobs: Vec<JobDescriptor>,
}

impl<'a> MaintenanceOrchestrator<'a> {
    pub(crate) fn new(
        gateway: &'a Gateway,
        resolver: &'a Resolver,
        transport: &'a dyn MessageTransport,
        oplog: OpLog,
        sweep_interval_secs: i64,
        audit_hour: u32,
        now: i64,
    ) -> Self {
        let jobs = vec![
            JobDescriptor {
                name: "sweep",
                interval_secs: sweep_interval_secs,
                next_run: now + sweep_interval_secs,
            },
            JobDescriptor {
                name: "reminders",
                interval_secs: 60,
                next_run: now + 60,
            },
            JobDescriptor {
                name: "purge",
                interval_secs: 3600,
                next_run: now + 3600,
            },
            JobDescriptor {
                name: "audit",
                interval_secs: 86_400,
                next_run: next_daily_run(now, audit_hour),
            },
        ];
        MaintenanceOrchestrator {
            gateway,
            resolver,
            transport,
            conversations: Conversations::new(oplog.clone()),
            oplog,
            jobs,
        }
    }

    pub(crate) fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    /// Run every job whose clock has come due. Job failures are logged and
    /// rescheduled; maintenance never takes the daemon down.
    pub(crate) fn run_due_jobs(&mut self, store: &Store, now: i64) {
        for i in 0..self.jobs.len() {
            if self.jobs[i].next_run > now {
                continue;
            }
            let name = self.jobs[i].name;
            let result = match name {
                "sweep" => self.run_sweep(store, now),
                "reminders" => self.run_reminders(store, now),
                "purge" => self.run_purge(store, now),
                "audit" => self.run_audit(store, now),
                _ => Ok(()),
            };
            match result {
                Ok(()) => self
                    .oplog
                    .append(OpLogEntry::new("maintenance", name, "ok")),
                Err(e) => self.oplog.append(
                    OpLogEntry::new("maintenance", name, "error").detail(e.to_string()),
                ),
            }
            self.jobs[i].reschedule(now);
        }
    }

    // ── Sweep ────────────────────────────────────────────────────────

    /// Re-summarize every dirty context on the deep tier. The snapshot of
    /// `updated_at` taken before the model call makes the stable-reset
    /// conditional: a context that received items mid-sweep stays dirty for
    /// the next pass.
    pub(crate) fn run_sweep(&self, store: &Store, now: i64) -> Result<(), CoreError> {
        let dirty = store.contexts_needing_summary().map_err(CoreError::Store)?;
        for ctx in dirty {
            let snapshot = ctx.updated_at;
            let items = store
                .items_for_context(&ctx.id, SWEEP_ITEM_CAP)
                .map_err(CoreError::Store)?;
            if items.is_empty() {
                continue;
            }
            let req = LlmRequest {
                instruction: SUMMARIZE_INSTRUCTION.to_string(),
                input: format!("Topic: {}\nItems:\n- {}", ctx.name, items.join("\n- ")),
                tools: Vec::new(),
                force_tool: None,
            };
            let summary = match self.gateway.complete(&req, CapabilityHint::DeepCloud) {
                Ok(reply) => match reply.text {
                    Some(text) => text,
                    None => continue,
                },
                // An unreachable tier must not starve the other contexts.
                Err(e) => {
                    self.oplog.append(
                        OpLogEntry::new("maintenance", "sweep_skip", "error")
                            .detail(format!("{}: {e}", ctx.id)),
                    );
                    continue;
                }
            };
            let stable = store
                .finish_summary(&ctx.id, &summary, snapshot, now)
                .map_err(CoreError::Store)?;
            if stable {
                let refreshed = store.context_by_id(&ctx.id).map_err(CoreError::Store)?;
                self.resolver.reindex(&refreshed)?;
            }
        }
        Ok(())
    }

    // ── Reminders ────────────────────────────────────────────────────

    pub(crate) fn run_reminders(&self, store: &Store, now: i64) -> Result<(), CoreError> {
        for item in store.due_items(now).map_err(CoreError::Store)? {
            let text = format!("Reminder: {}", item.content);
            self.transport.send(REMINDER_THREAD, &text)?;
            // Marked after the send lands in the outbox; a crash between
            // the two re-sends rather than silently dropping a reminder.
            store
                .mark_reminded(item.kind, item.id)
                .map_err(CoreError::Store)?;
        }
        Ok(())
    }

    // ── Purge ────────────────────────────────────────────────────────

    pub(crate) fn run_purge(&self, store: &Store, now: i64) -> Result<(), CoreError> {
        let purged = store.purge_expired(now).map_err(CoreError::Store)?;
        if purged > 0 {
            self.oplog.append(
                OpLogEntry::new("maintenance", "purged", "ok").detail(purged.to_string()),
            );
        }
        Ok(())
    }

    // ── Audit ────────────────────────────────────────────────────────

    /// Nightly chained deep-tier passes: contradiction detection and
    /// staleness analysis over batched notes, then duplicate-context
    /// synthesis. A pass that proposes questions opens a Conversation
    /// instead of writing anything itself.
    pub(crate) fn run_audit(&self, store: &Store, now: i64) -> Result<(), CoreError> {
        let notes = store.recent_notes(AUDIT_NOTE_CAP).map_err(CoreError::Store)?;
        if notes.len() >= 2 {
            self.audit_notes_pass(store, "contradictions", CONTRADICTION_INSTRUCTION, &notes)?;
        }
        if !notes.is_empty() {
            self.audit_notes_pass(store, "staleness", STALENESS_INSTRUCTION, &notes)?;
        }
        self.audit_synthesis_pass(store, now)?;
        Ok(())
    }

    fn audit_notes_pass(
        &self,
        store: &Store,
        pass: &str,
        instruction: &str,
        notes: &[Note],
    ) -> Result<(), CoreError> {
        let mut listing = String::from("Notes:\n");
        for note in notes {
            listing.push_str(&format!(
                "  #{} ({}) {}\n",
                note.id,
                note.permanence.as_str(),
                note.content
            ));
        }
        let tools: Vec<serde_json::Value> = tool_schema::all_for(CapabilityHint::DeepCloud)
            .into_iter()
            .filter(|t| t["name"] == "ask_user" || t["name"] == "schedule_followup_task")
            .collect();
        let req = LlmRequest {
            instruction: instruction.to_string(),
            input: listing,
            tools,
            force_tool: None,
        };
        let reply = self.gateway.complete(&req, CapabilityHint::DeepCloud)?;
        let Some(call) = reply.tool_calls.first() else {
            return Ok(());
        };
        match call.name.as_str() {
            "ask_user" => {
                let args: crate::tool_args::AskUserArgs = serde_json::from_value(call.args.clone())
                    .map_err(|e| CoreError::DispatchFailed {
                        tool: call.name.clone(),
                        reason: e.to_string(),
                    })?;
                self.propose_questions(store, pass, &args.questions)
            }
            "schedule_followup_task" => {
                let args: ScheduleFollowupArgs = serde_json::from_value(call.args.clone())
                    .map_err(|e| CoreError::DispatchFailed {
                        tool: call.name.clone(),
                        reason: e.to_string(),
                    })?;
                let due = parse_timestamp(&args.due_date).map_err(|reason| {
                    CoreError::DispatchFailed {
                        tool: call.name.clone(),
                        reason,
                    }
                })?;
                let id = store
                    .insert_task(&Task {
                        id: 0,
                        content: args.content,
                        due_date: Some(due),
                        permanence: Permanence::Permanent,
                        created_at: crate::tool_args::now_epoch(),
                        completed: false,
                        reminder_sent: false,
                        expiry_date: None,
                        context_id: None,
                    })
                    .map_err(CoreError::Store)?;
                self.oplog.append(
                    OpLogEntry::new("maintenance", "followup_scheduled", "ok")
                        .detail(format!("{pass}: task #{id}")),
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Open a conversation for audit questions and send them out. The
    /// thread token is derived from the question content alone, so the same
    /// proposal on a later night lands on the same token and is skipped
    /// while a prior conversation on it exists.
    fn propose_questions(
        &self,
        store: &Store,
        pass: &str,
        questions: &[String],
    ) -> Result<(), CoreError> {
        if questions.is_empty() {
            return Ok(());
        }
        let token = derive_id("audit", &questions.join("\n"), 0);
        if store.conversation_by_token(&token).is_some() {
            self.oplog.append(
                OpLogEntry::new("maintenance", "proposal_dedup", "ok").detail(token),
            );
            return Ok(());
        }
        self.conversations.open(store, &token, questions)?;
        self.transport.send(&token, &questions.join("\n"))?;
        self.oplog.append(
            OpLogEntry::new("maintenance", "proposal_sent", "ok")
                .detail(format!("{pass}: {} question(s)", questions.len())),
        );
        Ok(())
    }

    /// Duplicate-context pass. The deep tier sees every context and may
    /// order at most one merge per night; conservatism beats a bad merge.
    fn audit_synthesis_pass(&self, store: &Store, now: i64) -> Result<(), CoreError> {
        let contexts = store.list_contexts().map_err(CoreError::Store)?;
        if contexts.len() < 2 {
            return Ok(());
        }
        let mut listing = String::from("Contexts:\n");
        for ctx in &contexts {
            let summary = if ctx.summary.is_empty() { &ctx.name } else { &ctx.summary };
            listing.push_str(&format!("  id={} name={} summary={}\n", ctx.id, ctx.name, summary));
        }
        let req = LlmRequest {
            instruction: SYNTHESIS_INSTRUCTION.to_string(),
            input: listing,
            tools: vec![tool_schema::merge_tool()],
            force_tool: None,
        };
        let reply = self.gateway.complete(&req, CapabilityHint::DeepCloud)?;
        let Some(call) = reply.tool_calls.first() else {
            return Ok(());
        };
        if call.name != "merge_contexts" {
            return Ok(());
        }
        let args: MergeContextsArgs = serde_json::from_value(call.args.clone())
            .map_err(|e| CoreError::DispatchFailed {
                tool: call.name.clone(),
                reason: e.to_string(),
            })?;
        let known = |id: &str| contexts.iter().any(|c| c.id == id);
        if !known(&args.from_id) || !known(&args.into_id) || args.from_id == args.into_id {
            return Err(CoreError::DispatchFailed {
                tool: "merge_contexts".to_string(),
                reason: format!("invalid merge pair {} -> {}", args.from_id, args.into_id),
            });
        }
        let moved = store
            .merge_contexts(&args.from_id, &args.into_id, now)
            .map_err(CoreError::Store)?;
        self.resolver.forget(&args.from_id)?;
        self.oplog.append(
            OpLogEntry::new("maintenance", "merged", "ok")
                .detail(format!("{} -> {} ({moved} items)", args.from_id, args.into_id)),
        );
        Ok(())
    }
}
