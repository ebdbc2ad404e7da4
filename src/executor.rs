//! Request chain executor. Every inbound message walks the same machine:
//!
//!   Classify → ResolveContext → Decide → Dispatch → Done
//!                                                 ↘ Failed
//!
//! Classify runs as a forced tool call on the fast local tier. The context
//! decision runs on the deep tier with the resolver's ranked shortlist.
//! Dispatch validates tool arguments before a single row is written; a
//! rejected call fails the chain rather than half-applying it.

use crate::conversation::{Conversations, ReplyDisposition};
use crate::gateway::Gateway;
use crate::oplog::{OpLog, OpLogEntry};
use crate::resolver::Resolver;
use crate::store::Store;
use crate::tool_args::{
    AskUserArgs, AssignContextArgs, CreateContextArgs, CreateEventArgs, CreateTaskArgs,
    DeleteNoteArgs, ScheduleFollowupArgs, StoreNoteArgs, now_epoch, parse_timestamp,
};
use crate::tool_schema;
use crate::types::{
    CapabilityHint, Classification, CoreError, Event, LlmReply, LlmRequest, Note, Permanence,
    RequestKind, Task, ToolCall,
};

/// Fallback lifetime for non-permanent items whose classification omitted
/// an expiry: 30 days.
const DEFAULT_EXPIRY_SECS: i64 = 30 * 24 * 3600;

const CLASSIFY_INSTRUCTION: &str = "You triage requests for a personal assistant. \
    Classify the user's message: what kind of item it is, whether it belongs to an \
    ongoing topic, and whether the information is permanent. Use the tool; do not reply in prose.";

const DECIDE_INSTRUCTION: &str = "You assign a request to the user's topic contexts. \
    Candidates are listed best-match first with ids, summaries and similarity scores. \
    Call assign_context with a listed id if one genuinely covers this topic, otherwise \
    call create_context with a short new topic name.";

const ACTION_INSTRUCTION: &str = "Extract the structured item from the user's message \
    and record it with the tool. Dates must be RFC 3339. Invent nothing the user did not say.";

const CONVERSE_INSTRUCTION: &str = "You are a personal assistant handling a request that \
    stores nothing new. You may delete a note by id, ask the user clarifying questions, \
    or just answer in prose.";

const RECONCILE_INSTRUCTION: &str = "You asked the user the listed questions and they \
    replied. Turn the reply into the tool calls it authorizes, pairing each answer to \
    its question by number. Emit no tool call for anything the reply does not clearly \
    authorize; reply in prose if nothing is authorized.";

const HUMANIZE_INSTRUCTION: &str = "Rewrite this system confirmation as one short, \
    friendly sentence to the user. Keep every concrete fact.";

/// What the executor wants sent back on the thread, if anything.
#[derive(Debug)]
pub(crate) enum Outcome {
    Reply(String),
    Ignored,
}

pub(crate) struct Executor {
    gateway: Gateway,
    resolver: Resolver,
    conversations: Conversations,
    oplog: OpLog,
}

impl Executor {
    pub(crate) fn new(
        gateway: Gateway,
        resolver: Resolver,
        conversations: Conversations,
        oplog: OpLog,
    ) -> Self {
        Executor {
            gateway,
            resolver,
            conversations,
            oplog,
        }
    }

    fn mark(&self, state: &str) {
        self.oplog
            .append(OpLogEntry::new("executor", "state", "ok").detail(state));
    }

    /// Entry point for one inbound message.
    pub(crate) fn handle_message(
        &self,
        store: &Store,
        thread_token: &str,
        text: &str,
    ) -> Result<Outcome, CoreError> {
        match self.conversations.on_inbound(store, thread_token)? {
            ReplyDisposition::ReplayIgnored => Ok(Outcome::Ignored),
            ReplyDisposition::NewRequest => {
                let result = self.run_chain(store, thread_token, text);
                if result.is_err() {
                    self.mark("failed");
                }
                result
            }
            ReplyDisposition::Reply(conv) => {
                let result = self.run_reply(store, &conv, text);
                if result.is_err() {
                    self.mark("failed");
                }
                result
            }
        }
    }

    fn run_chain(
        &self,
        store: &Store,
        thread_token: &str,
        text: &str,
    ) -> Result<Outcome, CoreError> {
        self.mark("classify");
        let classification = self.classify(text)?;

        if classification.kind == RequestKind::Other {
            return self.run_converse(store, thread_token, text);
        }

        let context_id = if classification.context_sensitive {
            self.mark("resolve_context");
            let candidates = self.resolver.resolve(text)?;

            self.mark("decide");
            Some(self.decide(store, text, &candidates)?)
        } else {
            None
        };

        self.mark("dispatch");
        let technical = self.dispatch_item(store, text, &classification, context_id.as_deref())?;
        if let Some(id) = &context_id {
            store.touch_context(id, now_epoch()).map_err(CoreError::Store)?;
        }

        self.mark("done");
        Ok(Outcome::Reply(self.humanize(&technical)))
    }

    // ── Classify ─────────────────────────────────────────────────────

    fn classify(&self, text: &str) -> Result<Classification, CoreError> {
        let req = LlmRequest {
            instruction: CLASSIFY_INSTRUCTION.to_string(),
            input: text.to_string(),
            tools: vec![tool_schema::classify_tool()],
            force_tool: Some("classify_request".to_string()),
        };
        self.gateway
            .complete_validated(&req, CapabilityHint::FastLocal, |reply| {
                let call = expect_tool(reply, "classify_request")?;
                serde_json::from_value::<Classification>(call.args.clone())
                    .map_err(|e| format!("classify args: {e}"))
            })
    }

    // ── Decide ───────────────────────────────────────────────────────

    fn decide(
        &self,
        store: &Store,
        text: &str,
        candidates: &[crate::types::CandidateMatch],
    ) -> Result<String, CoreError> {
        let mut block = String::from("Candidate contexts (best first):\n");
        if candidates.is_empty() {
            block.push_str("  (none)\n");
        }
        for c in candidates {
            block.push_str(&format!(
                "  id={} score={:.3} summary={}\n",
                c.context_id, c.score, c.summary
            ));
        }
        let req = LlmRequest {
            instruction: DECIDE_INSTRUCTION.to_string(),
            input: format!("{block}\nRequest: {text}"),
            tools: tool_schema::decide_tools(),
            force_tool: None,
        };
        let allowed: Vec<&str> = candidates.iter().map(|c| c.context_id.as_str()).collect();
        let decision = self
            .gateway
            .complete_validated(&req, CapabilityHint::DeepCloud, |reply| {
                let call = reply
                    .tool_calls
                    .first()
                    .ok_or_else(|| "expected assign_context or create_context".to_string())?;
                match call.name.as_str() {
                    "assign_context" => {
                        let args: AssignContextArgs = serde_json::from_value(call.args.clone())
                            .map_err(|e| format!("assign_context args: {e}"))?;
                        if !allowed.contains(&args.context_id.as_str()) {
                            return Err(format!(
                                "context_id '{}' is not a listed candidate",
                                args.context_id
                            ));
                        }
                        Ok(Decision::Assign(args.context_id))
                    }
                    "create_context" => {
                        let args: CreateContextArgs = serde_json::from_value(call.args.clone())
                            .map_err(|e| format!("create_context args: {e}"))?;
                        if args.name.trim().is_empty() {
                            return Err("create_context needs a non-empty name".to_string());
                        }
                        Ok(Decision::Create(args.name))
                    }
                    other => Err(format!("unexpected tool '{other}'")),
                }
            })?;
        match decision {
            Decision::Assign(id) => Ok(id),
            Decision::Create(name) => {
                let ctx = self.resolver.create_context(store, &name, text)?;
                Ok(ctx.id)
            }
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn dispatch_item(
        &self,
        store: &Store,
        text: &str,
        classification: &Classification,
        context_id: Option<&str>,
    ) -> Result<String, CoreError> {
        let tool_name = match classification.kind {
            RequestKind::Task => "create_task",
            RequestKind::Note => "store_note",
            RequestKind::Event => "create_event",
            RequestKind::Other => unreachable!("Other is handled by run_converse"),
        };
        let tools: Vec<serde_json::Value> = tool_schema::action_tools()
            .into_iter()
            .filter(|t| t["name"] == tool_name)
            .collect();
        let req = LlmRequest {
            instruction: ACTION_INSTRUCTION.to_string(),
            input: text.to_string(),
            tools,
            force_tool: Some(tool_name.to_string()),
        };
        let call = self
            .gateway
            .complete_validated(&req, CapabilityHint::FastLocal, |reply| {
                expect_tool(reply, tool_name).cloned()
            })?;
        self.apply_call(store, &call, classification, context_id)
    }

    fn expiry_epoch(&self, classification: &Classification) -> Result<Option<i64>, CoreError> {
        match classification.permanence {
            Permanence::Permanent => Ok(None),
            Permanence::NonPermanent => match &classification.expiry {
                Some(raw) => parse_timestamp(raw)
                    .map(Some)
                    .map_err(|reason| CoreError::DispatchFailed {
                        tool: "classify_request".to_string(),
                        reason,
                    }),
                None => {
                    self.oplog.append(
                        OpLogEntry::new("executor", "default_expiry", "ok")
                            .detail("classification omitted expiry; defaulting to 30 days"),
                    );
                    Ok(Some(now_epoch() + DEFAULT_EXPIRY_SECS))
                }
            },
        }
    }

    /// Validate one tool call's arguments and write the row. All store
    /// writes of the chain funnel through here.
    fn apply_call(
        &self,
        store: &Store,
        call: &ToolCall,
        classification: &Classification,
        context_id: Option<&str>,
    ) -> Result<String, CoreError> {
        let fail = |reason: String| CoreError::DispatchFailed {
            tool: call.name.clone(),
            reason,
        };
        if tool_schema::get(&call.name).is_none() {
            return Err(fail(format!("tool '{}' is not in the registry", call.name)));
        }
        let now = now_epoch();
        let expiry = self.expiry_epoch(classification)?;
        match call.name.as_str() {
            "create_task" => {
                let args: CreateTaskArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                let due_date = args
                    .due_date
                    .as_deref()
                    .map(parse_timestamp)
                    .transpose()
                    .map_err(fail)?;
                let id = store
                    .insert_task(&Task {
                        id: 0,
                        content: args.content.clone(),
                        due_date,
                        permanence: classification.permanence,
                        created_at: now,
                        completed: false,
                        reminder_sent: false,
                        expiry_date: expiry,
                        context_id: context_id.map(String::from),
                    })
                    .map_err(fail)?;
                Ok(format!("Created task #{id}: {}", args.content))
            }
            "store_note" => {
                let args: StoreNoteArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                let id = store
                    .insert_note(&Note {
                        id: 0,
                        content: args.content.clone(),
                        permanence: classification.permanence,
                        created_at: now,
                        expiry_date: expiry,
                        context_id: context_id.map(String::from),
                    })
                    .map_err(fail)?;
                Ok(format!("Stored note #{id}: {}", args.content))
            }
            "create_event" => {
                let args: CreateEventArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                let start_time = parse_timestamp(&args.start_time).map_err(fail)?;
                let end_time = args
                    .end_time
                    .as_deref()
                    .map(parse_timestamp)
                    .transpose()
                    .map_err(fail)?;
                let id = store
                    .insert_event(&Event {
                        id: 0,
                        title: args.title.clone(),
                        start_time,
                        end_time,
                        description: args.description.clone(),
                        location: args.location.clone(),
                        created_at: now,
                        reminder_sent: false,
                        expiry_date: expiry,
                        context_id: context_id.map(String::from),
                    })
                    .map_err(fail)?;
                Ok(format!("Created event #{id}: {}", args.title))
            }
            other => Err(fail(format!("no dispatcher for tool '{other}'"))),
        }
    }

    // ── Reply reconciliation ─────────────────────────────────────────

    /// Turn a reply to pending questions into a tool-call sequence on the
    /// deep tier, dispatch it, and resolve the conversation only once every
    /// call landed. A partial failure leaves the conversation open with its
    /// questions intact and sends a corrective follow-up instead of
    /// silently dropping intent.
    fn run_reply(
        &self,
        store: &Store,
        conv: &crate::types::Conversation,
        text: &str,
    ) -> Result<Outcome, CoreError> {
        self.mark("dispatch");
        let mut framed = String::from("Questions you asked:\n");
        for q in &conv.questions {
            framed.push_str(&format!("  {}. {}\n", q.index + 1, q.text));
        }
        framed.push_str(&format!("User reply: {text}"));

        let tools: Vec<serde_json::Value> = tool_schema::all_for(CapabilityHint::DeepCloud)
            .into_iter()
            .filter(|t| t["name"] != "ask_user" && t["name"] != "merge_contexts")
            .collect();
        let req = LlmRequest {
            instruction: RECONCILE_INSTRUCTION.to_string(),
            input: framed,
            tools,
            force_tool: None,
        };
        let reply = self.gateway.complete(&req, CapabilityHint::DeepCloud)?;

        if reply.tool_calls.is_empty() {
            // Nothing authorized; the exchange is complete.
            self.conversations.resolve(store, &conv.id)?;
            self.mark("done");
            return Ok(Outcome::Reply(
                reply.text.unwrap_or_else(|| "Okay, leaving everything as is.".to_string()),
            ));
        }

        let mut confirmations = Vec::new();
        for call in &reply.tool_calls {
            match self.apply_reply_call(store, call) {
                Ok(confirmation) => confirmations.push(confirmation),
                Err(e) => {
                    // Conversation stays awaiting_reply; questions retained.
                    self.oplog.append(
                        OpLogEntry::new("executor", "reply_dispatch", "error")
                            .detail(e.to_string()),
                    );
                    self.mark("failed");
                    return Ok(Outcome::Reply(format!(
                        "I couldn't finish acting on your reply ({e}). \
                         Could you answer again?"
                    )));
                }
            }
        }
        self.conversations.resolve(store, &conv.id)?;
        self.mark("done");
        Ok(Outcome::Reply(self.humanize(&confirmations.join(" "))))
    }

    /// Dispatch one reconciled tool call. Items created from replies have
    /// no classification pass behind them; they default to permanent.
    fn apply_reply_call(&self, store: &Store, call: &ToolCall) -> Result<String, CoreError> {
        let fail = |reason: String| CoreError::DispatchFailed {
            tool: call.name.clone(),
            reason,
        };
        match call.name.as_str() {
            "delete_note" => {
                let args: DeleteNoteArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                if store.delete_note(args.note_id).map_err(fail)? {
                    Ok(format!("Deleted note #{}.", args.note_id))
                } else {
                    Err(CoreError::DispatchFailed {
                        tool: call.name.clone(),
                        reason: format!("note #{} does not exist", args.note_id),
                    })
                }
            }
            "schedule_followup_task" => {
                let args: ScheduleFollowupArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                let due = parse_timestamp(&args.due_date).map_err(fail)?;
                let id = store
                    .insert_task(&Task {
                        id: 0,
                        content: args.content.clone(),
                        due_date: Some(due),
                        permanence: Permanence::Permanent,
                        created_at: now_epoch(),
                        completed: false,
                        reminder_sent: false,
                        expiry_date: None,
                        context_id: None,
                    })
                    .map_err(fail)?;
                Ok(format!("Scheduled follow-up #{id}: {}.", args.content))
            }
            "create_task" | "store_note" | "create_event" => {
                let defaults = Classification {
                    kind: RequestKind::Other,
                    context_sensitive: false,
                    permanence: Permanence::Permanent,
                    expiry: None,
                };
                self.apply_call(store, call, &defaults, None)
            }
            other => Err(fail(format!("no dispatcher for tool '{other}'"))),
        }
    }

    // ── Conversational path ──────────────────────────────────────────

    /// Requests that store nothing: answer in prose, delete a note, or
    /// open a conversation with clarifying questions.
    fn run_converse(
        &self,
        store: &Store,
        thread_token: &str,
        text: &str,
    ) -> Result<Outcome, CoreError> {
        self.mark("dispatch");
        let tools: Vec<serde_json::Value> = tool_schema::action_tools()
            .into_iter()
            .filter(|t| t["name"] == "delete_note" || t["name"] == "ask_user")
            .collect();
        let req = LlmRequest {
            instruction: CONVERSE_INSTRUCTION.to_string(),
            input: text.to_string(),
            tools,
            force_tool: None,
        };
        let reply = self.gateway.complete(&req, CapabilityHint::FastLocal)?;

        if let Some(call) = reply.tool_calls.first() {
            let fail = |reason: String| CoreError::DispatchFailed {
                tool: call.name.clone(),
                reason,
            };
            match call.name.as_str() {
                "delete_note" => {
                    let args: DeleteNoteArgs =
                        serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                    let existed = store.delete_note(args.note_id).map_err(fail)?;
                    self.mark("done");
                    let technical = if existed {
                        format!("Deleted note #{}", args.note_id)
                    } else {
                        format!("Note #{} does not exist", args.note_id)
                    };
                    return Ok(Outcome::Reply(self.humanize(&technical)));
                }
                "ask_user" => {
                    let args: AskUserArgs =
                        serde_json::from_value(call.args.clone()).map_err(|e| fail(e.to_string()))?;
                    if args.questions.is_empty() {
                        return Err(fail("ask_user needs at least one question".to_string()));
                    }
                    self.conversations.open(store, thread_token, &args.questions)?;
                    self.mark("done");
                    return Ok(Outcome::Reply(args.questions.join("\n")));
                }
                other => return Err(fail(format!("no dispatcher for tool '{other}'"))),
            }
        }

        self.mark("done");
        Ok(Outcome::Reply(reply.text.unwrap_or_else(|| "Done.".to_string())))
    }

    // ── Confirmation ─────────────────────────────────────────────────

    /// Soften a technical confirmation via the fast tier. Failure falls
    /// back to the technical text; confirmations must never fail a chain
    /// whose write already landed.
    fn humanize(&self, technical: &str) -> String {
        let req = LlmRequest {
            instruction: HUMANIZE_INSTRUCTION.to_string(),
            input: technical.to_string(),
            tools: Vec::new(),
            force_tool: None,
        };
        match self.gateway.complete(&req, CapabilityHint::FastLocal) {
            Ok(reply) => reply.text.unwrap_or_else(|| technical.to_string()),
            Err(_) => technical.to_string(),
        }
    }
}

enum Decision {
    Assign(String),
    Create(String),
}

fn expect_tool<'a>(reply: &'a LlmReply, name: &str) -> Result<&'a ToolCall, String> {
    let call = reply
        .tool_calls
        .first()
        .ok_or_else(|| format!("expected a '{name}' tool call"))?;
    if call.name != name {
        return Err(format!("expected '{name}', got '{}'", call.name));
    }
    Ok(call)
}
