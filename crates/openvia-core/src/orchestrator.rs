//! The agent orchestrator: one user turn, multiple LLM rounds.
//!
//! `run_turn` spawns the turn as its own task and returns a bounded
//! channel of [`AgentEvent`]s. Per turn the loop is:
//!
//! ```text
//! lock session -> append user message
//! for round in 1..=max_iterations:
//!     adapter.chat(history, tools, previous round's tool results)
//!     stream text deltas out as they arrive, collect tool calls
//!     no tool calls? -> persist assistant text, emit Done, stop
//!     per tool call (in provider order):
//!         policy.evaluate -> allow | deny | require approval
//!         approval -> emit ToolPending, await the permission callback
//!         execute / synthesize error result, emit ToolResult
//!     splice results into the next round
//! emit Error("Max iterations ... reached")
//! ```
//!
//! Tool calls within a round run sequentially in provider order; this
//! keeps policy ordering deterministic and avoids racing approval prompts
//! from the same turn. The session mutex is held for the whole turn, so
//! turns from the same user serialize while different users run in
//! parallel.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use openvia_llm::{ChatAdapter, ChatTurn};
use openvia_types::{
    AgentEvent, LlmEvent, Message, MessageContent, ToolResult, ToolResultRecord,
};

use crate::executor::{ExecContext, ExecRequest, ToolExecutor};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::registry::ToolRegistry;
use crate::session::SessionManager;

/// Event channel depth per turn.
const EVENT_BUFFER: usize = 64;

/// Asks the human for approval; wired to the permission bridge by the
/// gateway. Returning `false` denies the tool call.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    /// Present the prompt and await the user's decision.
    async fn request(&self, prompt: &str) -> bool;
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum LLM rounds per turn.
    pub max_iterations: u32,
    /// System prompt handed to the adapter each round.
    pub system_prompt: Option<String>,
    /// Root under which per-user working directories live.
    pub workspace_root: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
            workspace_root: std::env::temp_dir(),
        }
    }
}

/// One inbound user turn.
pub struct TurnRequest {
    /// The user's message (text or content blocks).
    pub content: MessageContent,
    /// Originating user.
    pub user_id: String,
    /// Originating chat.
    pub chat_id: String,
    /// Originating channel.
    pub channel_id: String,
    /// Approval callback; `None` denies every approval request.
    pub on_permission: Option<Arc<dyn PermissionCallback>>,
}

/// Drives the iterative tool-calling loop.
pub struct Orchestrator {
    adapter: Arc<dyn ChatAdapter>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    policy: Arc<PolicyEngine>,
    sessions: Arc<SessionManager>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        sessions: Arc<SessionManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            adapter,
            executor: ToolExecutor::new(registry.clone()),
            registry,
            policy,
            sessions,
            config,
        }
    }

    /// The session manager this orchestrator serves.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one turn as a background task; events stream out of the
    /// returned receiver. The stream is finite and ends with exactly one
    /// `Done` or `Error`.
    pub fn run_turn(self: &Arc<Self>, request: TurnRequest) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive_turn(request, tx).await;
        });
        rx
    }

    async fn drive_turn(&self, request: TurnRequest, tx: mpsc::Sender<AgentEvent>) {
        let session_arc = self
            .sessions
            .get_or_create(&request.user_id, &request.chat_id)
            .await;
        // Holding the session lock for the whole turn serializes turns
        // from the same user.
        let mut session = session_arc.lock().await;
        session.add_message(Message::user(request.content.clone()));

        let exec_ctx = ExecContext {
            user_id: request.user_id.clone(),
            chat_id: request.chat_id.clone(),
            work_dir: self.config.workspace_root.join(&request.user_id),
        };

        let mut accumulated = String::new();
        let mut last_results: Vec<ToolResultRecord> = Vec::new();
        let mut previous_response_id = session.provider_response_id.clone();
        let max_iterations = self.config.max_iterations.max(1);

        for round in 1..=max_iterations {
            let turn = ChatTurn {
                messages: session.history.clone(),
                tools: self.registry.schemas(),
                tool_results: std::mem::take(&mut last_results),
                system_prompt: self.config.system_prompt.clone(),
                previous_response_id: previous_response_id.clone(),
            };

            debug!(round, user = %request.user_id, "starting LLM round");

            let mut stream = match self.adapter.chat(turn).await {
                Ok(stream) => stream,
                Err(e) => {
                    emit(&tx, AgentEvent::Error {
                        message: format!("Transport: {e}"),
                    })
                    .await;
                    return;
                }
            };

            let mut pending_calls = Vec::new();
            let mut round_complete = false;

            while let Some(event) = stream.next().await {
                match event {
                    LlmEvent::TextDelta { content } => {
                        accumulated.push_str(&content);
                        if !emit(&tx, AgentEvent::TextDelta { content }).await {
                            return;
                        }
                    }
                    LlmEvent::ToolCall(call) => {
                        if !call.name.is_empty() {
                            pending_calls.push(call);
                        }
                    }
                    LlmEvent::ToolCallDelta { .. } => {
                        // Progress only; the terminal ToolCall carries the
                        // full arguments.
                    }
                    LlmEvent::Done { response_id, .. } => {
                        if response_id.is_some() {
                            previous_response_id = response_id;
                        }
                        round_complete = true;
                        break;
                    }
                    LlmEvent::Error { message } => {
                        emit(&tx, AgentEvent::Error {
                            message: format!("Transport: {message}"),
                        })
                        .await;
                        return;
                    }
                }
            }

            if !round_complete {
                emit(&tx, AgentEvent::Error {
                    message: "Transport: stream ended without completion".into(),
                })
                .await;
                return;
            }

            if pending_calls.is_empty() {
                session.provider_response_id = previous_response_id;
                if !accumulated.is_empty() {
                    session.add_message(Message::assistant(accumulated.clone()));
                }
                emit(&tx, AgentEvent::Done {
                    full_response: accumulated,
                })
                .await;
                return;
            }

            let mut records = Vec::with_capacity(pending_calls.len());
            for call in pending_calls {
                if !emit(&tx, AgentEvent::ToolStart {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                })
                .await
                {
                    return;
                }

                let result = if self.registry.get(&call.name).is_none() {
                    ToolResult::fail("tool not found")
                } else {
                    match self.policy.evaluate(&call.name, &call.args, &session) {
                        PolicyDecision::Allow => {
                            self.executor
                                .execute(ExecRequest {
                                    tool_name: call.name.clone(),
                                    args: call.args.clone(),
                                    ctx: exec_ctx.clone(),
                                })
                                .await
                        }
                        PolicyDecision::Deny { reason } => ToolResult::fail(reason),
                        PolicyDecision::RequireApproval { prompt } => {
                            if !emit(&tx, AgentEvent::ToolPending {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                args: call.args.clone(),
                                prompt: prompt.clone(),
                            })
                            .await
                            {
                                return;
                            }
                            let approved = match request.on_permission {
                                Some(ref callback) => callback.request(&prompt).await,
                                None => false,
                            };
                            if approved {
                                self.executor
                                    .execute(ExecRequest {
                                        tool_name: call.name.clone(),
                                        args: call.args.clone(),
                                        ctx: exec_ctx.clone(),
                                    })
                                    .await
                            } else {
                                ToolResult::fail("User denied permission")
                            }
                        }
                    }
                };

                if !emit(&tx, AgentEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                })
                .await
                {
                    return;
                }

                let content = serde_json::to_string(&result)
                    .unwrap_or_else(|_| String::from(r#"{"success":false}"#));
                records.push(ToolResultRecord {
                    tool_call_id: call.id,
                    tool_name: call.name,
                    tool_args: call.args,
                    tool_call_meta: call.meta,
                    content,
                    is_error: !result.success,
                });
            }
            last_results = records;
        }

        warn!(user = %request.user_id, max_iterations, "turn exhausted iteration budget");
        emit(&tx, AgentEvent::Error {
            message: format!("Max iterations ({max_iterations}) reached"),
        })
        .await;
    }
}

/// Send an event; returns `false` when the receiver is gone (the turn is
/// then abandoned).
async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionBridge, PermissionHandler};
    use crate::policy::PolicyEngine;
    use crate::registry::{FieldType, Tool, ToolError, ToolInputSchema};
    use futures_util::stream;
    use openvia_llm::{AdapterError, LlmEventStream};
    use openvia_types::{
        GatewayError, PermissionContext, PermissionDecision, PermissionRequest, Role, ToolCall,
    };
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Adapter scripted with one event list per round.
    struct ScriptedAdapter {
        rounds: StdMutex<VecDeque<Vec<LlmEvent>>>,
        /// When the script runs dry, replay this round forever.
        repeat: Option<Vec<LlmEvent>>,
        /// Message lists seen per round, for splice assertions.
        seen: StdMutex<Vec<ChatTurn>>,
    }

    impl ScriptedAdapter {
        fn new(rounds: Vec<Vec<LlmEvent>>) -> Self {
            Self {
                rounds: StdMutex::new(rounds.into()),
                repeat: None,
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn repeating(round: Vec<LlmEvent>) -> Self {
            Self {
                rounds: StdMutex::new(VecDeque::new()),
                repeat: Some(round),
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }
        fn max_context_tokens(&self) -> u32 {
            128_000
        }
        async fn chat(&self, turn: ChatTurn) -> Result<LlmEventStream, AdapterError> {
            self.seen.lock().unwrap().push(turn);
            let events = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .or_else(|| self.repeat.clone())
                .unwrap_or_else(|| {
                    vec![LlmEvent::Done {
                        usage: None,
                        response_id: None,
                    }]
                });
            Ok(Box::pin(stream::iter(events)))
        }
    }

    /// Adapter whose chat() fails outright.
    struct BrokenAdapter;

    #[async_trait]
    impl ChatAdapter for BrokenAdapter {
        fn name(&self) -> &str {
            "broken"
        }
        fn max_context_tokens(&self) -> u32 {
            0
        }
        async fn chat(&self, _turn: ChatTurn) -> Result<LlmEventStream, AdapterError> {
            Err(AdapterError::RequestFailed("connection refused".into()))
        }
    }

    struct ReadFileTool;

    #[async_trait]
    impl Tool for ReadFileTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "Read a file"
        }
        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::new().required("path", FieldType::String, "Path to read")
        }
        async fn execute(&self, _args: Value, _ctx: &ExecContext) -> Result<Value, ToolError> {
            Ok(json!({"content": "X"}))
        }
    }

    struct BashTool;

    #[async_trait]
    impl Tool for BashTool {
        fn name(&self) -> &str {
            "bash"
        }
        fn description(&self) -> &str {
            "Run a shell command"
        }
        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::new().required("command", FieldType::String, "Command to run")
        }
        async fn execute(&self, args: Value, _ctx: &ExecContext) -> Result<Value, ToolError> {
            Ok(json!({"stdout": format!("ran: {}", args["command"])}))
        }
    }

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "Does nothing"
        }
        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::new()
        }
        async fn execute(&self, _args: Value, _ctx: &ExecContext) -> Result<Value, ToolError> {
            Ok(json!({}))
        }
    }

    struct AlwaysAllow;

    #[async_trait]
    impl PermissionCallback for AlwaysAllow {
        async fn request(&self, _prompt: &str) -> bool {
            true
        }
    }

    struct AlwaysDeny;

    #[async_trait]
    impl PermissionCallback for AlwaysDeny {
        async fn request(&self, _prompt: &str) -> bool {
            false
        }
    }

    fn tool_call(id: &str, name: &str, args: Value) -> LlmEvent {
        LlmEvent::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            args,
            meta: None,
        })
    }

    fn done() -> LlmEvent {
        LlmEvent::Done {
            usage: None,
            response_id: None,
        }
    }

    fn build(
        adapter: Arc<dyn ChatAdapter>,
        tools: Vec<Arc<dyn Tool>>,
        max_iterations: u32,
    ) -> Arc<Orchestrator> {
        let mut registry = ToolRegistry::new();
        registry.register_all(tools);
        Arc::new(Orchestrator::new(
            adapter,
            Arc::new(registry),
            Arc::new(PolicyEngine::with_defaults()),
            Arc::new(SessionManager::new()),
            OrchestratorConfig {
                max_iterations,
                system_prompt: None,
                workspace_root: std::env::temp_dir(),
            },
        ))
    }

    fn turn(content: &str, permission: Option<Arc<dyn PermissionCallback>>) -> TurnRequest {
        TurnRequest {
            content: content.into(),
            user_id: "u1".into(),
            chat_id: "c1".into(),
            channel_id: "test".into(),
            on_permission: permission,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    // ── S1: pure reply ──────────────────────────────────────────────

    #[tokio::test]
    async fn pure_reply_streams_text_and_done() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![vec![
            LlmEvent::TextDelta {
                content: "hello".into(),
            },
            done(),
        ]]));
        let orchestrator = build(adapter, vec![], 10);

        let events = collect(orchestrator.run_turn(turn("hi", None))).await;
        assert_eq!(
            events,
            vec![
                AgentEvent::TextDelta {
                    content: "hello".into()
                },
                AgentEvent::Done {
                    full_response: "hello".into()
                },
            ]
        );

        // History grew by one user and one assistant message.
        let session = orchestrator.sessions().get_or_create("u1", "c1").await;
        let session = session.lock().await;
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[1].role, Role::Assistant);
        assert_eq!(session.history[1].content.as_text(), "hello");
    }

    // ── S2: read-only tool auto-allowed ─────────────────────────────

    #[tokio::test]
    async fn read_only_tool_runs_without_approval() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                tool_call("c1", "read_file", json!({"path": "a.txt"})),
                done(),
            ],
            vec![
                LlmEvent::TextDelta {
                    content: "file says X".into(),
                },
                done(),
            ],
        ]));
        let adapter_ref = adapter.clone();
        let orchestrator = build(adapter, vec![Arc::new(ReadFileTool)], 10);

        let events = collect(orchestrator.run_turn(turn("read a.txt", None))).await;

        assert!(matches!(&events[0], AgentEvent::ToolStart { id, .. } if id == "c1"));
        match &events[1] {
            AgentEvent::ToolResult { id, result, .. } => {
                assert_eq!(id, "c1");
                assert!(result.success);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, AgentEvent::ToolPending { .. })),
            "policy must never ask for read_file"
        );
        assert!(matches!(
            events.last().unwrap(),
            AgentEvent::Done { full_response } if full_response == "file says X"
        ));

        // The second round received the spliced tool result.
        let seen = adapter_ref.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].tool_results.len(), 1);
        assert_eq!(seen[1].tool_results[0].tool_call_id, "c1");
        assert!(!seen[1].tool_results[0].is_error);
        assert!(seen[1].tool_results[0].content.contains("X"));
    }

    // ── S3: confirm list triggers approval, user allows ─────────────

    #[tokio::test]
    async fn shell_confirm_approval_allowed() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                tool_call("c1", "bash", json!({"command": "rm -rf tmp"})),
                done(),
            ],
            vec![done()],
        ]));
        let orchestrator = build(adapter, vec![Arc::new(BashTool)], 10);

        let events = collect(
            orchestrator.run_turn(turn("clean up", Some(Arc::new(AlwaysAllow)))),
        )
        .await;

        assert!(matches!(&events[0], AgentEvent::ToolStart { .. }));
        match &events[1] {
            AgentEvent::ToolPending { prompt, .. } => {
                assert!(prompt.contains("Permission Request"), "got: {prompt}");
                assert!(prompt.contains("rm -rf tmp"), "got: {prompt}");
            }
            other => panic!("expected ToolPending, got {other:?}"),
        }
        match &events[2] {
            AgentEvent::ToolResult { result, .. } => assert!(result.success),
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    // ── S4: safe-pattern bypass ─────────────────────────────────────

    #[tokio::test]
    async fn safe_shell_command_bypasses_approval() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                tool_call("c1", "bash", json!({"command": "date '+%Y-%m-%d'"})),
                done(),
            ],
            vec![done()],
        ]));
        // No approval callback supplied: if the policy asked, the result
        // would be a denial.
        let orchestrator = build(adapter, vec![Arc::new(BashTool)], 10);

        let events = collect(orchestrator.run_turn(turn("what day is it", None))).await;

        assert!(
            !events
                .iter()
                .any(|e| matches!(e, AgentEvent::ToolPending { .. })),
            "safe pattern must not prompt"
        );
        match &events[1] {
            AgentEvent::ToolResult { result, .. } => assert!(result.success),
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    // ── S5: denied tool ─────────────────────────────────────────────

    #[tokio::test]
    async fn session_denied_tool_yields_error_result() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![tool_call("c1", "bash", json!({"command": "ls"})), done()],
            vec![
                LlmEvent::TextDelta {
                    content: "sorry, I cannot run that".into(),
                },
                done(),
            ],
        ]));
        let adapter_ref = adapter.clone();
        let orchestrator = build(adapter, vec![Arc::new(BashTool)], 10);

        // Mark bash denied before the turn runs.
        {
            let session = orchestrator.sessions().get_or_create("u1", "c1").await;
            session.lock().await.denied_tools.insert("bash".into());
        }

        let events = collect(orchestrator.run_turn(turn("list files", None))).await;

        match &events[1] {
            AgentEvent::ToolResult { result, .. } => {
                assert!(!result.success);
                assert!(result.error.as_ref().unwrap().contains("denied"));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
        // The error was spliced into the next round.
        let seen = adapter_ref.seen.lock().unwrap();
        assert!(seen[1].tool_results[0].is_error);
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    // ── S6: iteration cap ───────────────────────────────────────────

    #[tokio::test]
    async fn iteration_cap_bounds_the_turn() {
        let adapter = Arc::new(ScriptedAdapter::repeating(vec![
            tool_call("loop", "noop", json!({})),
            done(),
        ]));
        let orchestrator = build(adapter, vec![Arc::new(NoopTool)], 3);

        // noop is neither read-only nor shell; approve it every time so
        // the loop actually spins.
        let events = collect(
            orchestrator.run_turn(turn("loop forever", Some(Arc::new(AlwaysAllow)))),
        )
        .await;

        let starts = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolStart { .. }))
            .count();
        let results = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolResult { .. }))
            .count();
        assert_eq!(starts, 3);
        assert_eq!(results, 3);

        match events.last().unwrap() {
            AgentEvent::Error { message } => {
                assert!(message.contains("Max iterations (3)"), "got: {message}");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    // ── Terminal behavior ───────────────────────────────────────────

    #[tokio::test]
    async fn adapter_failure_is_terminal() {
        let orchestrator = build(Arc::new(BrokenAdapter), vec![], 10);
        let events = collect(orchestrator.run_turn(turn("hi", None))).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Error { message } => assert!(message.contains("Transport")),
            other => panic!("expected Error, got {other:?}"),
        }

        // The user message is retained; no assistant message was added.
        let session = orchestrator.sessions().get_or_create("u1", "c1").await;
        let session = session.lock().await;
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].role, Role::User);
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![vec![
            LlmEvent::TextDelta {
                content: "par".into(),
            },
            LlmEvent::Error {
                message: "boom".into(),
            },
        ]]));
        let orchestrator = build(adapter, vec![], 10);
        let events = collect(orchestrator.run_turn(turn("hi", None))).await;
        assert!(matches!(events.last().unwrap(), AgentEvent::Error { .. }));
        // Partial text streamed out but is not persisted.
        let session = orchestrator.sessions().get_or_create("u1", "c1").await;
        assert_eq!(session.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn last_event_is_always_terminal() {
        let scripts: Vec<Vec<Vec<LlmEvent>>> = vec![
            vec![vec![done()]],
            vec![vec![
                LlmEvent::TextDelta { content: "a".into() },
                done(),
            ]],
            vec![vec![LlmEvent::Error {
                message: "x".into(),
            }]],
        ];
        for rounds in scripts {
            let orchestrator = build(Arc::new(ScriptedAdapter::new(rounds)), vec![], 10);
            let events = collect(orchestrator.run_turn(turn("hi", None))).await;
            let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
            assert_eq!(terminal_count, 1);
            assert!(events.last().unwrap().is_terminal());
        }
    }

    #[tokio::test]
    async fn unknown_tool_recoverable() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![tool_call("c1", "ghost_tool", json!({})), done()],
            vec![
                LlmEvent::TextDelta {
                    content: "that tool does not exist".into(),
                },
                done(),
            ],
        ]));
        let orchestrator = build(adapter, vec![], 10);
        let events = collect(orchestrator.run_turn(turn("use ghost", None))).await;
        match &events[1] {
            AgentEvent::ToolResult { result, .. } => {
                assert_eq!(result.error.as_deref(), Some("tool not found"));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn denied_approval_yields_user_denied() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                tool_call("c1", "bash", json!({"command": "rm -rf tmp"})),
                done(),
            ],
            vec![done()],
        ]));
        let orchestrator = build(adapter, vec![Arc::new(BashTool)], 10);
        let events = collect(
            orchestrator.run_turn(turn("clean", Some(Arc::new(AlwaysDeny)))),
        )
        .await;
        match &events[2] {
            AgentEvent::ToolResult { result, .. } => {
                assert_eq!(result.error.as_deref(), Some("User denied permission"));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_permission_callback_denies() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                tool_call("c1", "bash", json!({"command": "sudo reboot"})),
                done(),
            ],
            vec![done()],
        ]));
        let orchestrator = build(adapter, vec![Arc::new(BashTool)], 10);
        let events = collect(orchestrator.run_turn(turn("reboot", None))).await;
        match &events[2] {
            AgentEvent::ToolResult { result, .. } => {
                assert_eq!(result.error.as_deref(), Some("User denied permission"));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    // ── S7: bridge correlation under concurrency ────────────────────

    /// Permission callback that routes through a shared bridge, as the
    /// gateway wires it in production.
    struct BridgeCallback {
        bridge: Arc<PermissionBridge>,
        context: PermissionContext,
    }

    #[async_trait]
    impl PermissionCallback for BridgeCallback {
        async fn request(&self, prompt: &str) -> bool {
            self.bridge
                .request(prompt, self.context.clone())
                .await
                .is_allowed()
        }
    }

    #[derive(Default)]
    struct CapturingHandler {
        requests: StdMutex<Vec<PermissionRequest>>,
    }

    #[async_trait]
    impl PermissionHandler for CapturingHandler {
        async fn deliver(&self, request: PermissionRequest) -> Result<(), GatewayError> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_approvals_do_not_cross_talk() {
        let bridge = Arc::new(PermissionBridge::new());
        let handler = Arc::new(CapturingHandler::default());
        bridge.register_handler(handler.clone()).await;

        let make_orchestrator = || {
            let adapter = Arc::new(ScriptedAdapter::new(vec![
                vec![
                    tool_call("c1", "bash", json!({"command": "rm -rf tmp"})),
                    done(),
                ],
                vec![done()],
            ]));
            build(adapter, vec![Arc::new(BashTool)], 10)
        };

        let o1 = make_orchestrator();
        let o2 = make_orchestrator();

        let cb = |user: &str| -> Arc<dyn PermissionCallback> {
            Arc::new(BridgeCallback {
                bridge: bridge.clone(),
                context: PermissionContext {
                    user_id: user.into(),
                    chat_id: format!("chat-{user}"),
                    channel_id: "test".into(),
                },
            })
        };

        let rx1 = o1.run_turn(TurnRequest {
            content: "clean".into(),
            user_id: "U1".into(),
            chat_id: "chat-U1".into(),
            channel_id: "test".into(),
            on_permission: Some(cb("U1")),
        });
        let rx2 = o2.run_turn(TurnRequest {
            content: "clean".into(),
            user_id: "U2".into(),
            chat_id: "chat-U2".into(),
            channel_id: "test".into(),
            on_permission: Some(cb("U2")),
        });

        let t1 = tokio::spawn(collect(rx1));
        let t2 = tokio::spawn(collect(rx2));

        // Wait until both prompts are delivered with distinct ids.
        let (id1, id2) = loop {
            let requests = handler.requests.lock().unwrap().clone();
            if requests.len() == 2 {
                let a = requests.iter().find(|r| r.context.user_id == "U1").unwrap();
                let b = requests.iter().find(|r| r.context.user_id == "U2").unwrap();
                break (a.id.clone(), b.id.clone());
            }
            drop(requests);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        assert_ne!(id1, id2);

        // Resolve U2 first with allow, then U1 with deny.
        bridge.resolve(&id2, PermissionDecision::Allow).await;
        bridge.resolve(&id1, PermissionDecision::Deny).await;

        let events1 = t1.await.unwrap();
        let events2 = t2.await.unwrap();

        let result1 = events1
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!result1.success, "U1 denied must not execute");
        assert_eq!(result1.error.as_deref(), Some("User denied permission"));

        let result2 = events2
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert!(result2.success, "U2 allowed must execute");
    }

    // ── Same-user serialization ─────────────────────────────────────

    #[tokio::test]
    async fn same_user_turns_serialize() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            vec![
                LlmEvent::TextDelta {
                    content: "first".into(),
                },
                done(),
            ],
            vec![
                LlmEvent::TextDelta {
                    content: "second".into(),
                },
                done(),
            ],
        ]));
        let orchestrator = build(adapter, vec![], 10);

        let rx1 = orchestrator.run_turn(turn("one", None));
        let rx2 = orchestrator.run_turn(turn("two", None));
        let events1 = collect(rx1).await;
        let events2 = collect(rx2).await;
        assert!(events1.last().unwrap().is_terminal());
        assert!(events2.last().unwrap().is_terminal());

        // Both turns persisted in order: 2 user + 2 assistant messages.
        let session = orchestrator.sessions().get_or_create("u1", "c1").await;
        let session = session.lock().await;
        assert_eq!(session.history.len(), 4);
    }
}
