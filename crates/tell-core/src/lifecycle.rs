// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Tell Lifecycle state machine (§4.8): drives a plan through
//! context-assembly, a streamed model call, tool dispatch, and the
//! auto-continue loop, bounded by a fixed iteration ceiling.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tell_config::{ModelPack, Role, TellSettings};
use tell_model::{sanitize, CompletionRequest, Message, ModelProvider, ToolSchema};
use tell_tools::{ToolExecutor, ToolValue};
use tracing::{debug, warn};

use crate::assembler::ContextAssembler;
use crate::errors::TellError;
use crate::events::TellEvent;
use crate::plan::{Plan, PlanSettings, Stage};
use crate::reply_effects::{apply_subtask_updates, detect_auto_load_paths};
use crate::retry::{RetryOutcome, RetryState};
use crate::stream::drain_stream;
use crate::vectorstore::VectorStoreClient;

/// Auto-continues per Tell are bounded by this fixed ceiling. Not a config
/// field: deliberately fixed, never tunable per deployment.
pub const ITERATION_CEILING: u32 = 200;

/// Cooperative cancellation flag checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Confirmation gate for newly-detected auto-load paths (§5). The lifecycle
/// emits `TellEvent::AutoLoadPending` and then waits on this gate, bounded
/// by `TellSettings::client_confirm_deadline`, before the paths are added
/// to the plan's active set. A lifecycle run with no gate attached (e.g. a
/// headless embedding with no client to confirm against) proceeds without
/// waiting.
#[derive(Debug, Clone)]
pub struct AutoLoadConfirmation(Arc<tokio::sync::Notify>);

impl AutoLoadConfirmation {
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    /// Release a lifecycle run that is blocked waiting on this gate.
    pub fn confirm(&self) {
        self.0.notify_one();
    }

    async fn wait(&self) {
        self.0.notified().await;
    }
}

impl Default for AutoLoadConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TellStatus {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TellOutcome {
    pub status: TellStatus,
    pub final_stage: Stage,
    pub iterations: u32,
}

/// Resolve the current stage from plan state (§4.8 S0). No subtasks yet and
/// no gathered context → still gathering context. Context gathered but no
/// subtasks yet → breaking the request into tasks. Subtasks exist → driving
/// them to completion.
fn resolve_stage(plan: &Plan) -> Stage {
    if plan.subtasks.is_empty() {
        if plan.context_parts.is_empty() {
            Stage::PlanningContext
        } else {
            Stage::PlanningTasks
        }
    } else {
        Stage::Implementation
    }
}

fn tool_schemas(settings: &PlanSettings) -> Vec<ToolSchema> {
    settings
        .tools
        .list()
        .iter()
        .map(|def| ToolSchema { name: def.name.clone(), description: def.description.clone(), parameters: def.input_schema.clone().unwrap_or(serde_json::json!({})) })
        .collect()
}

fn emit(sink: Option<&tokio::sync::mpsc::UnboundedSender<TellEvent>>, event: TellEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

/// Drive one Tell to completion: the auto-continue loop across S0-S7.
pub struct TellLifecycle<'a> {
    pub provider: &'a dyn ModelProvider,
    pub vector_store: &'a dyn VectorStoreClient,
    pub executor: &'a ToolExecutor,
    pub model_pack: &'a ModelPack,
    pub tell_settings: &'a TellSettings,
    pub cancel: CancellationToken,
    pub events: Option<tokio::sync::mpsc::UnboundedSender<TellEvent>>,
    /// Gate awaited before newly auto-loaded paths take effect. `None`
    /// means no client is attached to confirm against, so detected paths
    /// are activated immediately.
    pub confirm: Option<AutoLoadConfirmation>,
}

impl<'a> TellLifecycle<'a> {
    /// Await confirmation for `paths`, bounded by the configured deadline.
    /// Returns a terminal error on timeout (§5); a no-op if no gate is
    /// attached.
    async fn confirm_auto_load(&self, paths: &[String]) -> Result<(), TellError> {
        let Some(gate) = &self.confirm else { return Ok(()) };
        emit(self.events.as_ref(), TellEvent::AutoLoadPending { paths: paths.to_vec() });
        tokio::time::timeout(self.tell_settings.client_confirm_deadline(), gate.wait())
            .await
            .map_err(|_| TellError::ResourceExhausted(format!("client confirmation deadline exceeded for auto-loaded paths: {paths:?}")))
    }

    pub async fn run(&self, plan: &mut Plan, settings: &PlanSettings, rag_query_embedding: Option<&[f32]>, user_prompt: &str) -> Result<TellOutcome, TellError> {
        let mut retry_state = RetryState::default();
        let mut iteration: u32 = 0;
        let mut stage = resolve_stage(plan);

        plan.messages.push(Message::user(user_prompt));

        loop {
            if self.cancel.is_cancelled() {
                return Ok(TellOutcome { status: TellStatus::Cancelled, final_stage: stage, iterations: iteration });
            }

            iteration += 1;
            if iteration > ITERATION_CEILING {
                return Err(TellError::ResourceExhausted(format!("iteration ceiling ({ITERATION_CEILING}) exceeded")));
            }

            stage = resolve_stage(plan);
            let role = stage.role();
            debug!(plan_id = %plan.id, iteration, ?stage, ?role, "tell: turn boundary");
            let role_cfg = self.model_pack.role(role).ok_or_else(|| TellError::NotFound(format!("no model config for role {role:?}")))?;

            // S1: budget probe without attached context.
            let probe_tokens: usize = plan.messages.iter().map(|m| m.approx_tokens()).sum();
            let effective_max = role_cfg.effective_max_tokens(probe_tokens as u32).ok_or_else(|| TellError::InternalInvariantBreach("role has no model variants".into()))?;
            if probe_tokens as u32 > effective_max {
                return Err(TellError::ResourceExhausted("token budget exceeded before conversation".into()));
            }

            // S2: assemble system prompt + context.
            let tool_names: Vec<String> = settings.tools.list().iter().map(|t| t.name.clone()).collect();
            let prompt_ctx = crate::prompts::PromptContext { append: None, tool_names: &tool_names };
            let system_text = crate::prompts::system_prompt(stage, &prompt_ctx);

            if self.cancel.is_cancelled() {
                return Ok(TellOutcome { status: TellStatus::Cancelled, final_stage: stage, iterations: iteration });
            }
            let assembly_req = plan.default_assembly_request(stage);
            let assembled = ContextAssembler::assemble(plan, &assembly_req, &settings.rag, self.vector_store, rag_query_embedding)
                .await
                .map_err(|e| TellError::UpstreamFailure(e.to_string()))?;

            let mut system_parts = vec![tell_model::ContentPart::text(system_text)];
            system_parts.extend(assembled.parts);
            let system_message = Message::system_with_parts(system_parts);

            // S3: compose + sanitize.
            let mut messages = vec![system_message];
            messages.extend(plan.messages.clone());
            let modalities = self.provider.input_modalities();
            messages = sanitize::strip_images_if_unsupported(messages, &modalities);
            messages = sanitize::strip_cache_control_if_unsupported(messages, self.provider.supports_cache_control());

            let request = CompletionRequest { messages, tools: tool_schemas(settings), stream: true, system_dynamic_suffix: None };

            // S4: call model.
            let request_started_at = Instant::now();
            let stream_result = self.provider.complete(request).await;
            let outcome = match stream_result {
                Ok(response_stream) => drain_stream(response_stream, request_started_at).await,
                Err(e) => Err(e),
            };

            let outcome = match outcome {
                Ok(o) => o,
                Err(e) => {
                    warn!(plan_id = %plan.id, iteration, "tell: model stream error: {e}");
                    emit(self.events.as_ref(), TellEvent::Error(e.to_string()));
                    match retry_state.on_failure(role_cfg, self.tell_settings, tell_config::ErrorKind::StreamError) {
                        RetryOutcome::RetrySame => {
                            debug!(plan_id = %plan.id, num_error_retry = retry_state.num_error_retry, "tell: retrying with same model");
                            continue;
                        }
                        RetryOutcome::RetryWith(replacement) => {
                            debug!(plan_id = %plan.id, num_fallback_retry = retry_state.num_fallback_retry, replacement = %replacement.name, "tell: falling back to replacement model");
                            continue;
                        }
                        RetryOutcome::Terminal(err) => return Err(err),
                    }
                }
            };

            for warning in &outcome.recoverable_errors {
                emit(self.events.as_ref(), TellEvent::Error(warning.clone()));
            }
            emit(
                self.events.as_ref(),
                TellEvent::TokenUsage {
                    input: outcome.usage.input_tokens,
                    output: outcome.usage.output_tokens,
                    context_total: probe_tokens,
                    cache_read: outcome.usage.cache_read_tokens,
                    cache_write: outcome.usage.cache_write_tokens,
                },
            );

            // S5: parse the reply for a tool invocation.
            let parsed = tell_tools::try_parse(&outcome.current_reply_content, &settings.tools).map_err(|e| TellError::InternalInvariantBreach(e.to_string()))?;

            if parsed.is_tool_call && parsed.validation_error.is_none() {
                let Some(def) = parsed.matched.clone() else {
                    plan.messages.push(Message::assistant(outcome.current_reply_content.clone()));
                    emit(self.events.as_ref(), TellEvent::TextComplete(outcome.current_reply_content));
                    continue;
                };
                let request = parsed.request.clone().expect("tool call without request");
                let call_id = uuid::Uuid::new_v4().to_string();
                emit(self.events.as_ref(), TellEvent::ToolCallStarted { call_id: call_id.clone(), request: request.clone() });

                if self.cancel.is_cancelled() {
                    return Ok(TellOutcome { status: TellStatus::Cancelled, final_stage: stage, iterations: iteration });
                }

                let inputs: HashMap<String, ToolValue> = match &request.tool_input {
                    serde_json::Value::Object(_) | serde_json::Value::Null => serde_json::from_value(request.tool_input.clone()).unwrap_or_default(),
                    _ => HashMap::new(),
                };

                // S6: execute, append assistant tool-call JSON verbatim plus
                // a synthetic tool-result message, then loop back to S3.
                plan.messages.push(Message::assistant_tool_call(call_id.clone(), outcome.current_reply_content.clone()));
                debug!(plan_id = %plan.id, tool = %def.name, call_id = %call_id, "tell: dispatching tool call");
                let (output, is_error) = match self.executor.execute(&def, inputs).await {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!(plan_id = %plan.id, tool = %def.name, "tell: tool execution failed: {e}");
                        (format!("error: {e}"), true)
                    }
                };
                plan.messages.push(Message::tool_result(call_id.clone(), output.clone()));
                emit(self.events.as_ref(), TellEvent::ToolCallFinished { call_id, tool_name: def.name.clone(), output, is_error });
                continue;
            }

            // S5 (non-tool branch): commit the reply, then apply its side
            // effects — subtask mutation and auto-load detection.
            let reply = outcome.current_reply_content.clone();
            plan.messages.push(Message::assistant(reply.clone()));
            emit(self.events.as_ref(), TellEvent::TextComplete(reply.clone()));

            apply_subtask_updates(plan, &reply);

            let known_paths: HashSet<&str> = plan.files.files.keys().map(String::as_str).chain(plan.context_parts.iter().map(|p| p.name.as_str())).collect();
            let new_paths: Vec<String> = detect_auto_load_paths(&reply, &known_paths).into_iter().filter(|p| !plan.activate_paths_ordered.contains(p)).collect();
            if !new_paths.is_empty() {
                self.confirm_auto_load(&new_paths).await?;
                plan.activate_paths_ordered.extend(new_paths);
            }

            // S7: continue or finish.
            let next_stage = resolve_stage(plan);
            let implementation_complete = next_stage == Stage::Implementation && plan.all_subtasks_complete();
            emit(self.events.as_ref(), TellEvent::IterationCompleted { iteration });
            if implementation_complete {
                emit(self.events.as_ref(), TellEvent::TurnComplete);
                return Ok(TellOutcome { status: TellStatus::Finished, final_stage: next_stage, iterations: iteration });
            }
            if next_stage != stage {
                emit(self.events.as_ref(), TellEvent::StageChanged { from: stage, to: next_stage });
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::plan::{ContextPart, ContextPartKind, Subtask};
    use crate::vectorstore::EmptyVectorStore;
    use tell_config::{ModelConfig, ModelVariant, RoleModelConfig};
    use tell_model::mock::ScriptedMockProvider;
    use tell_tools::{ToolDefinition, ToolRegistry};

    fn model_pack_with(role: Role) -> ModelPack {
        let model = ModelConfig {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.0),
            cache_system_prompt: true,
            extended_cache_time: false,
        };
        let role_cfg = RoleModelConfig { variants: vec![ModelVariant { up_to_input_tokens: None, model, effective_max_tokens: 4096 }], fallback: vec![] };
        let mut pack = ModelPack::default();
        pack.roles.insert(role, role_cfg);
        pack
    }

    /// A pack with the same mock model ladder wired to every role, for
    /// tests that expect the plan to move across stages.
    fn model_pack_with_all_roles() -> ModelPack {
        let mut pack = ModelPack::default();
        for role in [Role::Architect, Role::Planner, Role::Coder] {
            pack.roles.insert(role, model_pack_with(role).roles.remove(&role).unwrap());
        }
        pack
    }

    fn settings() -> PlanSettings {
        PlanSettings { model_pack: ModelPack::default(), rag: tell_config::RagSettings::default(), mcp: tell_config::McpSettings::default(), tools: ToolRegistry::new() }
    }

    #[tokio::test]
    async fn subtask_breakdown_in_reply_drives_stage_progression_to_completion() {
        let provider = ScriptedMockProvider::new(vec![
            vec![
                tell_model::ResponseEvent::TextDelta("### Subtask Updates ###\n+ write a readme\n### End of Subtask Updates ###".into()),
                tell_model::ResponseEvent::Done,
            ],
            vec![
                tell_model::ResponseEvent::TextDelta("### Subtask Updates ###\nx write a readme\n### End of Subtask Updates ###".into()),
                tell_model::ResponseEvent::Done,
            ],
        ]);
        let pack = model_pack_with_all_roles();
        let tell_settings = TellSettings::default();
        let executor = ToolExecutor::default();
        let lifecycle = TellLifecycle {
            provider: &provider,
            vector_store: &EmptyVectorStore,
            executor: &executor,
            model_pack: &pack,
            tell_settings: &tell_settings,
            cancel: CancellationToken::new(),
            events: None,
            confirm: None,
        };
        let mut plan = Plan::new("p1", "main");
        // No subtasks and no context parts at the start: the model's first
        // reply adds a subtask (still pending), the second marks it
        // finished, which is what actually drives the loop to completion.
        let outcome = lifecycle.run(&mut plan, &settings(), None, "add a readme").await.unwrap();
        assert_eq!(outcome.status, TellStatus::Finished);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].title, "write a readme");
        assert!(plan.subtasks[0].finished);
    }

    #[tokio::test]
    async fn backtick_path_matching_a_known_file_is_auto_loaded_without_a_confirm_gate() {
        let provider = ScriptedMockProvider::always_text("Check `src/lib.rs` for the existing implementation.");
        let pack = model_pack_with(Role::Architect);
        let tell_settings = TellSettings::default();
        let executor = ToolExecutor::default();
        let lifecycle = TellLifecycle {
            provider: &provider,
            vector_store: &EmptyVectorStore,
            executor: &executor,
            model_pack: &pack,
            tell_settings: &tell_settings,
            cancel: CancellationToken::new(),
            events: None,
            confirm: None,
        };
        let mut plan = Plan::new("p1", "main");
        plan.files.files.insert("src/lib.rs".into(), "fn main() {}".into());
        // Pre-finish a subtask so the run terminates after a single reply;
        // the point of this test is the auto-load side effect, not staging.
        plan.subtasks.push(Subtask { title: "write readme".into(), uses: vec![], finished: true });
        let outcome = lifecycle.run(&mut plan, &settings(), None, "add a readme").await.unwrap();
        assert_eq!(outcome.status, TellStatus::Finished);
        assert_eq!(plan.activate_paths_ordered, vec!["src/lib.rs".to_string()]);
    }

    #[tokio::test]
    async fn auto_load_confirmation_times_out_when_no_one_confirms() {
        let provider = ScriptedMockProvider::always_text("Check `src/lib.rs` for the existing implementation.");
        let pack = model_pack_with(Role::Architect);
        let tell_settings = TellSettings { client_confirm_deadline_secs: 0, ..TellSettings::default() };
        let executor = ToolExecutor::default();
        let lifecycle = TellLifecycle {
            provider: &provider,
            vector_store: &EmptyVectorStore,
            executor: &executor,
            model_pack: &pack,
            tell_settings: &tell_settings,
            cancel: CancellationToken::new(),
            events: None,
            confirm: Some(AutoLoadConfirmation::new()),
        };
        let mut plan = Plan::new("p1", "main");
        plan.files.files.insert("src/lib.rs".into(), "fn main() {}".into());
        plan.subtasks.push(Subtask { title: "write readme".into(), uses: vec![], finished: true });
        let err = lifecycle.run(&mut plan, &settings(), None, "add a readme").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn tool_loop_executes_predefined_tool_then_replies() {
        let provider = ScriptedMockProvider::tool_then_text("call-1", "echoTool", r#"{"x":1}"#, "all done");
        let pack = model_pack_with(Role::Coder);
        let tell_settings = TellSettings::default();
        let executor = ToolExecutor::default();
        let mut registry = ToolRegistry::new();
        registry
            .add(ToolDefinition {
                name: "echoTool".into(),
                description: "echoes input".into(),
                input_schema: None,
                output_schema: None,
                execution: tell_tools::ExecutionType::Predefined { function_name: "echoTool".into() },
            })
            .unwrap();
        let mut plan_settings = settings();
        plan_settings.tools = registry;

        let lifecycle = TellLifecycle {
            provider: &provider,
            vector_store: &EmptyVectorStore,
            executor: &executor,
            model_pack: &pack,
            tell_settings: &tell_settings,
            cancel: CancellationToken::new(),
            events: None,
            confirm: None,
        };
        let mut plan = Plan::new("p2", "main");
        plan.subtasks.push(Subtask { title: "echo something".into(), uses: vec![], finished: true });
        let outcome = lifecycle.run(&mut plan, &plan_settings, None, "call the echo tool").await.unwrap();
        assert_eq!(outcome.status, TellStatus::Finished);
        assert_eq!(outcome.iterations, 2);
        // user prompt, assistant tool-call json, tool result, final assistant reply.
        assert_eq!(plan.messages.len(), 4);
    }

    #[tokio::test]
    async fn cancellation_before_first_call_stops_without_mutating_plan() {
        let provider = ScriptedMockProvider::always_text("should not run");
        let pack = model_pack_with(Role::Architect);
        let tell_settings = TellSettings::default();
        let executor = ToolExecutor::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let lifecycle = TellLifecycle {
            provider: &provider,
            vector_store: &EmptyVectorStore,
            executor: &executor,
            model_pack: &pack,
            tell_settings: &tell_settings,
            cancel,
            events: None,
            confirm: None,
        };
        let mut plan = Plan::new("p3", "main");
        let outcome = lifecycle.run(&mut plan, &settings(), None, "do something").await.unwrap();
        assert_eq!(outcome.status, TellStatus::Cancelled);
        assert_eq!(outcome.iterations, 0);
    }
}
