//! The state-machine executor.
//!
//! One run is one sequential control thread: exactly one state is in
//! flight at any time, with asynchronous suspension at model calls and
//! input rendezvous points. Cancellation is cooperative (`stop()` sets a
//! token consulted between steps and inside suspensions); input delivery
//! is a single-slot oneshot handoff between `provide_input` and the
//! suspended dispatch. Runtime failures resolve through the error-fallback
//! chain: the failing state's own target first, then the workflow-level
//! target, otherwise the run halts with the original error annotated with
//! the failing state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use waypoint_types::{ChoiceOption, TERMINAL_STATE};

use crate::capability::{Capabilities, GenerateRequest};
use crate::context::RunContext;
use crate::model::{ChoiceState, InputState, PromptState, State, Workflow};
use crate::render::render_template;
use crate::trace::{RunSession, TraceEvent, TraceEventKind};

/// Per-run execution options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Variables pre-seeded into the run context.
    pub initial_vars: IndexMap<String, Value>,
    /// Overrides the workflow's default model.
    pub model: Option<String>,
}

/// How a run settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The terminal marker or an end state was reached.
    Completed,
    /// `stop()` halted the loop between steps or inside a suspension.
    Cancelled,
}

/// The final snapshot of a settled run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// Final variable store.
    pub vars: IndexMap<String, Value>,
    /// Every state visited, in execution order.
    pub history: Vec<String>,
}

/// Unrecoverable execution failures.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// A dispatch failed and no fallback target was declared at either
    /// scope. The failing state's identifier is attached.
    #[error("state '{state}': {message}")]
    Runtime { state: String, message: String },

    /// `execute` was called a second time on the same executor.
    #[error("run already started")]
    AlreadyStarted,
}

/// Failures delivering a value through `provide_input`.
#[derive(Debug, Error)]
pub enum InputDeliveryError {
    #[error("no input is currently awaited")]
    NoPendingInput,

    #[error("the run stopped before the value was consumed")]
    RunStopped,
}

/// Lifecycle events emitted while a run executes. Drivers (console,
/// harness, web sessions) consume these to present progress and answer
/// input requests.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateStarted { state: String },
    /// An Input/Choice dispatch is suspended awaiting `provide_input`.
    InputRequested(InputRequest),
    ModelResponded { state: String, response: String },
    Transition { from: String, to: String },
}

/// What a suspended dispatch is asking for.
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub state: String,
    pub kind: InputKind,
    /// Rendered prompt, when the state declared one.
    pub prompt: Option<String>,
    /// Declared options for Choice states.
    pub choices: Vec<ChoiceOption>,
    /// Declared default for Input states.
    pub default_value: Option<String>,
}

/// Which dispatch variant is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Freeform,
    Choice,
}

/// Answers input requests on behalf of an external input source. `None`
/// means the responder cannot answer and the run should stop.
#[async_trait::async_trait]
pub trait InputResponder: Send + Sync {
    async fn respond(&self, request: &InputRequest) -> Option<String>;
}

enum StepError {
    Runtime(String),
    Cancelled,
}

impl StepError {
    fn runtime(error: anyhow::Error) -> Self {
        // The alternate format keeps the full context chain.
        StepError::Runtime(format!("{error:#}"))
    }
}

/// Executes one workflow run. Create with [`Executor::new`], drive with
/// [`Executor::execute`], and interact through [`Executor::stop`] and
/// [`Executor::provide_input`] (both safe to call from other tasks).
pub struct Executor {
    workflow: Workflow,
    caps: Capabilities,
    session: RunSession,
    options: ExecutorOptions,
    cancel: CancellationToken,
    input_slot: Mutex<Option<oneshot::Sender<String>>>,
    events: UnboundedSender<RunEvent>,
    started: AtomicBool,
}

impl Executor {
    /// Build an executor and the receiving end of its lifecycle events.
    pub fn new(
        workflow: Workflow,
        caps: Capabilities,
        session: RunSession,
        options: ExecutorOptions,
    ) -> (Self, UnboundedReceiver<RunEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                workflow,
                caps,
                session,
                options,
                cancel: CancellationToken::new(),
                input_slot: Mutex::new(None),
                events,
                started: AtomicBool::new(false),
            },
            receiver,
        )
    }

    /// Request cooperative cancellation. An already-dispatched external
    /// call is not aborted; only the loop's continuation halts.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Deliver a value to a currently suspended Input/Choice dispatch.
    pub fn provide_input(&self, value: impl Into<String>) -> Result<(), InputDeliveryError> {
        let sender = self
            .input_slot
            .lock()
            .expect("input slot lock")
            .take()
            .ok_or(InputDeliveryError::NoPendingInput)?;
        sender
            .send(value.into())
            .map_err(|_| InputDeliveryError::RunStopped)
    }

    /// Run the workflow to settlement: End reached, unrecoverable failure,
    /// or cancellation. Tool servers are torn down and the session closed
    /// on every exit path.
    pub async fn execute(&self) -> Result<RunOutcome, ExecuteError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ExecuteError::AlreadyStarted);
        }

        let mut context = RunContext::with_vars(self.options.initial_vars.clone());
        let result = self.run_loop(&mut context).await;

        if let Some(tools) = &self.caps.tools {
            tools.shutdown_all().await;
        }

        let outcome_label = match &result {
            Ok(RunStatus::Completed) => "completed",
            Ok(RunStatus::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        self.session.record(TraceEvent::new(
            TraceEventKind::RunEnd,
            None,
            json!({ "outcome": outcome_label }),
        ));
        self.session.close();

        result.map(|status| RunOutcome {
            run_id: self.session.run_id().to_string(),
            status,
            vars: context.vars,
            history: context.history,
        })
    }

    async fn run_loop(&self, context: &mut RunContext) -> Result<RunStatus, ExecuteError> {
        self.session.record(TraceEvent::new(
            TraceEventKind::RunStart,
            None,
            json!({ "workflow": self.workflow.name, "run_id": self.session.run_id() }),
        ));

        let mut current = self.workflow.start_state.clone();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }

            let Some(state) = self.workflow.states.get(&current) else {
                if current == TERMINAL_STATE {
                    return Ok(RunStatus::Completed);
                }
                // The composer guarantees resolution; this protects runs
                // built from hand-constructed models.
                return Err(ExecuteError::Runtime {
                    state: current,
                    message: "transition target does not name a state".into(),
                });
            };

            context.history.push(current.clone());
            self.session
                .record(TraceEvent::new(TraceEventKind::StateStart, Some(&current), Value::Null));
            let _ = self.events.send(RunEvent::StateStarted {
                state: current.clone(),
            });
            debug!(state = %current, "executing state");

            if matches!(state, State::End) {
                self.session.record(TraceEvent::new(
                    TraceEventKind::StateComplete,
                    Some(&current),
                    Value::Null,
                ));
                return Ok(RunStatus::Completed);
            }

            match self.dispatch(&current, state, context).await {
                Ok(next) => {
                    self.session.record(TraceEvent::new(
                        TraceEventKind::StateComplete,
                        Some(&current),
                        Value::Null,
                    ));
                    self.session.record(TraceEvent::new(
                        TraceEventKind::Transition,
                        Some(&current),
                        json!({ "to": next }),
                    ));
                    let _ = self.events.send(RunEvent::Transition {
                        from: current.clone(),
                        to: next.clone(),
                    });
                    current = next;
                }
                Err(StepError::Cancelled) => return Ok(RunStatus::Cancelled),
                Err(StepError::Runtime(message)) => {
                    let fallback = state
                        .on_error()
                        .or(self.workflow.on_error.as_deref())
                        .map(String::from);
                    self.session.record(TraceEvent::new(
                        TraceEventKind::Error,
                        Some(&current),
                        json!({ "message": message, "recovered": fallback.is_some() }),
                    ));
                    match fallback {
                        Some(target) => {
                            self.session.record(TraceEvent::new(
                                TraceEventKind::Transition,
                                Some(&current),
                                json!({ "to": target, "fallback": true }),
                            ));
                            let _ = self.events.send(RunEvent::Transition {
                                from: current.clone(),
                                to: target.clone(),
                            });
                            current = target;
                        }
                        None => {
                            return Err(ExecuteError::Runtime {
                                state: current,
                                message,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        state: &State,
        context: &mut RunContext,
    ) -> Result<String, StepError> {
        match state {
            State::Prompt(prompt) => self.dispatch_prompt(name, prompt, context).await,
            State::Choice(choice) => self.dispatch_choice(name, choice, context).await,
            State::Input(input) => self.dispatch_input(name, input, context).await,
            State::End => unreachable!("end states settle before dispatch"),
        }
    }

    async fn dispatch_prompt(
        &self,
        name: &str,
        state: &PromptState,
        context: &mut RunContext,
    ) -> Result<String, StepError> {
        let rendered = render_template(&state.prompt, &context.vars);

        let prompt = match self.workflow.resolve_rag(&state.rag) {
            Some(config) => {
                let retriever = self.caps.retriever.as_ref().ok_or_else(|| {
                    StepError::Runtime("retrieval configured but no retriever is available".into())
                })?;
                let chunks = retriever
                    .retrieve(&rendered, config)
                    .await
                    .map_err(StepError::runtime)?;
                crate::render::format_context(&chunks, &rendered, config.template.as_ref())
            }
            None => rendered,
        };

        if !state.tool_servers.is_empty() {
            let host = self.caps.tools.as_ref().ok_or_else(|| {
                StepError::Runtime("tool servers configured but no tool host is available".into())
            })?;
            for server in &state.tool_servers {
                let config = self.workflow.tool_servers.get(server).ok_or_else(|| {
                    StepError::Runtime(format!("tool server '{server}' is not configured"))
                })?;
                host.register(server, config).await.map_err(StepError::runtime)?;
            }
        }

        let mut attachments = Vec::with_capacity(state.files.len());
        if !state.files.is_empty() {
            let loader = self.caps.attachments.as_ref().ok_or_else(|| {
                StepError::Runtime("attachments configured but no loader is available".into())
            })?;
            for file in &state.files {
                attachments.push(loader.load(file).map_err(StepError::runtime)?);
            }
        }

        let response = self
            .caps
            .model
            .generate(GenerateRequest {
                model: self.model_identifier(),
                prompt,
                options: state.options.clone(),
                attachments,
                tool_servers: state.tool_servers.clone(),
            })
            .await
            .map_err(StepError::runtime)?;
        let _ = self.events.send(RunEvent::ModelResponded {
            state: name.to_string(),
            response: response.clone(),
        });

        if let Some(var) = &state.save_as {
            context.vars.insert(var.clone(), Value::String(response.clone()));
        }

        if state.next_options.is_empty() {
            Ok(state
                .next
                .clone()
                .unwrap_or_else(|| TERMINAL_STATE.to_string()))
        } else {
            self.route_next(name, state, &response).await
        }
    }

    /// Second model call: pick the next state among declared candidates.
    async fn route_next(
        &self,
        name: &str,
        state: &PromptState,
        response: &str,
    ) -> Result<String, StepError> {
        let mut routing_prompt = String::from(
            "You are routing a workflow. Choose the next step from these options:\n",
        );
        for option in &state.next_options {
            routing_prompt.push_str(&format!("- {}: {}\n", option.state, option.description));
        }
        routing_prompt.push_str(
            "\nGiven the response below, reply with exactly one option identifier and nothing else.\n\nResponse:\n",
        );
        routing_prompt.push_str(response);

        let answer = self
            .caps
            .model
            .generate(GenerateRequest {
                model: self.model_identifier(),
                prompt: routing_prompt,
                ..Default::default()
            })
            .await
            .map_err(StepError::runtime)?;

        let normalized = answer.trim().to_lowercase();
        let exact = state
            .next_options
            .iter()
            .find(|option| option.state.to_lowercase() == normalized);
        let chosen = exact.or_else(|| {
            state
                .next_options
                .iter()
                .find(|option| normalized.contains(&option.state.to_lowercase()))
        });

        match chosen {
            Some(option) => Ok(option.state.clone()),
            None => {
                // No recognized candidate: deterministically take the first
                // listed option rather than failing the run.
                let first = &state.next_options[0];
                self.session.record(TraceEvent::new(
                    TraceEventKind::RoutingFallback,
                    Some(name),
                    json!({ "answer": answer, "fallback": first.state }),
                ));
                Ok(first.state.clone())
            }
        }
    }

    async fn dispatch_choice(
        &self,
        name: &str,
        state: &ChoiceState,
        context: &mut RunContext,
    ) -> Result<String, StepError> {
        let prompt = state
            .prompt
            .as_ref()
            .map(|text| render_template(text, &context.vars));
        let selection = self
            .await_input(InputRequest {
                state: name.to_string(),
                kind: InputKind::Choice,
                prompt,
                choices: state.choices.clone(),
                default_value: None,
            })
            .await?;

        if let Some(var) = &state.save_as {
            context.vars.insert(var.clone(), Value::String(selection.clone()));
        }

        match state.choices.iter().find(|choice| choice.value == selection) {
            Some(choice) => Ok(choice.next.clone()),
            None => state.next.clone().ok_or_else(|| {
                StepError::Runtime(format!(
                    "selection '{selection}' matches no declared choice value"
                ))
            }),
        }
    }

    async fn dispatch_input(
        &self,
        name: &str,
        state: &InputState,
        context: &mut RunContext,
    ) -> Result<String, StepError> {
        let prompt = state
            .prompt
            .as_ref()
            .map(|text| render_template(text, &context.vars));
        let submitted = self
            .await_input(InputRequest {
                state: name.to_string(),
                kind: InputKind::Freeform,
                prompt,
                choices: Vec::new(),
                default_value: state.default_value.clone(),
            })
            .await?;

        let value = if submitted.is_empty() {
            state.default_value.clone().unwrap_or_default()
        } else {
            submitted
        };

        if let Some(var) = &state.save_as {
            context.vars.insert(var.clone(), Value::String(value));
        }

        Ok(state
            .next
            .clone()
            .unwrap_or_else(|| TERMINAL_STATE.to_string()))
    }

    /// Suspend until a value arrives through `provide_input` or the run is
    /// stopped. Single-slot handoff: exactly one sender exists per
    /// suspension, and delivery consumes it.
    async fn await_input(&self, request: InputRequest) -> Result<String, StepError> {
        let (sender, receiver) = oneshot::channel();
        *self.input_slot.lock().expect("input slot lock") = Some(sender);

        self.session.record(TraceEvent::new(
            TraceEventKind::InputRequested,
            Some(&request.state),
            json!({ "kind": match request.kind {
                InputKind::Freeform => "input",
                InputKind::Choice => "choice",
            }}),
        ));
        let _ = self.events.send(RunEvent::InputRequested(request));

        tokio::select! {
            _ = self.cancel.cancelled() => {
                // Drop the pending sender so a late provide_input reports
                // the stop instead of feeding a dead run.
                self.input_slot.lock().expect("input slot lock").take();
                Err(StepError::Cancelled)
            }
            value = receiver => value.map_err(|_| {
                StepError::Runtime("input channel closed before a value arrived".into())
            }),
        }
    }

    fn model_identifier(&self) -> Option<String> {
        self.options
            .model
            .clone()
            .or_else(|| self.workflow.default_model.clone())
    }
}

/// Drive an executor to settlement with a responder answering its input
/// requests. The bridge task forwards each `InputRequested` event to the
/// responder and feeds the answer back through `provide_input`; a `None`
/// answer stops the run.
pub async fn run_to_completion(
    executor: Arc<Executor>,
    mut events: UnboundedReceiver<RunEvent>,
    responder: Arc<dyn InputResponder>,
) -> Result<RunOutcome, ExecuteError> {
    let feeder = executor.clone();
    let bridge = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let RunEvent::InputRequested(request) = event {
                match responder.respond(&request).await {
                    Some(value) => {
                        let _ = feeder.provide_input(value);
                    }
                    None => feeder.stop(),
                }
            }
        }
    });

    let outcome = executor.execute().await;
    bridge.abort();
    outcome
}
