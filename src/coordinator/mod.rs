//! Turn-taking state machine for a single rollout.
//!
//! ```text
//! AwaitingUser ──user msg──▶ AwaitingAgent ──reply──▶ AwaitingUser
//!      │                        │     ▲
//!      │ sentinel               │call │result
//!      ▼                        ▼     │
//!  GoalReached            AwaitingToolResult
//! ```
//!
//! Every path ends in exactly one [`TerminationReason`]:
//!
//! - `goal_reached`: the user message matched the [`CompletionPolicy`]
//! - `max_turns`: the user-turn budget is spent
//! - `protocol_violation`: agent or user output failed structural checks
//! - `fatal_error`: the model capability failed for good, or the run was cancelled
//!
//! Tool failures never end a rollout; they are recorded as tool results.
//! A call interrupted by cancellation is retracted, so no transcript ends
//! with an unanswered call.

pub mod config;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LlmError, ProtocolViolation};
use crate::llm::Usage;
use crate::simulation::{
    parse_agent_output, AgentAction, AgentSimulator, ResultSynthesizer, ToolExecutionSimulator,
    UserSimulator,
};
use crate::trajectory::{
    AgentConfig, Message, Task, TerminationReason, TokenUsage, ToolCall, Trajectory, UserPersona,
};

pub use config::{CompletionMode, CompletionPolicy, CoordinatorConfig, DEFAULT_SENTINEL};

/// One (task, agent, persona, attempt) combination to simulate.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub task: Arc<Task>,
    pub agent: Arc<AgentConfig>,
    pub persona: Arc<UserPersona>,
    pub attempt: u32,
}

impl Rollout {
    pub fn new(
        task: Arc<Task>,
        agent: Arc<AgentConfig>,
        persona: Arc<UserPersona>,
        attempt: u32,
    ) -> Self {
        Self {
            task,
            agent,
            persona,
            attempt,
        }
    }

    pub fn trajectory_id(&self) -> Uuid {
        Trajectory::derive_id(&self.task.id, &self.agent.id, self.attempt)
    }
}

/// Receiving end of a pool-wide shutdown broadcast.
///
/// A closed channel is not a cancellation: it only means nobody can cancel
/// any more.
#[derive(Debug)]
pub struct CancelSignal {
    rx: Option<broadcast::Receiver<()>>,
    fired: bool,
}

impl CancelSignal {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx: Some(rx),
            fired: false,
        }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            fired: false,
        }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&mut self) -> bool {
        if self.fired {
            return true;
        }
        if let Some(rx) = self.rx.as_mut() {
            match rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => self.fired = true,
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => {}
            }
        }
        self.fired
    }

    /// Resolves once the signal fires. Pending forever otherwise.
    async fn fired(&mut self) {
        if self.fired {
            return;
        }
        match self.rx.as_mut() {
            Some(rx) => match rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => self.fired = true,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            },
            None => std::future::pending::<()>().await,
        }
    }
}

/// Races an external call against cancellation.
async fn guarded<T, F>(cancel: &mut CancelSignal, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    tokio::select! {
        biased;
        _ = cancel.fired() => Err(LlmError::Cancelled),
        result = call => result,
    }
}

#[derive(Debug)]
enum State {
    AwaitingUser,
    AwaitingAgent,
    AwaitingToolResult(ToolCall),
}

enum Transition {
    Next(State),
    Stop(TerminationReason, Option<String>),
}

impl Transition {
    fn violation(v: ProtocolViolation) -> Self {
        Transition::Stop(TerminationReason::ProtocolViolation, Some(v.to_string()))
    }
}

/// Everything one rollout owns while it runs.
struct Session {
    messages: Vec<Message>,
    turns: u32,
    tool_calls: u32,
    calls_this_turn: u32,
    usage: TokenUsage,
    tools: ToolExecutionSimulator,
}

impl Session {
    /// Drops the trailing tool call that will never be answered.
    fn retract_pending_call(&mut self) {
        if self
            .messages
            .last()
            .is_some_and(|m| m.tool_call().is_some())
        {
            self.messages.pop();
            self.tool_calls -= 1;
            self.calls_this_turn -= 1;
        }
    }

    fn record_usage(&mut self, usage: &Usage) {
        if usage.total_tokens > 0 || usage.prompt_tokens > 0 {
            self.usage.record(usage);
        }
    }
}

/// Drives the user, agent and tool simulators through one rollout.
pub struct InteractionCoordinator {
    user: Arc<dyn UserSimulator>,
    agent: Arc<dyn AgentSimulator>,
    synthesizer: Arc<dyn ResultSynthesizer>,
    config: CoordinatorConfig,
}

impl InteractionCoordinator {
    pub fn new(
        user: Arc<dyn UserSimulator>,
        agent: Arc<dyn AgentSimulator>,
        synthesizer: Arc<dyn ResultSynthesizer>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            user,
            agent,
            synthesizer,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Runs the rollout to its terminal state. Never fails: every error is
    /// folded into the trajectory's termination reason.
    pub async fn run(&self, rollout: &Rollout, mut cancel: CancelSignal) -> Trajectory {
        let id = rollout.trajectory_id();
        let started_at = Utc::now();
        let mut session = Session {
            messages: Vec::new(),
            turns: 0,
            tool_calls: 0,
            calls_this_turn: 0,
            usage: TokenUsage::default(),
            tools: ToolExecutionSimulator::new(
                self.config.seed,
                id,
                self.config.outcome_weights,
                Arc::clone(&self.synthesizer),
            ),
        };

        let mut state = State::AwaitingUser;
        let (termination, detail) = loop {
            if cancel.is_cancelled() {
                if matches!(state, State::AwaitingToolResult(_)) {
                    session.retract_pending_call();
                }
                break (TerminationReason::FatalError, Some("cancelled".to_string()));
            }

            let step = match state {
                State::AwaitingUser => self.user_step(rollout, &mut session, &mut cancel).await,
                State::AwaitingAgent => self.agent_step(rollout, &mut session, &mut cancel).await,
                State::AwaitingToolResult(call) => {
                    self.tool_step(rollout, &mut session, &mut cancel, call).await
                }
            };

            match step {
                Ok(Transition::Next(next)) => {
                    debug!(
                        trajectory_id = %id,
                        turn = session.turns,
                        messages = session.messages.len(),
                        next = ?next,
                        "Transition"
                    );
                    state = next;
                }
                Ok(Transition::Stop(reason, detail)) => break (reason, detail),
                Err(LlmError::Cancelled) => {
                    break (TerminationReason::FatalError, Some("cancelled".to_string()))
                }
                Err(e) => break (TerminationReason::FatalError, Some(e.to_string())),
            }
        };

        let Session {
            messages,
            turns,
            tool_calls,
            usage,
            tools,
            ..
        } = session;

        let trajectory = Trajectory {
            id,
            task_id: rollout.task.id.clone(),
            agent_id: rollout.agent.id.clone(),
            persona_id: rollout.persona.id.clone(),
            attempt: rollout.attempt,
            messages,
            termination,
            termination_detail: detail,
            turn_count: turns,
            tool_call_count: tool_calls,
            tool_usage: tools.finish(),
            token_usage: usage,
            started_at,
            ended_at: Utc::now(),
        };

        info!(
            trajectory_id = %trajectory.id,
            task_id = %trajectory.task_id,
            attempt = trajectory.attempt,
            termination = %trajectory.termination,
            detail = trajectory.termination_detail.as_deref().unwrap_or(""),
            turns = trajectory.turn_count,
            tool_calls = trajectory.tool_call_count,
            "Rollout finished"
        );

        trajectory
    }

    async fn user_step(
        &self,
        rollout: &Rollout,
        session: &mut Session,
        cancel: &mut CancelSignal,
    ) -> Result<Transition, LlmError> {
        if session.turns >= self.config.max_turns {
            return Ok(Transition::Stop(TerminationReason::MaxTurns, None));
        }

        let utterance = guarded(
            cancel,
            self.user
                .respond(&rollout.task, &rollout.persona, &session.messages),
        )
        .await?;
        session.record_usage(&utterance.usage);

        let content = utterance.content.trim();
        if content.is_empty() {
            return Ok(Transition::violation(ProtocolViolation::EmptyOutput {
                role: "user",
            }));
        }

        session.turns += 1;
        session.calls_this_turn = 0;
        session.messages.push(Message::user(session.turns, content));

        if self.config.completion.is_complete(content) {
            return Ok(Transition::Stop(TerminationReason::GoalReached, None));
        }
        Ok(Transition::Next(State::AwaitingAgent))
    }

    async fn agent_step(
        &self,
        rollout: &Rollout,
        session: &mut Session,
        cancel: &mut CancelSignal,
    ) -> Result<Transition, LlmError> {
        let turn = guarded(cancel, self.agent.act(&rollout.agent, &session.messages)).await?;
        session.record_usage(&turn.usage);

        let action = match parse_agent_output(&turn.raw) {
            Ok(action) => action,
            Err(violation) => return Ok(Transition::violation(violation)),
        };

        match action {
            AgentAction::Reply(text) => {
                session
                    .messages
                    .push(Message::agent_reply(session.turns, text));
                Ok(Transition::Next(State::AwaitingUser))
            }
            AgentAction::ToolCall {
                content,
                name,
                arguments,
            } => {
                if !rollout.agent.declares(&name) {
                    return Ok(Transition::violation(ProtocolViolation::UndeclaredTool(
                        name,
                    )));
                }
                let limit = self.config.max_tool_calls_per_turn;
                if session.calls_this_turn >= limit {
                    return Ok(Transition::violation(
                        ProtocolViolation::ToolCallBudgetExceeded { limit },
                    ));
                }

                session.tool_calls += 1;
                session.calls_this_turn += 1;
                let call = ToolCall {
                    call_id: format!("call-{}", session.tool_calls),
                    name,
                    arguments,
                };
                session.messages.push(Message::agent_tool_call(
                    session.turns,
                    content,
                    call.clone(),
                ));
                Ok(Transition::Next(State::AwaitingToolResult(call)))
            }
        }
    }

    async fn tool_step(
        &self,
        rollout: &Rollout,
        session: &mut Session,
        cancel: &mut CancelSignal,
        call: ToolCall,
    ) -> Result<Transition, LlmError> {
        let Some(tool) = rollout.agent.tool(&call.name).cloned() else {
            session.retract_pending_call();
            return Ok(Transition::violation(ProtocolViolation::UndeclaredTool(
                call.name,
            )));
        };

        let executed = guarded(cancel, session.tools.execute(&tool, &call)).await;
        let (result, usage) = match executed {
            Ok(done) => done,
            Err(e) => {
                session.retract_pending_call();
                return Err(e);
            }
        };
        session.record_usage(&usage);

        debug!(
            call_id = %result.call_id,
            tool = %result.tool_name,
            outcome = %result.outcome,
            "Tool executed"
        );
        session
            .messages
            .push(Message::tool_result(session.turns, result));
        Ok(Transition::Next(State::AwaitingAgent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_signal_fires() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = CancelSignal::new(rx);
        assert!(!signal.is_cancelled());
        tx.send(()).expect("receiver alive");
        assert!(signal.is_cancelled());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_channel_is_not_cancellation() {
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);
        let mut signal = CancelSignal::new(rx);
        assert!(!signal.is_cancelled());

        let out = guarded(&mut signal, async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(out.expect("not cancelled"), 7);
    }

    #[tokio::test]
    async fn test_guarded_call_is_interrupted() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = CancelSignal::new(rx);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, LlmError>(())
        };
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        });

        let out = guarded(&mut signal, slow).await;
        assert!(matches!(out, Err(LlmError::Cancelled)));
        assert!(signal.is_cancelled());
        sender.await.expect("sender task");
    }
}
