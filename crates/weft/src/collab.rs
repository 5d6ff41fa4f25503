//! Collaborator ports and the turn driver that connects them to a thread.
//!
//! The engine never talks to a model or runs a tool itself. A
//! [`StepGenerator`] proposes the next tool call (or streams a final
//! answer) from a [`PromptContext`]; a [`ToolExecutor`] runs tool calls.
//! [`TurnDriver`] runs one turn: it keeps a [`ContextOptimizer`] in step
//! with the log, asks the generator for the next move, executes it, and
//! records everything as events. Collaborator failures become recoverable
//! `error_occurred` events rather than errors.

use crate::context::{ContextOptimizer, OptimizerConfig, PromptContext};
use crate::error::{Result, ThreadError};
use crate::thread::projection::is_question_tool;
use crate::thread::{ThreadManager, ThreadStatus};
use crate::{ToolCall, ToolOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Error code recorded when the step generator fails.
pub const GENERATOR_ERROR_CODE: &str = "generator_failed";

/// Produces the assistant's next move.
#[async_trait]
pub trait StepGenerator: Send + Sync {
    /// The next tool call, or `None` when the assistant should answer in
    /// text instead.
    async fn generate_next_step(&self, context: &PromptContext) -> Result<Option<ToolCall>>;

    /// Stream a text answer, calling `on_chunk` for each fragment. Returns
    /// the full text.
    async fn stream_response(
        &self,
        context: &PromptContext,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<String>;
}

/// Runs tool calls on behalf of the thread.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_call: &ToolCall) -> Result<ToolOutcome>;
}

/// What a single [`TurnDriver::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// A tool ran; `success` mirrors the recorded `tool_executed` event.
    ToolExecuted { tool_name: String, success: bool },
    /// A question tool was proposed; the thread waits for the user.
    AwaitingInput { tool_call: ToolCall },
    /// The assistant answered in text.
    Responded { text: String },
    /// The generator failed; a recoverable error was recorded.
    GeneratorFailed { message: String },
}

type ChunkHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Drives one thread turn by turn.
pub struct TurnDriver {
    generator: Arc<dyn StepGenerator>,
    executor: Arc<dyn ToolExecutor>,
    optimizer: ContextOptimizer,
    on_chunk: ChunkHandler,
    /// Events already fed to the optimizer.
    fed: usize,
}

impl TurnDriver {
    pub fn new(
        generator: Arc<dyn StepGenerator>,
        executor: Arc<dyn ToolExecutor>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            optimizer: ContextOptimizer::new(config),
            on_chunk: Box::new(|_| {}),
            fed: 0,
        }
    }

    /// Receive streamed text fragments.
    pub fn with_chunk_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_chunk = Box::new(handler);
        self
    }

    /// Replace the optimizer, e.g. one with a custom scorer.
    pub fn with_optimizer(mut self, optimizer: ContextOptimizer) -> Self {
        self.optimizer = optimizer;
        self.fed = 0;
        self
    }

    pub fn optimizer(&self) -> &ContextOptimizer {
        &self.optimizer
    }

    /// Feed events the optimizer has not seen yet, recording a
    /// `context_optimized` event after every pass that changed the window.
    pub fn sync(&mut self, manager: &mut ThreadManager) -> Result<()> {
        while self.fed < manager.events().len() {
            let event = manager.events()[self.fed].clone();
            self.fed += 1;
            let result = self.optimizer.add_event(&event);
            if result.was_optimized() {
                debug!(
                    "[{}] context optimized: {} -> {} tokens, {} message(s) removed",
                    manager.thread_id(),
                    result.original_tokens,
                    result.optimized_tokens,
                    result.messages_removed
                );
                manager.add_context_optimized(&result)?;
            } else if let Err(e) = result.check() {
                warn!("[{}] event {} left out of context: {e}", manager.thread_id(), event.id);
            }
        }
        Ok(())
    }

    /// The context the generator would see right now.
    pub fn prompt_context(&self, manager: &ThreadManager) -> PromptContext {
        self.optimizer
            .prompt_context()
            .with_state(manager.state().clone())
    }

    /// Run one turn.
    ///
    /// A thread waiting for input returns [`TurnOutcome::AwaitingInput`]
    /// without calling the generator. Idle and closed threads are errors.
    pub async fn step(&mut self, manager: &mut ThreadManager) -> Result<TurnOutcome> {
        match manager.status() {
            ThreadStatus::Idle => {
                return Err(ThreadError::invalid(format!(
                    "thread {} has not started",
                    manager.thread_id()
                )));
            }
            status if status.is_terminal() => {
                return Err(ThreadError::ThreadClosed {
                    thread_id: manager.thread_id().to_string(),
                    status,
                });
            }
            ThreadStatus::Paused => {
                return Err(ThreadError::InvalidTransition {
                    from: ThreadStatus::Paused,
                    to: ThreadStatus::Active,
                });
            }
            _ => {}
        }
        if manager.status() == ThreadStatus::WaitingInput
            && let Some(tool_call) = manager.state().pending_question.clone()
        {
            return Ok(TurnOutcome::AwaitingInput { tool_call });
        }

        self.sync(manager)?;
        let context = self.prompt_context(manager);

        let next = match self.generator.generate_next_step(&context).await {
            Ok(next) => next,
            Err(e) => return self.generator_failed(manager, e),
        };

        let outcome = match next {
            None => {
                let text = match self.generator.stream_response(&context, &*self.on_chunk).await {
                    Ok(text) => text,
                    Err(e) => return self.generator_failed(manager, e),
                };
                manager.add_assistant_message(text.clone())?;
                TurnOutcome::Responded { text }
            }
            Some(tool_call) if is_question_tool(&tool_call.name) => {
                info!("[{}] asking the user via {}", manager.thread_id(), tool_call.name);
                manager.add_tool_call_generated(tool_call.clone(), None)?;
                TurnOutcome::AwaitingInput { tool_call }
            }
            Some(tool_call) => {
                manager.add_tool_call_generated(tool_call.clone(), None)?;
                let started = Instant::now();
                let outcome = match self.executor.execute(&tool_call).await {
                    Ok(outcome) => outcome,
                    Err(e) => ToolOutcome::failure(e.to_string()),
                };
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let success = outcome.success;
                if !success {
                    warn!(
                        "[{}] tool {} failed: {}",
                        manager.thread_id(),
                        tool_call.name,
                        outcome.error.as_deref().unwrap_or("no error message")
                    );
                }
                manager.add_tool_executed(&tool_call, outcome, Some(elapsed))?;
                TurnOutcome::ToolExecuted {
                    tool_name: tool_call.name,
                    success,
                }
            }
        };

        self.sync(manager)?;
        Ok(outcome)
    }

    fn generator_failed(&mut self, manager: &mut ThreadManager, err: ThreadError) -> Result<TurnOutcome> {
        let message = err.to_string();
        warn!("[{}] step generator failed: {message}", manager.thread_id());
        manager.add_error(message.clone(), true, Some(GENERATOR_ERROR_CODE.to_string()))?;
        self.sync(manager)?;
        Ok(TurnOutcome::GeneratorFailed { message })
    }
}
