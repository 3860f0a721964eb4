//! Ordered middleware pipeline and per-message chain execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use switchboard_core::{ConnectionRef, DispatchError, Packet};
use tracing::{debug, warn};

use crate::errors::MiddlewareError;
use crate::metrics::MIDDLEWARE_ERRORS_TOTAL;
use crate::pipeline::middleware::{Middleware, Next, Terminal};

/// How one middleware step ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Called `next` and returned `Ok`.
    Continue,
    /// Returned `Ok` without calling `next`; nothing downstream ran.
    ShortCircuit,
    /// Returned an error. The chain continued regardless: through `next` if
    /// the middleware called it, otherwise from the following middleware.
    ErrorContinue(MiddlewareError),
}

/// One executed step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// Middleware name.
    pub middleware: String,
    /// How the step ended.
    pub outcome: StepOutcome,
}

/// Whether and how the terminal ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// A middleware short-circuited before the end of the chain.
    NotReached,
    /// The terminal returned `Ok`.
    Completed,
    /// The terminal returned an error.
    Failed(DispatchError),
}

/// Result of running one packet through a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    /// Executed steps in chain order. Steps after a short-circuit are absent.
    pub steps: Vec<StepReport>,
    /// Terminal outcome.
    pub terminal: TerminalOutcome,
}

impl PipelineReport {
    /// Whether the terminal was invoked.
    pub fn reached_terminal(&self) -> bool {
        !matches!(self.terminal, TerminalOutcome::NotReached)
    }

    /// Contained middleware errors, in chain order.
    pub fn middleware_errors(&self) -> impl Iterator<Item = (&str, &MiddlewareError)> {
        self.steps.iter().filter_map(|s| match &s.outcome {
            StepOutcome::ErrorContinue(e) => Some((s.middleware.as_str(), e)),
            _ => None,
        })
    }

    /// Name of the middleware that short-circuited, if any.
    pub fn short_circuited_by(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.outcome == StepOutcome::ShortCircuit)
            .map(|s| s.middleware.as_str())
    }
}

/// Ordered list of middleware executed in registration order.
///
/// The pipeline holds no execution state; every [`process`](Self::process)
/// call runs on its own chain, so concurrent messages never share a cursor.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Append several middleware, preserving their order.
    pub fn extend(&mut self, middleware: impl IntoIterator<Item = Arc<dyn Middleware>>) {
        self.middleware.extend(middleware);
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Whether the pipeline has no middleware.
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Middleware names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run `packet` through every middleware from the start, ending in `terminal`.
    pub async fn process(
        &self,
        conn: &ConnectionRef,
        packet: Packet,
        terminal: &dyn Terminal,
    ) -> PipelineReport {
        let mut packet = packet;
        let chain = Chain::new(&self.middleware, terminal);
        chain.run_from(0, conn.clone(), &mut packet).await;
        chain.into_report()
    }
}

impl std::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("middleware", &self.names())
            .finish()
    }
}

/// Execution state for one message.
pub(crate) struct Chain<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
    advanced: Vec<AtomicBool>,
    outcomes: Mutex<Vec<Option<StepOutcome>>>,
    terminal_outcome: Mutex<TerminalOutcome>,
}

impl<'a> Chain<'a> {
    fn new(middleware: &'a [Arc<dyn Middleware>], terminal: &'a dyn Terminal) -> Self {
        Self {
            middleware,
            terminal,
            advanced: middleware.iter().map(|_| AtomicBool::new(false)).collect(),
            outcomes: Mutex::new(vec![None; middleware.len()]),
            terminal_outcome: Mutex::new(TerminalOutcome::NotReached),
        }
    }

    pub(crate) fn mark_advanced(&self, index: usize) {
        if let Some(flag) = self.advanced.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    fn has_advanced(&self, index: usize) -> bool {
        self.advanced
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub(crate) fn run_from<'f>(
        &'f self,
        index: usize,
        conn: ConnectionRef,
        packet: &'f mut Packet,
    ) -> BoxFuture<'f, ()> {
        Box::pin(async move {
            let Some(middleware) = self.middleware.get(index) else {
                self.invoke_terminal(&conn, packet).await;
                return;
            };

            let next = Next { chain: self, index };
            let result = middleware.handle(&conn, packet, next).await;
            let advanced = self.has_advanced(index);

            match result {
                Ok(()) => {
                    let outcome = if advanced {
                        StepOutcome::Continue
                    } else {
                        debug!(middleware = middleware.name(), "middleware short-circuited");
                        StepOutcome::ShortCircuit
                    };
                    self.record(index, outcome);
                }
                Err(e) => {
                    warn!(
                        conn_id = %conn.id(),
                        middleware = middleware.name(),
                        error = %e,
                        "middleware failed (continuing)"
                    );
                    metrics::counter!(
                        MIDDLEWARE_ERRORS_TOTAL,
                        "middleware" => middleware.name().to_owned()
                    )
                    .increment(1);
                    self.record(index, StepOutcome::ErrorContinue(e));
                    if !advanced {
                        self.run_from(index + 1, conn, packet).await;
                    }
                }
            }
        })
    }

    async fn invoke_terminal(&self, conn: &ConnectionRef, packet: &Packet) {
        let outcome = match self.terminal.call(conn, packet).await {
            Ok(()) => TerminalOutcome::Completed,
            Err(e) => TerminalOutcome::Failed(e),
        };
        *self.terminal_outcome.lock() = outcome;
    }

    fn record(&self, index: usize, outcome: StepOutcome) {
        if let Some(slot) = self.outcomes.lock().get_mut(index) {
            *slot = Some(outcome);
        }
    }

    fn into_report(self) -> PipelineReport {
        let steps = self
            .outcomes
            .into_inner()
            .into_iter()
            .zip(self.middleware)
            .filter_map(|(outcome, m)| {
                outcome.map(|outcome| StepReport {
                    middleware: m.name().to_owned(),
                    outcome,
                })
            })
            .collect();
        PipelineReport {
            steps,
            terminal: self.terminal_outcome.into_inner(),
        }
    }
}
