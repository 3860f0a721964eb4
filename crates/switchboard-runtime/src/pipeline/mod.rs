//! Chain-of-responsibility middleware dispatch.
//!
//! - [`Middleware`]: one step, forwards through [`Next`] or short-circuits
//! - [`Terminal`]: the end of the chain (the route handler at dispatch time)
//! - [`MiddlewarePipeline`]: ordered middleware list; each `process` call
//!   runs on fresh per-message state and returns a [`PipelineReport`]
//! - [`TraceMiddleware`]: logs every packet passing through

pub mod builtin;
pub mod chain;
pub mod middleware;

pub use builtin::TraceMiddleware;
pub use chain::{MiddlewarePipeline, PipelineReport, StepOutcome, StepReport, TerminalOutcome};
pub use middleware::{Middleware, Next, Terminal};
