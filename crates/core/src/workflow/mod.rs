//! Deterministic workflow replay.
//!
//! A workflow definition is plain synchronous code over a [`WorkflowContext`].
//! Each decision folds the history into a [`ReplayState`], re-runs the
//! definition from the top, and compares the commands it issues with the ones
//! already recorded.

pub mod context;
pub mod definition;
pub mod engine;
pub mod replay;

pub use context::{ActivityCall, ActivityHandle, Interrupt, WorkflowContext, WorkflowResult};
pub use definition::{WorkflowDefinition, WorkflowRegistry};
pub use engine::{WorkflowDecision, WorkflowEngine};
pub use replay::{CommandOutcome, ReplayState, ScheduledCommand};
