pub mod activity;
pub mod backoff;
pub mod client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod event_log;
pub mod executor;
pub mod queue;
pub mod worker;
pub mod workflow;

pub use activity::{decode_input, encode_output, Activity, ActivityContext, ActivityRegistry};
pub use client::{ClientConfig, ClientError, WorkflowClient, WorkflowHandle};
pub use domain::activity::{
    ActivityError, ActivityOptions, ActivityTask, ActivityTaskId, CommandId, RetryPolicy,
};
pub use domain::event::{EventKind, HistoryEvent, SequenceNo};
pub use domain::execution::{
    RunId, WorkflowExecution, WorkflowId, WorkflowOptions, WorkflowStatus,
};
pub use domain::payload::{Payload, PayloadError};
pub use errors::{ErrorClass, WorkflowError};
pub use event_log::{EventLog, InMemoryEventLog, LeaseToken, LogError};
pub use executor::{ActivityExecutor, Resolution};
pub use queue::{InMemoryTaskQueue, Lease, QueueError, QueuedTask, TaskQueue};
pub use worker::{Worker, WorkerConfig, WorkerError};
pub use workflow::{
    ActivityCall, ActivityHandle, Interrupt, WorkflowContext, WorkflowDefinition,
    WorkflowRegistry, WorkflowResult,
};
