//! A deterministic workflow runtime for Temporal workers whose traffic is relayed by a host
//! process.
//!
//! The host delivers batches ([protocol::Frame]) of orchestrator commands and responses. The
//! [Worker] routes each command, resumes every workflow run until it blocks again, and returns
//! the requests its runs issued. Workflow code is written against [WorkflowContext], which turns
//! every operation whose outcome could differ on replay into a request recorded in history.
//!
//! Everything runs on one thread. Concurrency within a run is structural: cancellation scopes
//! interleave deterministically and only ever suspend on requests and awaited conditions.

#[macro_use]
extern crate tracing;

pub mod activity;
mod client;
mod environment;
pub mod errors;
pub mod failure;
pub mod payloads;
pub mod promise;
pub mod protocol;
pub mod proxy;
mod router;
mod scheduler;
pub mod telemetry;
mod worker;
pub mod workflow;

#[cfg(test)]
mod core_tests;

pub use activity::{ActContext, ActivityError, ActivityFunction, IntoActivityFunc};
pub use client::Client;
pub use environment::Environment;
pub use errors::{DispatchError, PayloadConversionError, ProtocolError, WorkflowError};
pub use failure::{Failure, FailureInfo};
pub use payloads::{EncodedValues, Payload};
pub use promise::{all, any, race, CompletableResult, Deferred};
pub use scheduler::Scheduler;
pub use worker::{HostConnection, Worker, WorkerOptions, WorkerOptionsBuilder};
#[cfg(any(test, feature = "mocks"))]
pub use worker::MockHostConnection;
pub use workflow::{
    AwaitCondition, ScopeHandle, WfExitValue, WorkflowContext, WorkflowExecution,
    WorkflowFunction, WorkflowInfo, WorkflowResult,
};
