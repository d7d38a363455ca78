use crate::errors::WorkflowError;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, time::Duration};

/// Determines what happens to an activity when the scope that requested it is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ActivityCancellationType {
    /// Request cancellation and immediately report the activity as cancelled
    #[default]
    TryCancel,
    /// Request cancellation and wait for the activity to confirm it
    WaitCancellationCompleted,
    /// Do not request cancellation of the activity
    Abandon,
}

/// Options for scheduling an activity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivityOptions {
    /// Identifier to use for tracking the activity in Workflow history.
    /// If `None` the orchestrator assigns one.
    #[serde(rename = "ActivityID", skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// Task queue to schedule the activity in. If `None`, use the workflow's task queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_queue: Option<String>,
    /// Time that the Activity Task can stay in the Task Queue before it is picked up by a Worker.
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub schedule_to_start_timeout: Option<Duration>,
    /// Maximum time of a single Activity execution attempt.
    /// Either this option or `schedule_to_close_timeout` is required.
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub start_to_close_timeout: Option<Duration>,
    /// Total time that a workflow is willing to wait for Activity to complete, including retries.
    /// Either this option or `start_to_close_timeout` is required.
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub schedule_to_close_timeout: Option<Duration>,
    /// Heartbeat interval. Activity must heartbeat before this interval passes after a last
    /// heartbeat or activity start.
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<Duration>,
    pub cancellation_type: ActivityCancellationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityOptions {
    pub(crate) fn validate(&self) -> Result<(), WorkflowError> {
        require_close_timeout(self.start_to_close_timeout, self.schedule_to_close_timeout)
    }
}

/// Options for scheduling a local activity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalActivityOptions {
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub schedule_to_close_timeout: Option<Duration>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub start_to_close_timeout: Option<Duration>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub schedule_to_start_timeout: Option<Duration>,
    /// Retry backoffs over this amount will use a timer rather than a local retry
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub local_retry_threshold: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl LocalActivityOptions {
    pub(crate) fn validate(&self) -> Result<(), WorkflowError> {
        require_close_timeout(self.start_to_close_timeout, self.schedule_to_close_timeout)
    }
}

fn require_close_timeout(
    start_to_close: Option<Duration>,
    schedule_to_close: Option<Duration>,
) -> Result<(), WorkflowError> {
    if start_to_close.is_none() && schedule_to_close.is_none() {
        return Err(WorkflowError::InvalidArgument(
            "Either StartToCloseTimeout or ScheduleToCloseTimeout is required".to_string(),
        ));
    }
    Ok(())
}

/// How a child workflow reacts to its parent closing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ParentClosePolicy {
    #[default]
    Terminate,
    Abandon,
    RequestCancel,
}

/// Determines what happens to a child workflow when the requesting scope is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ChildWorkflowCancellationType {
    Abandon,
    TryCancel,
    #[default]
    WaitCancellationCompleted,
    WaitCancellationRequested,
}

/// Options for starting a child workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChildWorkflowOptions {
    /// Defaults to the parent's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// If `None` the orchestrator generates one
    #[serde(rename = "WorkflowID", skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_queue: Option<String>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub workflow_execution_timeout: Option<Duration>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub workflow_run_timeout: Option<Duration>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub workflow_task_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<String>,
    pub parent_close_policy: ParentClosePolicy,
    pub cancellation_type: ChildWorkflowCancellationType,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub memo: HashMap<String, Value>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub search_attributes: HashMap<String, Value>,
}

/// Options for continuing the current workflow as a new run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContinueAsNewOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_queue: Option<String>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub workflow_run_timeout: Option<Duration>,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub workflow_task_timeout: Option<Duration>,
}

/// Server side retry policy attached to activities and child workflows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub initial_interval: Option<Duration>,
    pub backoff_coefficient: f64,
    #[serde(with = "nanos", skip_serializing_if = "Option::is_none")]
    pub maximum_interval: Option<Duration>,
    /// 0 means unlimited
    pub maximum_attempts: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub non_retryable_error_types: Vec<String>,
}

/// Durations travel as integer nanoseconds
mod nanos {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }
}
