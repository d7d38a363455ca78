//! Workflow definitions and the machinery which runs them.

pub(crate) mod awaits;
mod context;
pub mod options;
pub(crate) mod process;
pub(crate) mod scope;
mod stubs;

pub use awaits::AwaitCondition;
pub use context::{ScopeHandle, WorkflowContext};
pub use options::{
    ActivityCancellationType, ActivityOptions, ChildWorkflowCancellationType,
    ChildWorkflowOptions, ContinueAsNewOptions, LocalActivityOptions, ParentClosePolicy,
    RetryPolicy,
};
pub use scope::ScopeKey;
pub use stubs::{ActivityStub, ChildWorkflowStub, ExternalWorkflowStub};

use crate::payloads::EncodedValues;
use futures_util::{future::LocalBoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    fmt::{Debug, Formatter},
    future::Future,
    rc::Rc,
};

/// The result of running a workflow function
pub type WorkflowResult<T> = Result<WfExitValue<T>, anyhow::Error>;

/// Workflow functions may return these values when exiting
#[derive(Debug, PartialEq, derive_more::From)]
pub enum WfExitValue<T> {
    /// Continue the workflow as a new execution
    #[from(ignore)]
    ContinueAsNew(Box<ContinueAsNew>),
    /// Confirm the workflow was cancelled
    #[from(ignore)]
    Cancelled,
    /// Finish with a result
    Normal(T),
}

impl<T> WfExitValue<T> {
    /// Construct a [WfExitValue::ContinueAsNew] variant (handles boxing)
    pub fn continue_as_new(can: ContinueAsNew) -> Self {
        Self::ContinueAsNew(Box::new(can))
    }
}

/// Everything needed to start the next run of a workflow continued as new
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinueAsNew {
    pub workflow_type: String,
    pub arguments: EncodedValues,
    pub options: ContinueAsNewOptions,
}

type WfFunc = dyn Fn(WorkflowContext) -> LocalBoxFuture<'static, WorkflowResult<EncodedValues>>;

/// The user's async function / workflow code
#[derive(Clone)]
pub struct WorkflowFunction {
    wf_func: Rc<WfFunc>,
}

impl<F, Fut, O> From<F> for WorkflowFunction
where
    F: Fn(WorkflowContext) -> Fut + 'static,
    Fut: Future<Output = WorkflowResult<O>> + 'static,
    O: Serialize,
{
    fn from(wf_func: F) -> Self {
        Self::new(wf_func)
    }
}

impl WorkflowFunction {
    /// Build a workflow function from a closure or function pointer which accepts a
    /// [WorkflowContext]
    pub fn new<F, Fut, O>(f: F) -> Self
    where
        F: Fn(WorkflowContext) -> Fut + 'static,
        Fut: Future<Output = WorkflowResult<O>> + 'static,
        O: Serialize,
    {
        Self {
            wf_func: Rc::new(move |ctx: WorkflowContext| {
                (f)(ctx)
                    .map(|r| {
                        r.and_then(|r| {
                            Ok(match r {
                                WfExitValue::ContinueAsNew(b) => WfExitValue::ContinueAsNew(b),
                                WfExitValue::Cancelled => WfExitValue::Cancelled,
                                WfExitValue::Normal(o) => {
                                    WfExitValue::Normal(EncodedValues::from_value(&o)?)
                                }
                            })
                        })
                    })
                    .boxed_local()
            }),
        }
    }

    pub(crate) fn start(
        &self,
        ctx: WorkflowContext,
    ) -> LocalBoxFuture<'static, WorkflowResult<EncodedValues>> {
        (self.wf_func)(ctx)
    }
}

impl Debug for WorkflowFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkflowFunction")
    }
}

/// Identifies a workflow execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    #[serde(rename = "ID")]
    pub workflow_id: String,
    #[serde(rename = "RunID", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Information about the running workflow, as supplied when it was started
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub task_queue_name: String,
    pub namespace: String,
    pub attempt: u32,
    pub cron_schedule: Option<String>,
    #[serde(rename = "ContinuedExecutionRunID")]
    pub continued_execution_run_id: Option<String>,
    pub parent_workflow_namespace: Option<String>,
    pub parent_workflow_execution: Option<WorkflowExecution>,
    pub search_attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Attempts to turn caught panics into something printable
pub(crate) fn panic_formatter(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<&str>() {
        Ok(s) => s.to_string(),
        Err(orig) => match orig.downcast::<String>() {
            Ok(s) => *s,
            Err(_) => "Couldn't turn panic into a string".to_string(),
        },
    }
}
