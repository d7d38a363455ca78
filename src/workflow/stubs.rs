//! Untyped stubs: activities, child workflows and external workflows addressed by name.

use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    promise::CompletableResult,
    protocol::commands::Request,
    workflow::{
        options::{ActivityOptions, ChildWorkflowOptions},
        WorkflowContext, WorkflowExecution,
    },
};
use serde::de::DeserializeOwned;
use std::{cell::RefCell, rc::Rc};

/// Executes activities by name with a fixed set of options
#[derive(Clone)]
pub struct ActivityStub {
    ctx: WorkflowContext,
    options: ActivityOptions,
}

impl ActivityStub {
    pub(crate) fn new(ctx: WorkflowContext, options: ActivityOptions) -> Self {
        Self { ctx, options }
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    #[track_caller]
    pub fn execute<T: DeserializeOwned + Clone + 'static>(
        &self,
        name: &str,
        args: EncodedValues,
    ) -> CompletableResult<T> {
        self.execute_untyped(name, args).decode()
    }

    #[track_caller]
    pub fn execute_untyped(
        &self,
        name: &str,
        args: EncodedValues,
    ) -> CompletableResult<EncodedValues> {
        self.ctx.execute_activity_untyped(name, args, &self.options)
    }
}

#[derive(Default)]
struct ChildState {
    result: Option<CompletableResult<EncodedValues>>,
    execution: Option<CompletableResult<WorkflowExecution>>,
}

/// A single child workflow. It may be started once, after which it can be signalled and its
/// execution and result awaited.
#[derive(Clone)]
pub struct ChildWorkflowStub {
    ctx: WorkflowContext,
    workflow_type: String,
    options: ChildWorkflowOptions,
    state: Rc<RefCell<ChildState>>,
}

impl ChildWorkflowStub {
    pub(crate) fn new(
        ctx: WorkflowContext,
        workflow_type: &str,
        options: ChildWorkflowOptions,
    ) -> Self {
        Self {
            ctx,
            workflow_type: workflow_type.to_string(),
            options,
            state: Default::default(),
        }
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn options(&self) -> &ChildWorkflowOptions {
        &self.options
    }

    pub fn is_started(&self) -> bool {
        self.state.borrow().result.is_some()
    }

    /// Start the child. The returned result fulfills once the child's execution is known, which
    /// is separate from the child finishing.
    #[track_caller]
    pub fn start(
        &self,
        args: EncodedValues,
    ) -> Result<CompletableResult<WorkflowExecution>, WorkflowError> {
        if self.is_started() {
            return Err(WorkflowError::IllegalState(
                "Child workflow already has been executed".to_string(),
            ));
        }
        let req = Request::execute_child_workflow(&self.workflow_type, args, &self.options)?;
        let (id, result) = self.ctx.request_with_id(req, true);
        let execution = match id {
            Some(id) => self
                .ctx
                .request(Request::get_child_workflow_execution(id), true)
                .decode(),
            None => result.then(|_| {
                Err(WorkflowError::cancelled(
                    "Child workflow was never started",
                ))
            }),
        };
        debug!(workflow_type = %self.workflow_type, "Starting child workflow");
        let mut state = self.state.borrow_mut();
        state.result = Some(result);
        state.execution = Some(execution.clone());
        Ok(execution)
    }

    /// Start the child and return its eventual result
    #[track_caller]
    pub fn execute<T: DeserializeOwned + Clone + 'static>(
        &self,
        args: EncodedValues,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        self.start(args)?;
        self.result()
    }

    /// Resolves once the child's run id is known
    pub fn get_execution(&self) -> Result<CompletableResult<WorkflowExecution>, WorkflowError> {
        self.state
            .borrow()
            .execution
            .clone()
            .ok_or_else(not_started)
    }

    pub fn result<T: DeserializeOwned + Clone + 'static>(
        &self,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        Ok(self.result_untyped()?.decode())
    }

    pub fn result_untyped(&self) -> Result<CompletableResult<EncodedValues>, WorkflowError> {
        self.state.borrow().result.clone().ok_or_else(not_started)
    }

    /// Signal the started child. Only children started by this workflow can be signalled
    /// through a stub.
    #[track_caller]
    pub fn signal(
        &self,
        name: &str,
        args: EncodedValues,
    ) -> Result<CompletableResult<()>, WorkflowError> {
        let execution = self.get_execution()?;
        let ctx = self.ctx.clone();
        let namespace = self
            .options
            .namespace
            .clone()
            .unwrap_or_else(|| ctx.info().namespace.clone());
        let signal = name.to_string();
        Ok(execution.and_then(move |exec| {
            ctx.request(
                Request::signal_external_workflow(
                    &namespace,
                    &exec.workflow_id,
                    exec.run_id.as_deref(),
                    &signal,
                    args,
                    true,
                ),
                true,
            )
            .map(|_| ())
        }))
    }
}

fn not_started() -> WorkflowError {
    WorkflowError::IllegalState("Child workflow has not been started".to_string())
}

/// A workflow this run did not start, addressed by its execution
#[derive(Clone)]
pub struct ExternalWorkflowStub {
    ctx: WorkflowContext,
    execution: WorkflowExecution,
    namespace: String,
}

impl ExternalWorkflowStub {
    pub(crate) fn new(ctx: WorkflowContext, execution: WorkflowExecution) -> Self {
        let namespace = ctx.info().namespace.clone();
        Self {
            ctx,
            execution,
            namespace,
        }
    }

    /// Target a namespace other than this run's own
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    #[track_caller]
    pub fn signal(&self, name: &str, args: EncodedValues) -> CompletableResult<()> {
        self.ctx
            .request(
                Request::signal_external_workflow(
                    &self.namespace,
                    &self.execution.workflow_id,
                    self.execution.run_id.as_deref(),
                    name,
                    args,
                    false,
                ),
                true,
            )
            .map(|_| ())
    }

    /// Ask the orchestrator to cancel the external workflow
    #[track_caller]
    pub fn cancel(&self) -> CompletableResult<()> {
        self.ctx
            .request(
                Request::cancel_external_workflow(
                    &self.namespace,
                    &self.execution.workflow_id,
                    self.execution.run_id.as_deref(),
                ),
                true,
            )
            .map(|_| ())
    }
}
