use super::{decode_returning, MethodKind, MethodTable, Resolution, WorkflowPrototype};
use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    promise::CompletableResult,
    workflow::{ExternalWorkflowStub, WorkflowContext, WorkflowExecution},
};
use serde::de::DeserializeOwned;
use std::rc::Rc;

/// Signals a running workflow through its declared signal methods
#[derive(Clone)]
pub struct ExternalWorkflowProxy {
    class: String,
    table: Rc<MethodTable>,
    stub: ExternalWorkflowStub,
}

impl ExternalWorkflowProxy {
    pub(crate) fn new(
        ctx: WorkflowContext,
        prototype: &WorkflowPrototype,
        execution: WorkflowExecution,
    ) -> Self {
        Self {
            class: prototype.class.clone(),
            table: prototype.method_table(),
            stub: ctx.new_external_workflow_stub(execution),
        }
    }

    #[track_caller]
    pub fn call<T: DeserializeOwned + Clone + 'static>(
        &self,
        method: &str,
        args: EncodedValues,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        match self.table.resolve(method) {
            Resolution::Found(MethodKind::Signal, proto) => Ok(self
                .stub
                .signal(&proto.id, args)
                .then(|()| decode_returning(&EncodedValues::empty(), None))),
            _ => Err(WorkflowError::BadMethodCall(format!(
                "Method {}::{}() cannot be called: external workflow stubs only support signal \
                 methods",
                self.class, method
            ))),
        }
    }

    /// Ask the orchestrator to cancel the workflow
    #[track_caller]
    pub fn cancel(&self) -> CompletableResult<()> {
        self.stub.cancel()
    }

    pub fn execution(&self) -> &WorkflowExecution {
        self.stub.execution()
    }
}
