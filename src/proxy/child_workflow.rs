use super::{decode_returning, MethodKind, MethodTable, Resolution, WorkflowPrototype};
use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    promise::CompletableResult,
    workflow::{ChildWorkflowOptions, ChildWorkflowStub, WorkflowContext, WorkflowExecution},
};
use serde::de::DeserializeOwned;
use std::rc::Rc;

/// A single child workflow driven through its declared methods. The first call to the workflow's
/// run method starts it. Afterwards signal methods signal it; query and update methods can never
/// be invoked through this proxy.
#[derive(Clone)]
pub struct ChildWorkflowProxy {
    class: String,
    table: Rc<MethodTable>,
    stub: ChildWorkflowStub,
}

impl ChildWorkflowProxy {
    pub(crate) fn new(
        ctx: WorkflowContext,
        prototype: &WorkflowPrototype,
        options: ChildWorkflowOptions,
    ) -> Self {
        Self {
            class: prototype.class.clone(),
            table: prototype.method_table(),
            stub: ctx.new_untyped_child_workflow_stub(&prototype.name, options),
        }
    }

    #[track_caller]
    pub fn call<T: DeserializeOwned + Clone + 'static>(
        &self,
        method: &str,
        args: EncodedValues,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        match self.table.resolve(method) {
            Resolution::Found(MethodKind::Run, proto) => {
                self.stub.start(args)?;
                let return_type = proto.return_type.clone();
                Ok(self
                    .stub
                    .result_untyped()?
                    .then(move |vals| decode_returning(&vals, return_type.as_ref())))
            }
            Resolution::Found(MethodKind::Signal, proto) => {
                if !self.stub.is_started() {
                    return Err(WorkflowError::IllegalState(format!(
                        "Signal method {}::{}() cannot be called before the child workflow is \
                         started",
                        self.class, method
                    )));
                }
                Ok(self
                    .stub
                    .signal(&proto.id, args)?
                    .then(|()| decode_returning(&EncodedValues::empty(), None)))
            }
            Resolution::Found(kind @ (MethodKind::Query | MethodKind::Update), _) => {
                Err(WorkflowError::BadMethodCall(format!(
                    "{} method {}::{}() cannot be executed from a child workflow stub",
                    if kind == MethodKind::Query {
                        "Query"
                    } else {
                        "Update"
                    },
                    self.class,
                    method
                )))
            }
            _ => Err(WorkflowError::BadMethodCall(format!(
                "Call to undefined method {}::{}()",
                self.class, method
            ))),
        }
    }

    /// Resolves once the child's run id is known. Fails if the child was not started yet.
    pub fn get_execution(&self) -> Result<CompletableResult<WorkflowExecution>, WorkflowError> {
        self.stub.get_execution()
    }

    /// The stub this proxy drives
    pub fn stub(&self) -> &ChildWorkflowStub {
        &self.stub
    }
}
