use super::{decode_returning, MethodKind, MethodTable, Resolution, WorkflowPrototype};
use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    promise::CompletableResult,
    workflow::{ContinueAsNewOptions, WorkflowContext},
};
use serde::de::DeserializeOwned;
use std::{cell::Cell, rc::Rc};

/// Continues the current workflow as a new run of the declared workflow. Usable exactly once:
/// any call after the first fails, whatever method it names.
pub struct ContinueAsNewProxy {
    ctx: WorkflowContext,
    workflow_type: String,
    class: String,
    table: Rc<MethodTable>,
    options: ContinueAsNewOptions,
    called: Cell<bool>,
}

impl ContinueAsNewProxy {
    pub(crate) fn new(
        ctx: WorkflowContext,
        prototype: &WorkflowPrototype,
        options: ContinueAsNewOptions,
    ) -> Self {
        Self {
            ctx,
            workflow_type: prototype.name.clone(),
            class: prototype.class.clone(),
            table: prototype.method_table(),
            options,
            called: Cell::new(false),
        }
    }

    pub fn is_called(&self) -> bool {
        self.called.get()
    }

    /// Continue as new through the workflow's run method. The result never settles.
    #[track_caller]
    pub fn call<T: DeserializeOwned + Clone + 'static>(
        &self,
        method: &str,
        args: EncodedValues,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        if self.called.replace(true) {
            return Err(WorkflowError::BadMethodCall(format!(
                "Method {}::{}() cannot be called: continue as new has already been called \
                 within this stub",
                self.class, method
            )));
        }
        match self.table.resolve(method) {
            Resolution::Found(MethodKind::Run, proto) => {
                let return_type = proto.return_type.clone();
                Ok(self
                    .ctx
                    .continue_as_new(&self.workflow_type, args, &self.options)
                    .then(move |vals| decode_returning(&vals, return_type.as_ref())))
            }
            _ => Err(WorkflowError::BadMethodCall(format!(
                "Call to undefined workflow method {}::{}()",
                self.class, method
            ))),
        }
    }
}
