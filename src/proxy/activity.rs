use super::{decode_returning, ActivityInterface, MethodKind, MethodTable, Resolution};
use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    promise::CompletableResult,
    workflow::{ActivityOptions, ActivityStub, WorkflowContext},
};
use serde::de::DeserializeOwned;
use std::rc::Rc;

/// Executes the declared methods of an activity class. Stateless: every call is an independent
/// activity execution.
#[derive(Clone)]
pub struct ActivityProxy {
    class: String,
    table: Rc<MethodTable>,
    stub: ActivityStub,
}

impl ActivityProxy {
    pub(crate) fn new(
        ctx: WorkflowContext,
        interface: &ActivityInterface,
        options: ActivityOptions,
    ) -> Self {
        Self {
            class: interface.class.clone(),
            table: interface.method_table(),
            stub: ctx.new_activity_stub(options),
        }
    }

    /// Execute `method`, decoding its result per the declared return type
    #[track_caller]
    pub fn call<T: DeserializeOwned + Clone + 'static>(
        &self,
        method: &str,
        args: EncodedValues,
    ) -> Result<CompletableResult<T>, WorkflowError> {
        match self.table.resolve(method) {
            Resolution::Found(MethodKind::Activity, proto) => {
                let return_type = proto.return_type.clone();
                Ok(self
                    .stub
                    .execute_untyped(&proto.id, args)
                    .then(move |vals| decode_returning(&vals, return_type.as_ref())))
            }
            _ => Err(WorkflowError::BadMethodCall(format!(
                "Call to undefined activity method {}::{}()",
                self.class, method
            ))),
        }
    }
}
