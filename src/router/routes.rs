use super::{Route, WorkerServices};
use crate::{
    activity::ActContext,
    errors::{DispatchError, WorkflowError},
    payloads::EncodedValues,
    promise::Deferred,
    protocol::ServerCommand,
    workflow::{process::Process, WorkflowInfo},
};
use std::rc::Rc;

macro_rules! route {
    ($name:ident) => {
        pub(super) struct $name {
            services: Rc<WorkerServices>,
        }

        impl $name {
            pub(super) fn new(services: Rc<WorkerServices>) -> Self {
                Self { services }
            }
        }
    };
}

route!(StartWorkflow);
route!(InvokeSignal);
route!(InvokeQuery);
route!(InvokeUpdate);
route!(CancelWorkflow);
route!(DestroyWorkflow);
route!(StackTrace);
route!(InvokeActivity);

impl WorkerServices {
    fn process_for(&self, cmd: &ServerCommand) -> Result<Process, WorkflowError> {
        let run_id: String = cmd.option("runId")?;
        Ok(self.processes.get(&run_id)?)
    }
}

impl Route for StartWorkflow {
    fn name(&self) -> &'static str {
        "StartWorkflow"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let mut info: WorkflowInfo = cmd.option("info")?;
        let Some(run_id) = info.workflow_execution.run_id.clone() else {
            return Err(DispatchError::malformed(&cmd.name, "missing run id").into());
        };
        if info.task_queue_name.is_empty() {
            info.task_queue_name = self.services.options.task_queue.clone();
        }
        if info.namespace.is_empty() {
            info.namespace = self.services.options.namespace.clone();
        }
        let max = self.services.options.max_cached_workflows;
        if max > 0 && self.services.processes.len() >= max {
            return Err(DispatchError::CacheFull(max).into());
        }
        if self.services.processes.contains(&run_id) {
            return Err(DispatchError::DuplicateRun(run_id).into());
        }
        let wf_type = &info.workflow_type.name;
        let function = self
            .services
            .workflows
            .borrow()
            .get(wf_type)
            .cloned()
            .ok_or_else(|| DispatchError::WorkflowNotRegistered(wf_type.clone()))?;
        let process = Process::start(
            info,
            cmd.payloads,
            &function,
            self.services.client.clone(),
            self.services.env.clone(),
        );
        self.services.processes.add(process)?;
        answer.resolve(EncodedValues::empty());
        Ok(())
    }
}

impl Route for InvokeSignal {
    fn name(&self) -> &'static str {
        "InvokeSignal"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let process = self.services.process_for(&cmd)?;
        let name: String = cmd.option("name")?;
        let args = cmd.payloads;
        self.services.scheduler.on_signal(move || {
            process.signal(&name, args);
            answer.resolve(EncodedValues::empty());
        });
        Ok(())
    }
}

impl Route for InvokeQuery {
    fn name(&self) -> &'static str {
        "InvokeQuery"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let process = self.services.process_for(&cmd)?;
        let name: String = cmd.option("name")?;
        let args = cmd.payloads;
        self.services.scheduler.on_signal(move || {
            answer.settle(process.query(&name, args));
        });
        Ok(())
    }
}

impl Route for InvokeUpdate {
    fn name(&self) -> &'static str {
        "InvokeUpdate"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let process = self.services.process_for(&cmd)?;
        let name: String = cmd.option("name")?;
        let args = cmd.payloads;
        self.services.scheduler.on_signal(move || {
            process.update(&name, args).on_settled(move |r| {
                answer.settle(r.clone());
            });
        });
        Ok(())
    }
}

impl Route for CancelWorkflow {
    fn name(&self) -> &'static str {
        "CancelWorkflow"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        self.services.process_for(&cmd)?.cancel();
        answer.resolve(EncodedValues::empty());
        Ok(())
    }
}

impl Route for DestroyWorkflow {
    fn name(&self) -> &'static str {
        "DestroyWorkflow"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let run_id: String = cmd.option("runId")?;
        let process = self.services.processes.remove(&run_id)?;
        process.destroy();
        answer.resolve(EncodedValues::empty());
        Ok(())
    }
}

impl Route for StackTrace {
    fn name(&self) -> &'static str {
        "StackTrace"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        if !self.services.options.stack_trace_enabled {
            return Err(WorkflowError::IllegalState(
                "Stack traces are disabled for this worker".to_string(),
            ));
        }
        let trace = self.services.process_for(&cmd)?.stack_trace();
        answer.resolve(EncodedValues::from_value(&trace)?);
        Ok(())
    }
}

impl Route for InvokeActivity {
    fn name(&self) -> &'static str {
        "InvokeActivity"
    }

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError> {
        let activity_type: String = cmd.option("name")?;
        if !self.services.activities.contains(&activity_type) {
            return Err(DispatchError::ActivityNotRegistered(activity_type).into());
        }
        let ctx = ActContext {
            activity_type,
            invocation_id: cmd.id,
            header: cmd.header,
        };
        self.services.activities.start(ctx, cmd.payloads, answer);
        Ok(())
    }
}
