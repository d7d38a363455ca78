//! The worker: owns every run on a task queue and turns inbound frames into outbound ones.

use crate::{
    activity::IntoActivityFunc,
    environment::Environment,
    errors::ProtocolError,
    payloads::EncodedValues,
    promise::CompletableResult,
    protocol::{Frame, Inbound, Message},
    proxy::WorkflowPrototype,
    router::{Router, WorkerServices},
    telemetry::VecDisplayer,
    workflow::WorkflowFunction,
};
use std::{cell::RefCell, rc::Rc};

/// Defines per-worker configuration options
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct WorkerOptions {
    /// The namespace runs belong to unless their start command says otherwise
    #[builder(default = "\"default\".to_string()")]
    pub namespace: String,
    /// What task queue does this worker serve?
    pub task_queue: String,
    /// Reported to the orchestrator to identify this worker
    #[builder(default, setter(into, strip_option))]
    pub identity: Option<String>,
    /// Maximum number of runs held at once. Start commands beyond it are rejected. Zero means no
    /// limit.
    #[builder(default = "0")]
    pub max_cached_workflows: usize,
    /// If false, `StackTrace` commands are rejected
    #[builder(default = "true")]
    pub stack_trace_enabled: bool,
}

impl WorkerOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref tq) = self.task_queue {
            if tq.is_empty() {
                return Err("`task_queue` must not be empty".to_owned());
            }
        }
        Ok(())
    }
}

/// The transport to the host process relaying orchestrator traffic
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait::async_trait(?Send)]
pub trait HostConnection {
    /// Wait for the next frame. `None` means the host hung up.
    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;

    async fn send_frame(&mut self, frame: Frame) -> anyhow::Result<()>;
}

/// Runs workflows and activities on one task queue
pub struct Worker {
    services: Rc<WorkerServices>,
    router: Router,
    /// Answers to server commands, in arrival order, which have not settled yet
    unanswered: RefCell<Vec<(u64, CompletableResult<EncodedValues>)>>,
}

impl Worker {
    pub fn new(options: WorkerOptions) -> Self {
        info!(task_queue = %options.task_queue, namespace = %options.namespace,
              "Initializing worker");
        let services = Rc::new(WorkerServices::new(options));
        Self {
            router: Router::new(services.clone()),
            services,
            unanswered: RefCell::new(vec![]),
        }
    }

    /// Returns the task queue name this worker serves
    pub fn task_queue(&self) -> &str {
        &self.services.options.task_queue
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.services.options
    }

    /// Register a Workflow function to invoke when the Worker is asked to run a workflow of
    /// `workflow_type`
    pub fn register_wf(
        &self,
        workflow_type: impl Into<String>,
        wf_function: impl Into<WorkflowFunction>,
    ) {
        self.services
            .workflows
            .borrow_mut()
            .insert(workflow_type.into(), wf_function.into());
    }

    /// Register the workflow function implementing a declared workflow
    pub fn register_workflow(
        &self,
        prototype: &WorkflowPrototype,
        wf_function: impl Into<WorkflowFunction>,
    ) {
        self.register_wf(prototype.name.clone(), wf_function);
    }

    /// Register an Activity function to invoke when the Worker is asked to run an activity of
    /// `activity_type`
    pub fn register_activity<A, R>(
        &self,
        activity_type: impl Into<String>,
        act_function: impl IntoActivityFunc<A, R>,
    ) {
        self.services
            .activities
            .register(activity_type.into(), act_function.into_activity_fn());
    }

    /// Number of runs currently held
    pub fn cached_workflows(&self) -> usize {
        self.services.processes.len()
    }

    /// Process one inbound frame and return the frame to send back.
    ///
    /// Server commands are routed as they arrive. Then queued signal and query deliveries run,
    /// followed by responses to earlier requests, and finally every run is resumed until it blocks.
    /// The outbound frame carries the answers to every command which settled, followed by the
    /// requests issued while processing.
    pub fn dispatch(&self, frame: Frame) -> Frame {
        let span = info_span!("dispatch", task_queue = %self.task_queue(),
                              rid = %frame.context.rid, replay = frame.context.replay);
        let _entered = span.enter();
        *self.services.env.borrow_mut() = Environment::from(&frame.context);

        let mut responses = vec![];
        for msg in frame.messages {
            match msg.classify() {
                Inbound::Command(cmd) => {
                    let id = cmd.id;
                    let answer = self.router.dispatch(cmd);
                    self.unanswered.borrow_mut().push((id, answer));
                }
                Inbound::Response(resp) => {
                    responses.push(resp.id);
                    let client = self.services.client.clone();
                    self.services.scheduler.on_callback(move || {
                        if let Err(e) = client.dispatch(resp) {
                            warn!(error = %e, "Dropping response");
                        }
                    });
                }
            }
        }
        if !responses.is_empty() {
            trace!(responses = %responses.display(), "Queued responses");
        }
        let services = Rc::downgrade(&self.services);
        self.services.scheduler.on_tick(move || {
            if let Some(services) = services.upgrade() {
                for process in services.processes.all() {
                    process.run_until_blocked();
                }
            }
        });
        self.services.scheduler.tick();
        self.services.activities.poll();

        let mut messages = self.take_answers();
        messages.extend(self.services.client.fetch());
        Frame::new(frame.context, messages)
    }

    /// [Worker::dispatch] on an encoded frame
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let frame = Frame::decode(bytes)?;
        self.dispatch(frame).encode()
    }

    fn take_answers(&self) -> Vec<Message> {
        let mut unanswered = self.unanswered.borrow_mut();
        let mut out = vec![];
        unanswered.retain(|(id, answer)| match answer.peek() {
            Some(result) => {
                out.push(Message::response(*id, result.map_err(|e| e.to_failure())));
                false
            }
            None => true,
        });
        out
    }

    /// Serve frames from the host until it hangs up
    pub async fn run(&self, conn: &mut dyn HostConnection) -> anyhow::Result<()> {
        while let Some(frame) = conn.next_frame().await? {
            let out = self.dispatch(frame);
            conn.send_frame(out).await?;
        }
        info!(task_queue = %self.task_queue(), "Host connection closed, worker stopping");
        Ok(())
    }
}
