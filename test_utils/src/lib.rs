//! Helpers for integration tests which drive a [Worker] through a [HostConnection], the way a
//! real host process would.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use temporal_workflow_runtime::{
    protocol::{Frame, Message, TickInfo},
    telemetry::{construct_filter_string, telemetry_init_global, Logger, TelemetryOptionsBuilder},
    EncodedValues, Failure, HostConnection, Worker, WorkerOptionsBuilder,
};
use tracing::Level;

pub const NAMESPACE: &str = "default";
pub const TEST_Q: &str = "q";
/// Request ids handed out by the runtime start here
pub const FIRST_REQUEST_ID: u64 = 9000;

type Reactor = Box<dyn FnMut(&Frame) -> Vec<Message>>;

/// Install a console subscriber for the test binary. Safe to call from every test.
pub fn init_test_logging() {
    let opts = TelemetryOptionsBuilder::default()
        .logging(Logger::Console {
            filter: construct_filter_string(Level::DEBUG, Level::WARN),
        })
        .build()
        .expect("telemetry options are valid");
    telemetry_init_global(&opts).expect("telemetry must initialize");
}

/// Create a worker serving a task queue derived from the test name
pub fn test_worker(test_name: &str) -> Worker {
    init_test_logging();
    Worker::new(
        WorkerOptionsBuilder::default()
            .task_queue(format!("{TEST_Q}-{test_name}"))
            .build()
            .expect("worker options are valid"),
    )
}

/// A host which delivers a fixed script of frames, plus whatever its reactor produces in reply
/// to each frame the worker sends back. Hangs up once there is nothing left to deliver.
pub struct ScriptedHost {
    inbound: VecDeque<Frame>,
    sent: Vec<Frame>,
    reactor: Option<Reactor>,
    clock: DateTime<Utc>,
    replay: bool,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            sent: vec![],
            reactor: None,
            clock: DateTime::parse_from_rfc3339("2021-01-12T15:21:52Z")
                .expect("valid timestamp")
                .with_timezone(&Utc),
            replay: false,
        }
    }

    /// Mark every frame delivered from now on as replayed history
    pub fn replaying(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    /// Queue a frame made of `messages`
    pub fn push(mut self, messages: Vec<Message>) -> Self {
        let frame = self.frame(messages);
        self.inbound.push_back(frame);
        self
    }

    /// Called with every frame the worker sends. A non-empty result is delivered as the next
    /// frame.
    pub fn react(mut self, reactor: impl FnMut(&Frame) -> Vec<Message> + 'static) -> Self {
        self.reactor = Some(Box::new(reactor));
        self
    }

    /// Every frame the worker has sent so far
    pub fn sent(&self) -> &[Frame] {
        &self.sent
    }

    /// Every message the worker has sent, across frames
    pub fn sent_messages(&self) -> impl Iterator<Item = &Message> {
        self.sent.iter().flat_map(|f| f.messages.iter())
    }

    /// The last request named `name` the worker issued
    pub fn last_request(&self, name: &str) -> Option<&Message> {
        self.sent_messages()
            .filter(|m| m.command.as_deref() == Some(name))
            .last()
    }

    /// The answer the worker gave to the command with id `id`
    pub fn answer_to(&self, id: u64) -> Option<&Message> {
        self.sent_messages()
            .find(|m| m.command.is_none() && m.id == id)
    }

    fn frame(&mut self, messages: Vec<Message>) -> Frame {
        self.clock += ChronoDuration::seconds(1);
        Frame::new(
            TickInfo {
                task_queue: TEST_Q.to_string(),
                tick_time: self.clock,
                replay: self.replay,
                rid: format!("rid-{}", self.sent.len()),
            },
            messages,
        )
    }
}

#[async_trait::async_trait(?Send)]
impl HostConnection for ScriptedHost {
    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        Ok(self.inbound.pop_front())
    }

    async fn send_frame(&mut self, frame: Frame) -> anyhow::Result<()> {
        let reply = match self.reactor.as_mut() {
            Some(reactor) => reactor(&frame),
            None => vec![],
        };
        self.sent.push(frame);
        if !reply.is_empty() {
            let frame = self.frame(reply);
            self.inbound.push_back(frame);
        }
        Ok(())
    }
}

/// A reactor answering every request named in `names` with an empty success
pub fn complete_requests(names: &'static [&'static str]) -> impl FnMut(&Frame) -> Vec<Message> {
    move |frame| {
        frame
            .messages
            .iter()
            .filter(|m| m.command.as_deref().is_some_and(|c| names.contains(&c)))
            .map(|m| respond_empty(m.id))
            .collect()
    }
}

fn command(id: u64, name: &str, options: Value, payloads: EncodedValues) -> Message {
    Message {
        id,
        command: Some(name.to_string()),
        options: match options {
            Value::Object(m) => m,
            _ => Default::default(),
        },
        payloads,
        ..Default::default()
    }
}

/// A `StartWorkflow` command for a run of `workflow_type`
pub fn start_workflow(id: u64, workflow_type: &str, run_id: &str, args: EncodedValues) -> Message {
    command(
        id,
        "StartWorkflow",
        json!({ "info": {
            "WorkflowExecution": { "ID": format!("wf-{run_id}"), "RunID": run_id },
            "WorkflowType": { "Name": workflow_type },
            "TaskQueueName": TEST_Q,
            "Namespace": NAMESPACE,
            "Attempt": 1,
        }}),
        args,
    )
}

pub fn signal(id: u64, run_id: &str, name: &str, args: EncodedValues) -> Message {
    command(
        id,
        "InvokeSignal",
        json!({ "runId": run_id, "name": name }),
        args,
    )
}

pub fn query(id: u64, run_id: &str, name: &str) -> Message {
    command(
        id,
        "InvokeQuery",
        json!({ "runId": run_id, "name": name }),
        EncodedValues::empty(),
    )
}

pub fn invoke_activity(id: u64, name: &str, args: EncodedValues) -> Message {
    command(id, "InvokeActivity", json!({ "name": name }), args)
}

pub fn destroy_workflow(id: u64, run_id: &str) -> Message {
    command(
        id,
        "DestroyWorkflow",
        json!({ "runId": run_id }),
        EncodedValues::empty(),
    )
}

pub fn respond<T: Serialize + ?Sized>(id: u64, value: &T) -> Message {
    Message::response(id, Ok(encode(value)))
}

pub fn respond_empty(id: u64) -> Message {
    Message::response(id, Ok(EncodedValues::empty()))
}

pub fn respond_failure(id: u64, failure: Failure) -> Message {
    Message::response(id, Err(failure))
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> EncodedValues {
    EncodedValues::from_value(value).expect("test values serialize")
}
