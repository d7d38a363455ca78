mod activity_tasks;
mod conditions;
mod replay_flag;
mod workflow_cancels;
mod workflow_tasks;

use crate::{
    payloads::EncodedValues,
    test_help::{answer, command_names, FrameBuilder, TestWorker, TEST_Q, TEST_RUN},
    workflow::{WfExitValue, WorkflowContext, WorkflowResult},
    WorkerOptionsBuilder,
};
use std::time::Duration;

async fn sleepy_wf(ctx: WorkflowContext) -> WorkflowResult<()> {
    ctx.timer(Duration::from_secs(60)).await?;
    Ok(WfExitValue::Normal(()))
}

fn failure_message(msgs: &[crate::protocol::Message], id: u64) -> String {
    answer(msgs, id)
        .failure
        .as_ref()
        .map(|f| f.message.clone())
        .unwrap_or_default()
}

#[test]
fn unknown_commands_are_rejected() {
    let mut t = TestWorker::new();
    let out = t.send(
        FrameBuilder::new()
            .command("Bogus", serde_json::json!({}), EncodedValues::empty())
            .build(),
    );
    assert_eq!(failure_message(&out, 1), "Method Bogus is not registered");
    assert!(command_names(&out).is_empty());
}

#[test]
fn unregistered_workflow_type_is_rejected() {
    let mut t = TestWorker::new();
    let out = t.start("nope", EncodedValues::empty());
    assert_eq!(
        failure_message(&out, 1),
        "Workflow with the specified name \"nope\" was not registered"
    );
    assert_eq!(t.worker.cached_workflows(), 0);
}

#[test]
fn duplicate_run_is_rejected() {
    let mut t = TestWorker::new();
    t.register_wf("sleepy", sleepy_wf);
    let out = t.start("sleepy", EncodedValues::empty());
    assert!(answer(&out, 1).failure.is_none());
    let out = t.start("sleepy", EncodedValues::empty());
    assert!(failure_message(&out, 1).contains("has already been started"));
    assert_eq!(t.worker.cached_workflows(), 1);
}

#[test]
fn full_cache_rejects_new_runs() {
    let mut t = TestWorker::with_options(
        WorkerOptionsBuilder::default()
            .task_queue(TEST_Q)
            .max_cached_workflows(1_usize)
            .build()
            .unwrap(),
    );
    t.register_wf("sleepy", sleepy_wf);
    t.start("sleepy", EncodedValues::empty());
    let out = t.send(
        FrameBuilder::new()
            .start_workflow("sleepy", "run-2", EncodedValues::empty())
            .build(),
    );
    assert_eq!(failure_message(&out, 1), "Workflow cache is full (1 runs)");
}

#[test]
fn destroyed_runs_forget_their_requests() {
    let mut t = TestWorker::new();
    t.register_wf("sleepy", sleepy_wf);
    let out = t.start("sleepy", EncodedValues::empty());
    assert_eq!(command_names(&out), vec!["NewTimer"]);

    let out = t.send(
        FrameBuilder::new()
            .run_command("DestroyWorkflow", TEST_RUN)
            .build(),
    );
    assert!(answer(&out, 1).failure.is_none());
    assert_eq!(t.worker.cached_workflows(), 0);

    // The late timer response no longer has anyone waiting on it
    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    assert!(out.is_empty());

    let out = t.send(FrameBuilder::new().signal(TEST_RUN, "x", EncodedValues::empty()).build());
    assert!(failure_message(&out, 1).contains("not found"));
}

#[test]
fn stack_trace_shows_blocking_call_sites() {
    let mut t = TestWorker::new();
    t.register_wf("sleepy", sleepy_wf);
    t.start("sleepy", EncodedValues::empty());
    let out = t.send(FrameBuilder::new().run_command("StackTrace", TEST_RUN).build());
    let trace: String = answer(&out, 1).payloads.get_value(0).unwrap();
    assert!(trace.starts_with("workflow: NewTimer at "), "{trace}");
    assert!(trace.contains("core_tests"), "{trace}");
}

#[test]
fn stack_traces_can_be_disabled() {
    let mut t = TestWorker::with_options(
        WorkerOptionsBuilder::default()
            .task_queue(TEST_Q)
            .stack_trace_enabled(false)
            .build()
            .unwrap(),
    );
    t.register_wf("sleepy", sleepy_wf);
    t.start("sleepy", EncodedValues::empty());
    let out = t.send(FrameBuilder::new().run_command("StackTrace", TEST_RUN).build());
    assert_eq!(
        failure_message(&out, 1),
        "Stack traces are disabled for this worker"
    );
}
