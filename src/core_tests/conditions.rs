use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    test_help::{command_names, only_command, FrameBuilder, TestWorker, TEST_RUN},
    workflow::{AwaitCondition, WfExitValue, WorkflowContext, WorkflowResult},
};
use std::{cell::Cell, rc::Rc, time::Duration};

async fn wait_for_unblock(ctx: WorkflowContext) -> WorkflowResult<bool> {
    let unblocked = Rc::new(Cell::new(false));
    let flag = unblocked.clone();
    ctx.register_signal("unblock", move |_| {
        flag.set(true);
        Ok(())
    });
    let flag = unblocked.clone();
    let in_time = ctx
        .await_with_timeout(
            Duration::from_secs(5),
            vec![AwaitCondition::predicate(move || flag.get())],
        )
        .await?;
    Ok(WfExitValue::Normal(in_time))
}

#[test]
fn condition_met_before_timeout_cancels_timer() {
    let mut t = TestWorker::new();
    t.register_wf("unblock", wait_for_unblock);
    let out = t.start("unblock", EncodedValues::empty());
    let timer = only_command(&out, "NewTimer");
    assert_eq!(timer.options["ms"], 5000);

    let out = t.send(
        FrameBuilder::new()
            .signal(TEST_RUN, "unblock", EncodedValues::empty())
            .build(),
    );
    assert_eq!(command_names(&out), vec!["Cancel", "CompleteWorkflow"]);
    assert_eq!(
        only_command(&out, "Cancel").options["ids"],
        serde_json::json!([timer.id])
    );
    assert!(only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());
}

#[test]
fn timeout_before_condition_resolves_false() {
    let mut t = TestWorker::new();
    t.register_wf("unblock", wait_for_unblock);
    t.start("unblock", EncodedValues::empty());

    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert!(!only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());

    // Signals after completion are dropped
    let out = t.send(
        FrameBuilder::new()
            .signal(TEST_RUN, "unblock", EncodedValues::empty())
            .build(),
    );
    assert!(command_names(&out).is_empty());
}

async fn already_true(ctx: WorkflowContext) -> WorkflowResult<(bool, bool)> {
    let immediate = ctx.wait_condition(|| true);
    let settled_synchronously = immediate.is_complete();
    let nothing = ctx.await_conditions(vec![]).await;
    Ok(WfExitValue::Normal((
        settled_synchronously && immediate.await?,
        matches!(nothing, Err(WorkflowError::InvalidArgument(_))),
    )))
}

#[test]
fn satisfied_predicates_resolve_immediately() {
    let mut t = TestWorker::new();
    t.register_wf("already_true", already_true);
    let out = t.start("already_true", EncodedValues::empty());
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert_eq!(
        only_command(&out, "CompleteWorkflow")
            .payloads
            .get_value::<(bool, bool)>(0)
            .unwrap(),
        (true, true)
    );
}

async fn count_to_three(ctx: WorkflowContext) -> WorkflowResult<u32> {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    ctx.register_signal("tick", move |_| {
        c.set(c.get() + 1);
        Ok(())
    });
    let c = count.clone();
    ctx.wait_condition(move || c.get() >= 3).await?;
    Ok(WfExitValue::Normal(count.get()))
}

#[test]
fn predicates_are_reevaluated_every_frame() {
    let mut t = TestWorker::new();
    t.register_wf("count", count_to_three);
    t.start("count", EncodedValues::empty());
    let out = t.send(
        FrameBuilder::new()
            .signal(TEST_RUN, "tick", EncodedValues::empty())
            .signal(TEST_RUN, "tick", EncodedValues::empty())
            .build(),
    );
    assert!(command_names(&out).is_empty());
    let out = t.send(
        FrameBuilder::new()
            .signal(TEST_RUN, "tick", EncodedValues::empty())
            .build(),
    );
    assert_eq!(
        only_command(&out, "CompleteWorkflow")
            .payloads
            .get_value::<u32>(0)
            .unwrap(),
        3
    );
}

async fn await_forever(ctx: WorkflowContext) -> WorkflowResult<()> {
    match ctx.wait_condition(|| false).await {
        Err(e) if e.is_cancellation() => Ok(WfExitValue::Cancelled),
        other => {
            other?;
            Ok(WfExitValue::Normal(()))
        }
    }
}

#[test]
fn cancelling_workflow_rejects_pending_awaits() {
    let mut t = TestWorker::new();
    t.register_wf("forever", await_forever);
    let out = t.start("forever", EncodedValues::empty());
    assert!(command_names(&out).is_empty());
    let out = t.send(
        FrameBuilder::new()
            .run_command("CancelWorkflow", TEST_RUN)
            .build(),
    );
    let done = only_command(&out, "CompleteWorkflow");
    assert!(done.failure.as_ref().unwrap().is_cancelled());
}
