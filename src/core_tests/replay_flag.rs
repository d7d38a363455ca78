use crate::{
    payloads::EncodedValues,
    test_help::{only_command, vals, FrameBuilder, TestWorker},
    workflow::{WfExitValue, WorkflowContext, WorkflowResult},
};
use rstest::rstest;
use std::{cell::Cell, rc::Rc};
use uuid::Uuid;

async fn side_effect_wf(ctx: WorkflowContext, calls: Rc<Cell<u32>>) -> WorkflowResult<u32> {
    let value = ctx
        .side_effect(move || {
            calls.set(calls.get() + 1);
            Ok(42_u32)
        })
        .await?;
    Ok(WfExitValue::Normal(value))
}

#[rstest]
#[case::live(false, 1)]
#[case::replaying(true, 0)]
fn side_effects_only_run_when_not_replaying(#[case] replay: bool, #[case] expected_calls: u32) {
    let mut t = TestWorker::new();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    t.register_wf("side_effect", move |ctx: WorkflowContext| side_effect_wf(ctx, c.clone()));
    t.replay = replay;

    let out = t.start("side_effect", EncodedValues::empty());
    assert_eq!(calls.get(), expected_calls);
    let req = only_command(&out, "SideEffect");
    if replay {
        assert!(req.payloads.is_null_at(0));
    } else {
        assert_eq!(req.payloads.get_value::<u32>(0).unwrap(), 42);
    }

    // Either way the value recorded in history wins
    let out = t.send(FrameBuilder::new().respond(req.id, &42).build());
    assert_eq!(
        only_command(&out, "CompleteWorkflow")
            .payloads
            .get_value::<u32>(0)
            .unwrap(),
        42
    );
}

async fn failing_side_effect(ctx: WorkflowContext) -> WorkflowResult<String> {
    let res = ctx
        .side_effect::<u32, _>(|| Err(anyhow::anyhow!("dice fell off the table")))
        .await;
    Ok(WfExitValue::Normal(
        res.err().map(|e| e.to_string()).unwrap_or_default(),
    ))
}

#[test]
fn failing_side_effect_is_never_recorded() {
    let mut t = TestWorker::new();
    t.register_wf("failing", failing_side_effect);
    let out = t.start("failing", EncodedValues::empty());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(
        done.payloads.get_value::<String>(0).unwrap(),
        "dice fell off the table"
    );
}

async fn uuid_wf(ctx: WorkflowContext) -> WorkflowResult<Uuid> {
    Ok(WfExitValue::Normal(ctx.uuid4().await?))
}

#[test]
fn uuids_come_from_history() {
    let mut t = TestWorker::new();
    t.register_wf("uuid", uuid_wf);
    let out = t.start("uuid", EncodedValues::empty());
    let req = only_command(&out, "SideEffect");
    let generated: Uuid = req.payloads.get_value(0).unwrap();
    let recorded = Uuid::new_v4();
    assert_ne!(generated, recorded);

    let out = t.send(FrameBuilder::new().respond(req.id, &recorded).build());
    assert_eq!(
        only_command(&out, "CompleteWorkflow")
            .payloads
            .get_value::<Uuid>(0)
            .unwrap(),
        recorded
    );
}

async fn clock_wf(ctx: WorkflowContext) -> WorkflowResult<(bool, String)> {
    Ok(WfExitValue::Normal((
        ctx.is_replaying(),
        ctx.now().to_rfc3339(),
    )))
}

#[test]
fn workflow_clock_and_replay_flag_come_from_the_frame() {
    let mut t = TestWorker::new();
    t.register_wf("clock", clock_wf);
    t.replay = true;
    let out = t.start("clock", vals(&()));
    let (replaying, now) = only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<(bool, String)>(0)
        .unwrap();
    assert!(replaying);
    assert_eq!(now, t.time.to_rfc3339());
}
