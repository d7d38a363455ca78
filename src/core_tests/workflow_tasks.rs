use crate::{
    errors::WorkflowError,
    failure::{Failure, FailureInfo},
    payloads::EncodedValues,
    promise::{all, race},
    test_help::{
        answer, command_names, commands, only_command, vals, FrameBuilder, TestWorker,
    },
    workflow::{
        ActivityOptions, ContinueAsNew, LocalActivityOptions, WfExitValue, WorkflowContext,
        WorkflowResult,
    },
};
use assert_matches::assert_matches;
use rstest::rstest;
use serde_json::json;
use std::{collections::HashMap, time::Duration};

fn activity_opts() -> ActivityOptions {
    ActivityOptions {
        start_to_close_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

async fn timer_wf(ctx: WorkflowContext) -> WorkflowResult<String> {
    ctx.timer(Duration::from_secs(1)).await?;
    Ok(WfExitValue::Normal("done".to_string()))
}

#[test]
fn single_timer() {
    let mut t = TestWorker::new();
    t.register_wf("timer_wf", timer_wf);
    let out = t.start("timer_wf", EncodedValues::empty());
    assert!(answer(&out, 1).failure.is_none());
    let timer = only_command(&out, "NewTimer");
    assert_eq!(timer.id, 9000);
    assert_eq!(timer.options["ms"], 1000);

    // Nothing happens until the timer fires
    let out = t.send(vec![]);
    assert!(out.is_empty());

    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    let done = only_command(&out, "CompleteWorkflow");
    assert!(done.failure.is_none());
    assert_eq!(done.payloads.get_value::<String>(0).unwrap(), "done");
}

async fn greet_args(ctx: WorkflowContext) -> WorkflowResult<String> {
    let name: String = ctx.get_args().get_value(0)?;
    Ok(WfExitValue::Normal(format!(
        "hello {name} from {}",
        ctx.info().workflow_type.name
    )))
}

#[test]
fn workflow_sees_its_arguments_and_info() {
    let mut t = TestWorker::new();
    t.register_wf("greet", greet_args);
    let out = t.start("greet", vals("bob"));
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(
        done.payloads.get_value::<String>(0).unwrap(),
        "hello bob from greet"
    );
}

async fn failing_wf(_ctx: WorkflowContext) -> WorkflowResult<()> {
    Err(anyhow::anyhow!("no good"))
}

async fn panicking_wf(_ctx: WorkflowContext) -> WorkflowResult<()> {
    panic!("oh no");
}

async fn nondeterministic_wf(ctx: WorkflowContext) -> WorkflowResult<()> {
    ctx.timer(Duration::from_secs(1)).await?;
    Ok(WfExitValue::Normal(()))
}

#[test]
fn errors_fail_the_workflow() {
    let mut t = TestWorker::new();
    t.register_wf("failing", failing_wf);
    let out = t.start("failing", EncodedValues::empty());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(done.failure.as_ref().unwrap().message, "no good");
}

#[test]
fn panics_become_panic_commands() {
    let mut t = TestWorker::new();
    t.register_wf("panicking", panicking_wf);
    let out = t.start("panicking", EncodedValues::empty());
    let panic = only_command(&out, "Panic");
    assert!(panic
        .failure
        .as_ref()
        .unwrap()
        .message
        .contains("oh no"));
    assert_eq!(command_names(&out), vec!["Panic"]);
}

#[test]
fn nondeterminism_reported_by_server_panics() {
    let mut t = TestWorker::new();
    t.register_wf("nd", nondeterministic_wf);
    t.start("nd", EncodedValues::empty());
    let out = t.send(
        FrameBuilder::new()
            .fail(
                9000,
                Failure {
                    message: "nondeterministic workflow: unexpected timer".to_string(),
                    info: FailureInfo::Server {
                        non_retryable: true,
                    },
                    ..Default::default()
                },
            )
            .build(),
    );
    assert_eq!(command_names(&out), vec!["Panic"]);
}

async fn activity_wf(ctx: WorkflowContext) -> WorkflowResult<String> {
    match ctx
        .execute_activity::<String>("greet", vals("bob"), &activity_opts())
        .await
    {
        Ok(s) => Ok(WfExitValue::Normal(s)),
        Err(WorkflowError::Failure(f)) => {
            Ok(WfExitValue::Normal(format!("failed: {}", f.message)))
        }
        Err(e) => Err(e.into()),
    }
}

#[rstest]
#[case::completes(Ok("hi bob"), "hi bob")]
#[case::fails(Err("activity broke"), "failed: activity broke")]
fn activity_results_reach_the_workflow(
    #[case] response: Result<&str, &str>,
    #[case] expected: &str,
) {
    let mut t = TestWorker::new();
    t.register_wf("activity_wf", activity_wf);
    let out = t.start("activity_wf", EncodedValues::empty());
    let act = only_command(&out, "ExecuteActivity");
    assert_eq!(act.options["name"], "greet");
    assert_eq!(act.options["options"]["StartToCloseTimeout"], 5_000_000_000_u64);
    assert_eq!(act.payloads.get_value::<String>(0).unwrap(), "bob");

    let frame = match response {
        Ok(v) => FrameBuilder::new().respond(act.id, &v),
        Err(m) => FrameBuilder::new().fail(act.id, Failure::application(m, "Error")),
    };
    let out = t.send(frame.build());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(done.payloads.get_value::<String>(0).unwrap(), expected);
}

async fn bad_activity_options(ctx: WorkflowContext) -> WorkflowResult<bool> {
    let remote = ctx
        .execute_activity::<String>("greet", EncodedValues::empty(), &Default::default())
        .await;
    let local = ctx
        .execute_local_activity::<String>(
            "greet",
            EncodedValues::empty(),
            &LocalActivityOptions::default(),
        )
        .await;
    Ok(WfExitValue::Normal(
        matches!(remote, Err(WorkflowError::InvalidArgument(_)))
            && matches!(local, Err(WorkflowError::InvalidArgument(_))),
    ))
}

#[test]
fn activities_without_close_timeout_are_never_sent() {
    let mut t = TestWorker::new();
    t.register_wf("bad", bad_activity_options);
    let out = t.start("bad", EncodedValues::empty());
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert!(only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());
}

async fn parallel_timers(ctx: WorkflowContext) -> WorkflowResult<Vec<u32>> {
    let a = ctx.timer(Duration::from_secs(1)).map(|_| 1_u32);
    let b = ctx.timer(Duration::from_secs(2)).map(|_| 2_u32);
    let first = race([b.clone(), a.clone()]).await?;
    let both = all([a, b]).await?;
    Ok(WfExitValue::Normal(
        std::iter::once(first).chain(both).collect(),
    ))
}

#[test]
fn requests_are_issued_in_order_and_resolved_by_id() {
    let mut t = TestWorker::new();
    t.register_wf("parallel", parallel_timers);
    let out = t.start("parallel", EncodedValues::empty());
    let ids: Vec<_> = commands(&out).iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![9000, 9001]);

    let out = t.send(FrameBuilder::new().respond_empty(9001).build());
    assert!(out.is_empty());
    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(done.payloads.get_value::<Vec<u32>>(0).unwrap(), vec![2, 1, 2]);
}

async fn versioned(ctx: WorkflowContext) -> WorkflowResult<i32> {
    let v = ctx.get_version("new-greeting", 1, 2).await?;
    Ok(WfExitValue::Normal(v))
}

#[test]
fn get_version_uses_recorded_version() {
    let mut t = TestWorker::new();
    t.register_wf("versioned", versioned);
    let out = t.start("versioned", EncodedValues::empty());
    let req = only_command(&out, "GetVersion");
    assert_eq!(req.options["changeID"], "new-greeting");
    assert_eq!(req.options["maxSupported"], 2);
    let out = t.send(FrameBuilder::new().respond(req.id, &1).build());
    assert_eq!(
        only_command(&out, "CompleteWorkflow")
            .payloads
            .get_value::<i32>(0)
            .unwrap(),
        1
    );
}

async fn upserting(ctx: WorkflowContext) -> WorkflowResult<()> {
    ctx.upsert_search_attributes(HashMap::from([("CustomKeywordField".to_string(), json!("x"))]));
    Ok(WfExitValue::Normal(()))
}

#[test]
fn search_attribute_upserts_are_fire_and_forget() {
    let mut t = TestWorker::new();
    t.register_wf("upserting", upserting);
    let out = t.start("upserting", EncodedValues::empty());
    assert_eq!(
        command_names(&out),
        vec!["UpsertSearchAttributes", "CompleteWorkflow"]
    );
    assert_eq!(
        out[1].options["searchAttributes"]["CustomKeywordField"],
        "x"
    );
}

async fn continue_via_exit(_ctx: WorkflowContext) -> WorkflowResult<()> {
    Ok(WfExitValue::continue_as_new(ContinueAsNew {
        workflow_type: "next_wf".to_string(),
        arguments: vals(&7),
        options: Default::default(),
    }))
}

#[test]
fn continue_as_new_exit_value() {
    let mut t = TestWorker::new();
    t.register_wf("can", continue_via_exit);
    let out = t.start("can", EncodedValues::empty());
    let can = only_command(&out, "ContinueAsNew");
    assert_eq!(can.options["name"], "next_wf");
    assert_eq!(can.payloads.get_value::<i32>(0).unwrap(), 7);
    assert_eq!(command_names(&out), vec!["ContinueAsNew"]);
}

async fn complete_early(ctx: WorkflowContext) -> WorkflowResult<()> {
    ctx.complete(&"early")?;
    let late = ctx.timer(Duration::from_secs(1)).await;
    assert_matches!(late, Err(e) if e.is_cancellation());
    Ok(WfExitValue::Normal(()))
}

#[test]
fn completed_workflows_issue_nothing_further() {
    let mut t = TestWorker::new();
    t.register_wf("early", complete_early);
    let out = t.start("early", EncodedValues::empty());
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert_eq!(
        out[1].payloads.get_value::<String>(0).unwrap(),
        "early"
    );
}
