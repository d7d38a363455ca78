use std::{cell::Cell, collections::HashMap, rc::Rc, time::Duration};
use temporal_workflow_runtime::{
    protocol::{Frame, Message},
    workflow::ActivityOptions,
    ActContext, ActivityError, EncodedValues, MockHostConnection, WfExitValue, WorkflowContext,
    WorkflowResult,
};
use test_utils::{
    complete_requests, destroy_workflow, encode, invoke_activity, query, signal, start_workflow,
    test_worker, ScriptedHost, FIRST_REQUEST_ID,
};

async fn sleepy(ctx: WorkflowContext) -> WorkflowResult<String> {
    ctx.timer(Duration::from_secs(1)).await?;
    ctx.timer(Duration::from_secs(1)).await?;
    Ok(WfExitValue::Normal("rested".to_string()))
}

#[tokio::test]
async fn timers_complete_through_the_host_loop() {
    let worker = test_worker("timers_complete_through_the_host_loop");
    worker.register_wf("sleepy", sleepy);
    let mut host = ScriptedHost::new()
        .push(vec![start_workflow(1, "sleepy", "run-1", EncodedValues::empty())])
        .react(complete_requests(&["NewTimer"]));
    worker.run(&mut host).await.unwrap();

    assert_eq!(host.sent().len(), 3);
    assert!(host.answer_to(1).unwrap().failure.is_none());
    let timers: Vec<u64> = host
        .sent_messages()
        .filter(|m| m.command.as_deref() == Some("NewTimer"))
        .map(|m| m.id)
        .collect();
    assert_eq!(timers, vec![FIRST_REQUEST_ID, FIRST_REQUEST_ID + 1]);
    let done = host.last_request("CompleteWorkflow").unwrap();
    assert_eq!(done.payloads.get_value::<String>(0).unwrap(), "rested");
}

async fn greeter(ctx: WorkflowContext) -> WorkflowResult<String> {
    let greeting: String = ctx
        .execute_activity(
            "greet",
            encode("bob"),
            &ActivityOptions {
                start_to_close_timeout: Some(Duration::from_secs(10)),
                ..Default::default()
            },
        )
        .await?;
    Ok(WfExitValue::Normal(greeting))
}

/// Plays the orchestrator: every scheduled activity is handed back to the same worker, and its
/// answer becomes the response to the workflow's request
fn relay_activities() -> impl FnMut(&Frame) -> Vec<Message> {
    let mut relayed: HashMap<u64, u64> = HashMap::new();
    let mut next_id = 100;
    move |frame| {
        let mut reply = vec![];
        for m in &frame.messages {
            match m.command.as_deref() {
                Some("ExecuteActivity") => {
                    let name = m.options["name"].as_str().unwrap_or_default();
                    relayed.insert(next_id, m.id);
                    reply.push(invoke_activity(next_id, name, m.payloads.clone()));
                    next_id += 1;
                }
                None => {
                    if let Some(req) = relayed.remove(&m.id) {
                        let result = match &m.failure {
                            Some(f) => Err(f.clone()),
                            None => Ok(m.payloads.clone()),
                        };
                        reply.push(Message::response(req, result));
                    }
                }
                _ => {}
            }
        }
        reply
    }
}

#[tokio::test]
async fn workflow_and_activity_share_a_worker() {
    let worker = test_worker("workflow_and_activity_share_a_worker");
    worker.register_wf("greeter", greeter);
    worker.register_activity("greet", |_ctx: ActContext, name: String| async move {
        Ok::<_, ActivityError>(format!("hello {name}"))
    });
    let mut host = ScriptedHost::new()
        .push(vec![start_workflow(1, "greeter", "run-1", EncodedValues::empty())])
        .react(relay_activities());
    worker.run(&mut host).await.unwrap();

    let act = host.last_request("ExecuteActivity").unwrap();
    assert_eq!(act.id, FIRST_REQUEST_ID);
    assert_eq!(act.options["name"], "greet");
    assert_eq!(
        host.answer_to(100)
            .unwrap()
            .payloads
            .get_value::<String>(0)
            .unwrap(),
        "hello bob"
    );
    let done = host.last_request("CompleteWorkflow").unwrap();
    assert_eq!(done.payloads.get_value::<String>(0).unwrap(), "hello bob");
}

async fn counter(ctx: WorkflowContext) -> WorkflowResult<u32> {
    let count = Rc::new(Cell::new(0_u32));
    let c = count.clone();
    ctx.register_signal("inc", move |_| {
        c.set(c.get() + 1);
        Ok(())
    });
    let c = count.clone();
    ctx.register_query("count", move |_| Ok(EncodedValues::from_value(&c.get())?));
    let c = count.clone();
    ctx.wait_condition(move || c.get() >= 2).await?;
    Ok(WfExitValue::Normal(count.get()))
}

#[tokio::test]
async fn signals_and_queries_until_destroyed() {
    let worker = test_worker("signals_and_queries_until_destroyed");
    worker.register_wf("counter", counter);
    let mut host = ScriptedHost::new()
        .push(vec![
            start_workflow(1, "counter", "run-1", EncodedValues::empty()),
            signal(2, "run-1", "inc", EncodedValues::empty()),
            query(3, "run-1", "count"),
        ])
        .push(vec![
            signal(4, "run-1", "inc", EncodedValues::empty()),
            query(5, "run-1", "count"),
        ])
        .push(vec![destroy_workflow(6, "run-1"), query(7, "run-1", "count")]);
    worker.run(&mut host).await.unwrap();

    let count_at = |id| {
        host.answer_to(id)
            .unwrap()
            .payloads
            .get_value::<u32>(0)
            .unwrap()
    };
    assert_eq!(count_at(3), 1);
    assert_eq!(count_at(5), 2);
    assert_eq!(
        host.last_request("CompleteWorkflow")
            .unwrap()
            .payloads
            .get_value::<u32>(0)
            .unwrap(),
        2
    );
    assert!(host.answer_to(6).unwrap().failure.is_none());
    assert_eq!(
        host.answer_to(7).unwrap().failure.as_ref().unwrap().message,
        "Workflow with the specified run identifier \"run-1\" not found"
    );
    assert_eq!(worker.cached_workflows(), 0);
}

#[tokio::test]
async fn host_errors_stop_the_worker() {
    let worker = test_worker("host_errors_stop_the_worker");
    let mut conn = MockHostConnection::new();
    conn.expect_next_frame()
        .times(1)
        .returning(|| Err(anyhow::anyhow!("pipe closed")));
    conn.expect_send_frame().never();
    let err = worker.run(&mut conn).await.unwrap_err();
    assert_eq!(err.to_string(), "pipe closed");
}
