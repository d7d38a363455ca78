use assert_matches::assert_matches;
use serde_json::{json, Value};
use temporal_workflow_runtime::{
    protocol::Frame, ActContext, ActivityError, ProtocolError, WfExitValue, WorkflowContext,
    WorkflowResult,
};
use test_utils::test_worker;

fn to_bytes(v: Value) -> Vec<u8> {
    serde_json::to_vec(&v).unwrap()
}

fn context() -> Value {
    json!({
        "taskQueue": "q",
        "tickTime": "2021-01-12T15:21:52Z",
        "replay": false,
        "rid": "r-1",
    })
}

#[test]
fn activity_invocation_over_json() {
    let worker = test_worker("activity_invocation_over_json");
    worker.register_activity("shout", |_ctx: ActContext, s: String| async move {
        Ok::<_, ActivityError>(s.to_uppercase())
    });
    let input = to_bytes(json!({
        "context": context(),
        "messages": [{
            "id": 1,
            "command": "InvokeActivity",
            "options": { "name": "shout" },
            // "bob"
            "payloads": [{ "metadata": { "encoding": "json/plain" }, "data": "ImJvYiI=" }],
        }],
    }));

    let out = worker.dispatch_bytes(&input).unwrap();
    let raw: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(raw["context"]["rid"], "r-1");
    assert_eq!(raw["messages"][0]["id"], 1);
    assert!(raw["messages"][0].get("command").is_none());
    assert!(raw["messages"][0].get("failure").is_none());

    let frame = Frame::decode(&out).unwrap();
    assert_eq!(
        frame.messages[0].payloads.get_value::<String>(0).unwrap(),
        "BOB"
    );
}

#[test]
fn unknown_commands_are_answered_with_a_failure() {
    let worker = test_worker("unknown_commands_are_answered_with_a_failure");
    let input = to_bytes(json!({
        "context": context(),
        "messages": [{ "id": 7, "command": "Bogus" }],
    }));
    let raw: Value = serde_json::from_slice(&worker.dispatch_bytes(&input).unwrap()).unwrap();
    assert_eq!(raw["messages"][0]["id"], 7);
    assert_eq!(
        raw["messages"][0]["failure"]["message"],
        "Method Bogus is not registered"
    );
}

async fn hello(_ctx: WorkflowContext) -> WorkflowResult<&'static str> {
    Ok(WfExitValue::Normal("hi"))
}

#[test]
fn started_workflow_completes_in_the_same_frame() {
    let worker = test_worker("started_workflow_completes_in_the_same_frame");
    worker.register_wf("hello", hello);
    let input = to_bytes(json!({
        "context": context(),
        "messages": [{
            "id": 1,
            "command": "StartWorkflow",
            "options": { "info": {
                "WorkflowExecution": { "ID": "wf-1", "RunID": "run-1" },
                "WorkflowType": { "Name": "hello" },
            }},
        }],
    }));
    let raw: Value = serde_json::from_slice(&worker.dispatch_bytes(&input).unwrap()).unwrap();
    let messages = raw["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["id"], 1);
    assert_eq!(messages[1]["command"], "CompleteWorkflow");
    assert_eq!(messages[1]["id"], 9000);
}

#[test]
fn malformed_frames_are_rejected() {
    let worker = test_worker("malformed_frames_are_rejected");
    assert_matches!(
        worker.dispatch_bytes(b"{\"messages\": 12}"),
        Err(ProtocolError::MalformedFrame(_))
    );
}
