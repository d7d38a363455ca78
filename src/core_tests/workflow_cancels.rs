use crate::{
    errors::WorkflowError,
    payloads::EncodedValues,
    test_help::{answer, command_names, only_command, FrameBuilder, TestWorker, TEST_RUN},
    workflow::{WfExitValue, WorkflowContext, WorkflowResult},
};
use std::{cell::Cell, rc::Rc, time::Duration};

async fn cancellable_timer(ctx: WorkflowContext) -> WorkflowResult<()> {
    match ctx.timer(Duration::from_secs(60)).await {
        Err(e) if e.is_cancellation() => Ok(WfExitValue::Cancelled),
        other => {
            other?;
            Ok(WfExitValue::Normal(()))
        }
    }
}

#[test]
fn cancelling_workflow_cancels_sent_timer() {
    let mut t = TestWorker::new();
    t.register_wf("cancellable", cancellable_timer);
    t.start("cancellable", EncodedValues::empty());

    let out = t.send(
        FrameBuilder::new()
            .run_command("CancelWorkflow", TEST_RUN)
            .build(),
    );
    assert!(answer(&out, 1).failure.is_none());
    let cancel = only_command(&out, "Cancel");
    assert_eq!(cancel.options["ids"], serde_json::json!([9000]));
    assert_eq!(command_names(&out), vec!["Cancel"]);

    // The timer's late response settles it as cancelled
    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    let done = only_command(&out, "CompleteWorkflow");
    assert!(done.failure.as_ref().unwrap().is_cancelled());
}

async fn nested_scopes(ctx: WorkflowContext) -> WorkflowResult<bool> {
    let outer = ctx.new_cancellation_scope(|parent| async move {
        let inner = parent.new_cancellation_scope(|child| async move {
            let first = child.timer(Duration::from_secs(10)).await;
            let second = child.timer(Duration::from_secs(1)).await;
            anyhow::Ok(
                first.is_err_and(|e| e.is_cancellation())
                    && matches!(second, Err(WorkflowError::Cancelled(_))),
            )
        });
        anyhow::Ok(inner.await?)
    });
    outer.cancel();
    let saw_cancellation = outer.await?;
    Ok(WfExitValue::Normal(saw_cancellation))
}

#[test]
fn cancelled_parent_cancels_child_requests() {
    let mut t = TestWorker::new();
    t.register_wf("nested", nested_scopes);
    let out = t.start("nested", EncodedValues::empty());
    // The child's timer was still queued, so it was dropped rather than sent
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert!(only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());
}

async fn detached_survives(ctx: WorkflowContext) -> WorkflowResult<(bool, Option<String>)> {
    let outer = ctx.new_cancellation_scope(|parent| async move {
        let detached = parent.new_detached_cancellation_scope(|d| async move {
            d.timer(Duration::from_secs(1)).await?;
            anyhow::Ok("detached done".to_string())
        });
        let attached = parent.new_cancellation_scope(|c| async move {
            c.timer(Duration::from_secs(1)).await?;
            anyhow::Ok("attached done".to_string())
        });
        let attached = attached.await;
        let detached = detached.await;
        anyhow::Ok((
            attached.is_err_and(|e| e.is_cancellation()),
            detached.ok(),
        ))
    });
    outer.cancel();
    Ok(WfExitValue::Normal(outer.await?))
}

#[test]
fn detached_scopes_outlive_cancelled_parent() {
    let mut t = TestWorker::new();
    t.register_wf("detached", detached_survives);
    let out = t.start("detached", EncodedValues::empty());
    let timer = only_command(&out, "NewTimer");
    assert_eq!(timer.id, 9000);

    let out = t.send(FrameBuilder::new().respond_empty(9000).build());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(
        done.payloads
            .get_value::<(bool, Option<String>)>(0)
            .unwrap(),
        (true, Some("detached done".to_string()))
    );
}

async fn cancel_handlers(ctx: WorkflowContext) -> WorkflowResult<(bool, bool, bool)> {
    let fired = Rc::new(Cell::new(false));
    let scope = ctx.new_cancellation_scope(|c| async move {
        c.timer(Duration::from_secs(1)).await?;
        anyhow::Ok(())
    });
    let f = fired.clone();
    scope.on_cancel(move || f.set(true));
    scope.cancel();
    let res = scope.result().await;
    let late = Rc::new(Cell::new(false));
    let l = late.clone();
    scope.on_cancel(move || l.set(true));
    Ok(WfExitValue::Normal((
        fired.get() && late.get(),
        scope.is_cancelled(),
        res.is_err_and(|e| e.is_cancellation()),
    )))
}

#[test]
fn cancel_handlers_run_on_cancel() {
    let mut t = TestWorker::new();
    t.register_wf("handlers", cancel_handlers);
    let out = t.start("handlers", EncodedValues::empty());
    let done = only_command(&out, "CompleteWorkflow");
    assert_eq!(
        done.payloads.get_value::<(bool, bool, bool)>(0).unwrap(),
        (true, true, true)
    );
}

async fn complete_from_child(ctx: WorkflowContext) -> WorkflowResult<bool> {
    let inner = ctx.new_cancellation_scope(|c| async move {
        anyhow::Ok(matches!(
            c.complete(&"nope"),
            Err(WorkflowError::IllegalState(_))
        ))
    });
    Ok(WfExitValue::Normal(inner.await?))
}

#[test]
fn only_root_scope_may_complete() {
    let mut t = TestWorker::new();
    t.register_wf("child_complete", complete_from_child);
    let out = t.start("child_complete", EncodedValues::empty());
    assert_eq!(command_names(&out), vec!["CompleteWorkflow"]);
    assert!(only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());
}

async fn await_in_cancelled_scope(ctx: WorkflowContext) -> WorkflowResult<bool> {
    let scope = ctx.new_cancellation_scope(|c| async move {
        c.timer(Duration::from_secs(1)).await.ok();
        let waited = c.wait_condition(|| true).await;
        anyhow::Ok(matches!(waited, Err(WorkflowError::Cancelled(_))))
    });
    scope.cancel();
    Ok(WfExitValue::Normal(scope.await?))
}

#[test]
fn awaiting_in_cancelled_scope_fails() {
    let mut t = TestWorker::new();
    t.register_wf("await_cancelled", await_in_cancelled_scope);
    let out = t.start("await_cancelled", EncodedValues::empty());
    assert!(only_command(&out, "CompleteWorkflow")
        .payloads
        .get_value::<bool>(0)
        .unwrap());
}
