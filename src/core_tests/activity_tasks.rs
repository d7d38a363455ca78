use crate::{
    activity::{ActContext, ActivityError, ActivityFunction},
    payloads::EncodedValues,
    test_help::{answer, command_names, vals, FrameBuilder, TestWorker},
};
use rstest::rstest;
use serde_json::json;

fn invoke(name: &str, args: EncodedValues) -> FrameBuilder {
    FrameBuilder::new().command("InvokeActivity", json!({ "name": name }), args)
}

fn worker_with_activities() -> TestWorker {
    let t = TestWorker::new();
    t.worker
        .register_activity("greet", |ctx: ActContext, name: String| async move {
            Ok::<_, ActivityError>(format!("{} says hello to {name}", ctx.activity_type))
        });
    t.worker
        .register_activity("divide", |_ctx: ActContext, (a, b): (i64, i64)| async move {
            if b == 0 {
                return Err(ActivityError::NonRetryable(anyhow::anyhow!("division by zero")));
            }
            Ok(a / b)
        });
    t.worker.register_activity(
        "cancelling",
        |_ctx: ActContext, _: ()| async move { Err::<(), _>(ActivityError::cancelled()) },
    );
    t
}

#[test]
fn activity_results_answer_the_invocation() {
    let mut t = worker_with_activities();
    let out = t.send(invoke("greet", vals("bob")).build());
    assert_eq!(
        answer(&out, 1).payloads.get_value::<String>(0).unwrap(),
        "greet says hello to bob"
    );
    assert!(command_names(&out).is_empty());
}

#[rstest]
#[case::non_retryable("divide", vals(&(1, 0)), "division by zero", false)]
#[case::cancelled("cancelling", vals(&()), "Activity cancelled", true)]
#[case::bad_arguments("divide", vals("nope"), "invalid type", false)]
fn activity_errors_become_failures(
    #[case] name: &str,
    #[case] args: EncodedValues,
    #[case] message: &str,
    #[case] cancelled: bool,
) {
    let mut t = worker_with_activities();
    let out = t.send(invoke(name, args).build());
    let failure = answer(&out, 1).failure.clone().unwrap();
    assert!(failure.message.contains(message), "{failure:?}");
    assert_eq!(failure.is_cancelled(), cancelled);
}

#[test]
fn unregistered_activities_are_rejected() {
    let mut t = worker_with_activities();
    let out = t.send(invoke("missing", EncodedValues::empty()).build());
    assert_eq!(
        answer(&out, 1).failure.as_ref().unwrap().message,
        "Activity with the specified name \"missing\" was not registered"
    );
}

#[test]
fn untyped_activities_see_every_argument() {
    let mut t = TestWorker::new();
    t.worker.register_activity(
        "count_args",
        ActivityFunction::untyped(|_ctx, args: EncodedValues| async move {
            Ok::<_, ActivityError>(EncodedValues::from_value(&args.len())?)
        }),
    );
    let args = vals(&1).with("two").unwrap().with(&3.0).unwrap();
    let out = t.send(invoke("count_args", args).build());
    assert_eq!(answer(&out, 1).payloads.get_value::<usize>(0).unwrap(), 3);
}
