//! Activities hosted by the worker and run on `InvokeActivity` commands.

use crate::{
    errors::WorkflowError,
    failure::{Failure, FailureInfo},
    payloads::{EncodedValues, Payload},
    promise::Deferred,
};
use futures_util::{future::LocalBoxFuture, task::noop_waker_ref, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{Debug, Formatter},
    future::Future,
    rc::Rc,
    task::{Context, Poll},
};

/// What an activity knows about the invocation it is serving
#[derive(Debug, Clone, Default)]
pub struct ActContext {
    pub activity_type: String,
    /// Id of the command which invoked the activity
    pub invocation_id: u64,
    pub header: HashMap<String, Payload>,
}

/// Returned as errors from activity functions
#[derive(Debug)]
pub enum ActivityError {
    /// The default: the orchestrator may retry the activity per its retry policy
    Retryable(anyhow::Error),
    /// Return this error to indicate your activity is cancelling
    Cancelled {
        /// Some data to save as the cancellation reason
        details: Option<EncodedValues>,
    },
    /// The activity must not be retried
    NonRetryable(anyhow::Error),
}

impl<E> From<E> for ActivityError
where
    E: Into<anyhow::Error>,
{
    fn from(source: E) -> Self {
        Self::Retryable(source.into())
    }
}

impl ActivityError {
    /// Construct a cancelled error without details
    pub fn cancelled() -> Self {
        Self::Cancelled { details: None }
    }

    pub(crate) fn into_failure(self) -> Failure {
        match self {
            ActivityError::Retryable(e) => Failure::application(e.to_string(), "Error"),
            ActivityError::NonRetryable(e) => Failure {
                message: e.to_string(),
                info: FailureInfo::Application {
                    type_name: "Error".to_string(),
                    non_retryable: true,
                    details: EncodedValues::empty(),
                },
                ..Default::default()
            },
            ActivityError::Cancelled { details } => Failure {
                message: "Activity cancelled".to_string(),
                info: FailureInfo::Canceled {
                    details: details.unwrap_or_default(),
                },
                ..Default::default()
            },
        }
    }
}

type ActFuture = LocalBoxFuture<'static, Result<EncodedValues, ActivityError>>;
type BoxActFn = Rc<dyn Fn(ActContext, EncodedValues) -> ActFuture>;

/// Container for user-defined activity functions
#[derive(Clone)]
pub struct ActivityFunction {
    act_func: BoxActFn,
}

impl ActivityFunction {
    /// Wrap a function taking the raw argument list
    pub fn untyped<F, Fut>(f: F) -> Self
    where
        F: Fn(ActContext, EncodedValues) -> Fut + 'static,
        Fut: Future<Output = Result<EncodedValues, ActivityError>> + 'static,
    {
        Self {
            act_func: Rc::new(move |ctx, args| f(ctx, args).boxed_local()),
        }
    }
}

impl Debug for ActivityFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActivityFunction")
    }
}

/// Closures / functions which can be turned into activity functions implement this trait
pub trait IntoActivityFunc<Args, Res> {
    /// Consume the closure or fn pointer and turn it into a boxed activity function
    fn into_activity_fn(self) -> ActivityFunction;
}

impl<A, Rf, R, F> IntoActivityFunc<A, Rf> for F
where
    F: Fn(ActContext, A) -> Rf + 'static,
    A: DeserializeOwned,
    Rf: Future<Output = Result<R, ActivityError>> + 'static,
    R: Serialize,
{
    fn into_activity_fn(self) -> ActivityFunction {
        let f = Rc::new(self);
        ActivityFunction::untyped(move |ctx, args: EncodedValues| {
            let f = f.clone();
            async move {
                let arg: A = args
                    .get_value(0)
                    .map_err(|e| ActivityError::NonRetryable(e.into()))?;
                let out = f(ctx, arg).await?;
                EncodedValues::from_value(&out).map_err(|e| ActivityError::NonRetryable(e.into()))
            }
        })
    }
}

impl IntoActivityFunc<EncodedValues, EncodedValues> for ActivityFunction {
    fn into_activity_fn(self) -> ActivityFunction {
        self
    }
}

struct RunningActivity {
    future: ActFuture,
    answer: Deferred<EncodedValues>,
}

/// Registered activity functions plus the invocations still running
#[derive(Default)]
pub(crate) struct Activities {
    functions: RefCell<HashMap<String, ActivityFunction>>,
    running: RefCell<Vec<RunningActivity>>,
}

impl Activities {
    pub(crate) fn register(&self, activity_type: String, function: ActivityFunction) {
        self.functions.borrow_mut().insert(activity_type, function);
    }

    pub(crate) fn contains(&self, activity_type: &str) -> bool {
        self.functions.borrow().contains_key(activity_type)
    }

    /// Start an invocation. Returns false if the activity type is unknown.
    pub(crate) fn start(
        &self,
        ctx: ActContext,
        args: EncodedValues,
        answer: Deferred<EncodedValues>,
    ) -> bool {
        let Some(function) = self.functions.borrow().get(&ctx.activity_type).cloned() else {
            return false;
        };
        debug!(activity_type = %ctx.activity_type, invocation_id = ctx.invocation_id,
               "Starting activity");
        let future = (function.act_func)(ctx, args);
        self.running
            .borrow_mut()
            .push(RunningActivity { future, answer });
        true
    }

    /// Poll every running invocation once, settling the ones which finished
    pub(crate) fn poll(&self) {
        let running = std::mem::take(&mut *self.running.borrow_mut());
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut still_running = vec![];
        for mut act in running {
            match act.future.poll_unpin(&mut cx) {
                Poll::Ready(Ok(vals)) => {
                    act.answer.resolve(vals);
                }
                Poll::Ready(Err(e)) => {
                    let failure = e.into_failure();
                    warn!(error = %failure, "Activity failed");
                    act.answer.reject(WorkflowError::Failure(Box::new(failure)));
                }
                Poll::Pending => still_running.push(act),
            }
        }
        self.running.borrow_mut().extend(still_running);
    }

    #[cfg(test)]
    pub(crate) fn running_count(&self) -> usize {
        self.running.borrow().len()
    }
}
