//! Single resolution results.
//!
//! A [CompletableResult] is the read side and a [Deferred] the write side of the same shared
//! cell. Everything here is single threaded: a workflow run is only ever driven from one thread,
//! and handlers attached with [CompletableResult::on_settled] run synchronously, in attachment
//! order, as soon as the result settles.

use crate::{errors::WorkflowError, payloads::EncodedValues};
use serde::de::DeserializeOwned;
use std::{
    cell::RefCell,
    fmt::{Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

type SettleHandler<T> = Box<dyn FnOnce(&Result<T, WorkflowError>)>;

struct Shared<T> {
    outcome: Option<Result<T, WorkflowError>>,
    on_settle: Vec<SettleHandler<T>>,
    on_cancel: Vec<Box<dyn FnOnce()>>,
    cancel_requested: bool,
    wakers: Vec<Waker>,
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self {
            outcome: None,
            on_settle: vec![],
            on_cancel: vec![],
            cancel_requested: false,
            wakers: vec![],
        }
    }
}

/// A result which will be fulfilled or rejected exactly once. Cloning produces another handle to
/// the same result.
pub struct CompletableResult<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

/// The resolving side of a [CompletableResult]
pub struct Deferred<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for CompletableResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Debug> Debug for CompletableResult<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.shared.borrow().outcome {
            None => write!(f, "CompletableResult(pending)"),
            Some(r) => write!(f, "CompletableResult({r:?})"),
        }
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared::default())),
        }
    }

    /// The result this deferred settles
    pub fn promise(&self) -> CompletableResult<T> {
        CompletableResult {
            shared: self.shared.clone(),
        }
    }

    /// Fulfill the result. Returns false (and changes nothing) if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the result. Returns false (and changes nothing) if it was already settled.
    pub fn reject(&self, err: WorkflowError) -> bool {
        self.settle(Err(err))
    }

    pub fn settle(&self, outcome: Result<T, WorkflowError>) -> bool {
        let (handlers, wakers) = {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() {
                return false;
            }
            s.outcome = Some(outcome.clone());
            s.on_cancel.clear();
            (mem::take(&mut s.on_settle), mem::take(&mut s.wakers))
        };
        for h in handlers {
            h(&outcome);
        }
        for w in wakers {
            w.wake();
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        self.shared.borrow().outcome.is_some()
    }
}

impl<T: Clone + 'static> CompletableResult<T> {
    /// A result which is already fulfilled
    pub fn resolved(value: T) -> Self {
        let d = Deferred::new();
        d.resolve(value);
        d.promise()
    }

    /// A result which is already rejected
    pub fn rejected(err: WorkflowError) -> Self {
        let d = Deferred::new();
        d.reject(err);
        d.promise()
    }

    /// A result which never settles
    pub fn never() -> Self {
        Deferred::new().promise()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.borrow().outcome.is_some()
    }

    /// The outcome, if settled
    pub fn peek(&self) -> Option<Result<T, WorkflowError>> {
        self.shared.borrow().outcome.clone()
    }

    /// Run `handler` once this result settles, or immediately if it already has
    pub fn on_settled(&self, handler: impl FnOnce(&Result<T, WorkflowError>) + 'static) {
        let outcome = {
            let mut s = self.shared.borrow_mut();
            match &s.outcome {
                Some(o) => o.clone(),
                None => {
                    s.on_settle.push(Box::new(handler));
                    return;
                }
            }
        };
        handler(&outcome);
    }

    /// Register a handler invoked if cancellation of this result is requested while it is still
    /// pending
    pub fn on_cancel(&self, handler: impl FnOnce() + 'static) {
        {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() {
                return;
            }
            if !s.cancel_requested {
                s.on_cancel.push(Box::new(handler));
                return;
            }
        }
        handler();
    }

    /// Request cancellation of the operation producing this result. Has no effect once settled.
    /// Cancellation does not settle the result by itself; the producer decides how it settles.
    pub fn cancel(&self) {
        let handlers = {
            let mut s = self.shared.borrow_mut();
            if s.outcome.is_some() || s.cancel_requested {
                return;
            }
            s.cancel_requested = true;
            mem::take(&mut s.on_cancel)
        };
        for h in handlers {
            h();
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.borrow().cancel_requested
    }

    fn downgrade(&self) -> Weak<RefCell<Shared<T>>> {
        Rc::downgrade(&self.shared)
    }

    /// Derive a result whose cancellation is forwarded to this one
    fn derived<U: Clone + 'static>(&self) -> Deferred<U> {
        let d = Deferred::new();
        let source = self.downgrade();
        d.promise().on_cancel(move || {
            if let Some(shared) = source.upgrade() {
                CompletableResult { shared }.cancel();
            }
        });
        d
    }

    /// Chain a fallible transformation of the fulfilled value
    pub fn then<U, F>(&self, f: F) -> CompletableResult<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, WorkflowError> + 'static,
    {
        let d = self.derived();
        let out = d.promise();
        self.on_settled(move |r| {
            d.settle(r.clone().and_then(f));
        });
        out
    }

    /// Chain an infallible transformation of the fulfilled value
    pub fn map<U, F>(&self, f: F) -> CompletableResult<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |v| Ok(f(v)))
    }

    /// Chain an operation which itself produces a result
    pub fn and_then<U, F>(&self, f: F) -> CompletableResult<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> CompletableResult<U> + 'static,
    {
        let d = self.derived();
        let out = d.promise();
        self.on_settled(move |r| match r {
            Ok(v) => {
                let inner = f(v.clone());
                let inner_weak = inner.downgrade();
                d.promise().on_cancel(move || {
                    if let Some(shared) = inner_weak.upgrade() {
                        CompletableResult { shared }.cancel();
                    }
                });
                inner.on_settled(move |ir| {
                    d.settle(ir.clone());
                });
            }
            Err(e) => {
                d.reject(e.clone());
            }
        });
        out
    }

    /// Handle a rejection, possibly recovering from it
    pub fn or_else<F>(&self, f: F) -> CompletableResult<T>
    where
        F: FnOnce(WorkflowError) -> Result<T, WorkflowError> + 'static,
    {
        let d = self.derived();
        let out = d.promise();
        self.on_settled(move |r| {
            d.settle(r.clone().or_else(f));
        });
        out
    }
}

impl CompletableResult<EncodedValues> {
    /// Decode the first value of the fulfilled payloads
    pub fn decode<T: DeserializeOwned + Clone + 'static>(&self) -> CompletableResult<T> {
        self.then(|vals| Ok(vals.get_value(0)?))
    }
}

impl<T: Clone + 'static> Future for CompletableResult<T> {
    type Output = Result<T, WorkflowError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut s = self.shared.borrow_mut();
        if let Some(o) = &s.outcome {
            return Poll::Ready(o.clone());
        }
        if !s.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            s.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Fulfills with the first input to fulfill. Rejects only once every input has rejected, with the
/// first rejection in input order. Rejects immediately when given no inputs.
pub fn any<T: Clone + 'static>(
    inputs: impl IntoIterator<Item = CompletableResult<T>>,
) -> CompletableResult<T> {
    let inputs: Vec<_> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return CompletableResult::rejected(WorkflowError::InvalidArgument(
            "Unable to wait for any of an empty set of results".to_string(),
        ));
    }
    let d = Deferred::new();
    let out = d.promise();
    let reasons: Rc<RefCell<Vec<Option<WorkflowError>>>> =
        Rc::new(RefCell::new(vec![None; inputs.len()]));
    let remaining = Rc::new(RefCell::new(inputs.len()));
    forward_cancel(&out, &inputs);
    for (i, input) in inputs.into_iter().enumerate() {
        let d = d.clone();
        let reasons = reasons.clone();
        let remaining = remaining.clone();
        input.on_settled(move |r| match r {
            Ok(v) => {
                d.resolve(v.clone());
            }
            Err(e) => {
                reasons.borrow_mut()[i] = Some(e.clone());
                let left = {
                    let mut rem = remaining.borrow_mut();
                    *rem -= 1;
                    *rem
                };
                if left == 0 {
                    let first = reasons.borrow_mut().iter_mut().find_map(Option::take);
                    if let Some(e) = first {
                        d.reject(e);
                    }
                }
            }
        });
    }
    out
}

/// Settles the same way as the first input to settle
pub fn race<T: Clone + 'static>(
    inputs: impl IntoIterator<Item = CompletableResult<T>>,
) -> CompletableResult<T> {
    let inputs: Vec<_> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return CompletableResult::rejected(WorkflowError::InvalidArgument(
            "Unable to race an empty set of results".to_string(),
        ));
    }
    let d = Deferred::new();
    let out = d.promise();
    forward_cancel(&out, &inputs);
    for input in inputs {
        let d = d.clone();
        input.on_settled(move |r| {
            d.settle(r.clone());
        });
    }
    out
}

/// Fulfills with every value, in input order, once all inputs fulfill. Rejects with the first
/// rejection to happen.
pub fn all<T: Clone + 'static>(
    inputs: impl IntoIterator<Item = CompletableResult<T>>,
) -> CompletableResult<Vec<T>> {
    let inputs: Vec<_> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return CompletableResult::resolved(vec![]);
    }
    let d = Deferred::new();
    let out = d.promise();
    let values: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
    let remaining = Rc::new(RefCell::new(inputs.len()));
    forward_cancel(&out, &inputs);
    for (i, input) in inputs.into_iter().enumerate() {
        let d = d.clone();
        let values = values.clone();
        let remaining = remaining.clone();
        input.on_settled(move |r| match r {
            Ok(v) => {
                values.borrow_mut()[i] = Some(v.clone());
                let left = {
                    let mut rem = remaining.borrow_mut();
                    *rem -= 1;
                    *rem
                };
                if left == 0 {
                    let collected = mem::take(&mut *values.borrow_mut())
                        .into_iter()
                        .flatten()
                        .collect();
                    d.resolve(collected);
                }
            }
            Err(e) => {
                d.reject(e.clone());
            }
        });
    }
    out
}

fn forward_cancel<T: Clone + 'static, U: Clone + 'static>(
    out: &CompletableResult<U>,
    inputs: &[CompletableResult<T>],
) {
    let weak: Vec<_> = inputs.iter().map(|i| i.downgrade()).collect();
    out.on_cancel(move || {
        for shared in weak.into_iter().filter_map(|w| w.upgrade()) {
            CompletableResult { shared }.cancel();
        }
    });
}
