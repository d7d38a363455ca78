use crate::{
    errors::WorkflowError,
    payloads::{EncodedValues, Payload},
    promise::{CompletableResult, Deferred},
    protocol::commands::Request,
    proxy::{
        ActivityInterface, ActivityProxy, ChildWorkflowProxy, ContinueAsNewProxy,
        ExternalWorkflowProxy, WorkflowPrototype,
    },
    workflow::{
        awaits::AwaitCondition,
        options::{
            ActivityOptions, ChildWorkflowOptions, ContinueAsNewOptions, LocalActivityOptions,
        },
        process::ProcessInner,
        scope::{ScopeKey, Trace},
        stubs::{ActivityStub, ChildWorkflowStub, ExternalWorkflowStub},
        WfExitValue, WorkflowExecution, WorkflowInfo,
    },
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    cell::Cell,
    collections::HashMap,
    future::Future,
    panic::Location,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};
use uuid::Uuid;

/// Used within workflows to issue commands, get info, etc.
///
/// Every context is bound to one cancellation scope: requests made through it are tracked by
/// that scope and fail once the scope is cancelled. Contexts are cheap to clone and are passed
/// explicitly to everything that needs one.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) inner: Rc<ProcessInner>,
    pub(crate) scope: ScopeKey,
}

impl WorkflowContext {
    pub(crate) fn new(inner: Rc<ProcessInner>, scope: ScopeKey) -> Self {
        Self { inner, scope }
    }

    /// Information about the run, as supplied when it was started
    pub fn info(&self) -> &WorkflowInfo {
        &self.inner.info
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Get the arguments provided to the workflow upon execution start
    pub fn get_args(&self) -> &EncodedValues {
        &self.inner.input
    }

    /// Return the current time according to the workflow (which is not wall-clock time).
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.env.borrow().tick_time
    }

    /// True while the orchestrator is replaying history
    pub fn is_replaying(&self) -> bool {
        self.inner.env.borrow().is_replaying
    }

    /// The scope this context is bound to
    pub fn scope(&self) -> ScopeKey {
        self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.scopes.borrow().is_cancelled(self.scope)
    }

    /// Send a request, returning the result its response will settle. Every other operation is
    /// built on this one.
    ///
    /// Requests made from a cancelled scope are rejected without being sent. Cancellable requests
    /// are tracked by the scope, and cancelling either the scope or the returned result cancels
    /// the request.
    #[track_caller]
    pub fn request(&self, req: Request, cancellable: bool) -> CompletableResult<EncodedValues> {
        self.request_with_id(req, cancellable).1
    }

    #[track_caller]
    pub(crate) fn request_with_id(
        &self,
        req: Request,
        cancellable: bool,
    ) -> (Option<u64>, CompletableResult<EncodedValues>) {
        let location = Location::caller();
        let scope = {
            let mut scopes = self.inner.scopes.borrow_mut();
            let live = scopes
                .live(self.scope)
                .filter(|k| !scopes.is_cancelled(self.scope) && !scopes.is_cancelled(*k));
            let node = live.and_then(|k| scopes.get_mut(k));
            match (live, node) {
                (Some(k), Some(node)) if !self.inner.is_completed() => {
                    node.last_trace = Some(Trace {
                        command: req.name(),
                        location,
                    });
                    k
                }
                _ => {
                    debug!(command = %req.name(), "Refusing request from cancelled scope");
                    return (
                        None,
                        CompletableResult::rejected(WorkflowError::cancelled(
                            "Attempt to send request to cancelled scope",
                        )),
                    );
                }
            }
        };
        let (id, result) = self.inner.client.request(req, &self.inner.run_id);
        if cancellable {
            if let Some(node) = self.inner.scopes.borrow_mut().get_mut(scope) {
                node.requests.insert(id);
            }
            let process = Rc::downgrade(&self.inner);
            result.on_settled(move |_| {
                if let Some(inner) = process.upgrade() {
                    if let Some(node) = inner.scopes.borrow_mut().get_mut(scope) {
                        node.requests.remove(&id);
                    }
                }
            });
            let client = Rc::downgrade(&self.inner.client);
            result.on_cancel(move || {
                if let Some(c) = client.upgrade() {
                    c.cancel(id);
                }
            });
        }
        (Some(id), result)
    }

    /// Request to run an activity
    #[track_caller]
    pub fn execute_activity<T: DeserializeOwned + Clone + 'static>(
        &self,
        name: &str,
        args: EncodedValues,
        options: &ActivityOptions,
    ) -> CompletableResult<T> {
        self.execute_activity_untyped(name, args, options).decode()
    }

    #[track_caller]
    pub(crate) fn execute_activity_untyped(
        &self,
        name: &str,
        args: EncodedValues,
        options: &ActivityOptions,
    ) -> CompletableResult<EncodedValues> {
        if let Err(e) = options.validate() {
            return CompletableResult::rejected(e);
        }
        match Request::execute_activity(name, args, options) {
            Ok(req) => self.request(req, true),
            Err(e) => CompletableResult::rejected(e.into()),
        }
    }

    /// Request to run a local activity
    #[track_caller]
    pub fn execute_local_activity<T: DeserializeOwned + Clone + 'static>(
        &self,
        name: &str,
        args: EncodedValues,
        options: &LocalActivityOptions,
    ) -> CompletableResult<T> {
        if let Err(e) = options.validate() {
            return CompletableResult::rejected(e);
        }
        match Request::execute_local_activity(name, args, options) {
            Ok(req) => self.request(req, true).decode(),
            Err(e) => CompletableResult::rejected(e.into()),
        }
    }

    /// A stub executing activities by name
    pub fn new_activity_stub(&self, options: ActivityOptions) -> ActivityStub {
        ActivityStub::new(self.clone(), options)
    }

    /// A proxy executing the methods of a declared activity interface
    pub fn new_activity_proxy(
        &self,
        interface: &ActivityInterface,
        options: ActivityOptions,
    ) -> ActivityProxy {
        ActivityProxy::new(self.clone(), interface, options)
    }

    /// A stub for a single child workflow of the given type
    pub fn new_untyped_child_workflow_stub(
        &self,
        workflow_type: &str,
        options: ChildWorkflowOptions,
    ) -> ChildWorkflowStub {
        ChildWorkflowStub::new(self.clone(), workflow_type, options)
    }

    /// A proxy starting, then signalling, a single child workflow
    pub fn new_child_workflow_proxy(
        &self,
        prototype: &WorkflowPrototype,
        options: ChildWorkflowOptions,
    ) -> ChildWorkflowProxy {
        ChildWorkflowProxy::new(self.clone(), prototype, options)
    }

    /// Start a child workflow and wait for its result
    pub fn execute_child_workflow<T: DeserializeOwned + Clone + 'static>(
        &self,
        workflow_type: &str,
        args: EncodedValues,
        options: ChildWorkflowOptions,
    ) -> CompletableResult<T> {
        let stub = self.new_untyped_child_workflow_stub(workflow_type, options);
        match stub.execute(args) {
            Ok(r) => r,
            Err(e) => CompletableResult::rejected(e),
        }
    }

    /// A stub for signalling or cancelling an already running workflow
    pub fn new_external_workflow_stub(&self, execution: WorkflowExecution) -> ExternalWorkflowStub {
        ExternalWorkflowStub::new(self.clone(), execution)
    }

    /// A proxy signalling an already running workflow through its declared signal methods
    pub fn new_external_workflow_proxy(
        &self,
        prototype: &WorkflowPrototype,
        execution: WorkflowExecution,
    ) -> ExternalWorkflowProxy {
        ExternalWorkflowProxy::new(self.clone(), prototype, execution)
    }

    /// A proxy which may be used exactly once to continue this workflow as new
    pub fn new_continue_as_new_proxy(
        &self,
        prototype: &WorkflowPrototype,
        options: ContinueAsNewOptions,
    ) -> ContinueAsNewProxy {
        ContinueAsNewProxy::new(self.clone(), prototype, options)
    }

    /// Continue the workflow as a new run. The returned result never settles: the orchestrator
    /// ends this run once it processes the command.
    #[track_caller]
    pub fn continue_as_new(
        &self,
        workflow_type: &str,
        args: EncodedValues,
        options: &ContinueAsNewOptions,
    ) -> CompletableResult<EncodedValues> {
        let req = match Request::continue_as_new(workflow_type, args, options) {
            Ok(r) => r,
            Err(e) => return CompletableResult::rejected(e.into()),
        };
        self.inner.continued.set(true);
        let (_, result) = self.request_with_id(req, false);
        match result.peek() {
            Some(Err(e)) => CompletableResult::rejected(e),
            _ => CompletableResult::never(),
        }
    }

    /// True once this run asked to continue as new
    pub fn is_continued_as_new(&self) -> bool {
        self.inner.continued.get()
    }

    /// A timer which fires after `interval` of workflow time
    #[track_caller]
    pub fn timer(&self, interval: Duration) -> CompletableResult<()> {
        CompletableResult::map(&self.request(Request::new_timer(interval), true), |_| ())
    }

    /// Record the value of a non-deterministic computation. `f` only runs when not replaying;
    /// during replay the value recorded in history is returned instead.
    #[track_caller]
    pub fn side_effect<T, F>(&self, f: F) -> CompletableResult<T>
    where
        T: Serialize + DeserializeOwned + Clone + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let value = if self.is_replaying() {
            EncodedValues::from(Payload::null())
        } else {
            match f().map_err(WorkflowError::from_anyhow).and_then(|v| {
                EncodedValues::from_value(&v).map_err(WorkflowError::from)
            }) {
                Ok(v) => v,
                Err(e) => return CompletableResult::rejected(e),
            }
        };
        self.request(Request::side_effect(value), true).decode()
    }

    /// A random UUID which stays the same across replays
    #[track_caller]
    pub fn uuid4(&self) -> CompletableResult<Uuid> {
        self.side_effect(|| Ok(Uuid::new_v4()))
    }

    /// Find out which version of a change applies to this run
    #[track_caller]
    pub fn get_version(
        &self,
        change_id: &str,
        min_supported: i32,
        max_supported: i32,
    ) -> CompletableResult<i32> {
        self.request(
            Request::get_version(change_id, min_supported, max_supported),
            true,
        )
        .decode()
    }

    /// Update the search attributes of this run. Nothing waits for the response.
    #[track_caller]
    pub fn upsert_search_attributes(&self, attributes: HashMap<String, serde_json::Value>) {
        let _ = self.request(Request::upsert_search_attributes(attributes), false);
    }

    /// Register a signal handler. Signals which arrived before the handler was registered are
    /// delivered to it immediately, in arrival order.
    pub fn register_signal(
        &self,
        name: &str,
        handler: impl Fn(EncodedValues) -> anyhow::Result<()> + 'static,
    ) -> &Self {
        self.inner
            .handlers
            .borrow_mut()
            .signals
            .insert(name.to_string(), Rc::new(handler));
        self.inner.flush_buffered_signals(name);
        self
    }

    /// Register a query handler
    pub fn register_query(
        &self,
        name: &str,
        handler: impl Fn(EncodedValues) -> anyhow::Result<EncodedValues> + 'static,
    ) -> &Self {
        self.inner
            .handlers
            .borrow_mut()
            .queries
            .insert(name.to_string(), Rc::new(handler));
        self
    }

    /// Register an update handler. The validator runs first and rejects the update without
    /// running the handler if it fails.
    pub fn register_update<V, H, Fut>(&self, name: &str, validator: V, handler: H) -> &Self
    where
        V: Fn(&EncodedValues) -> anyhow::Result<()> + 'static,
        H: Fn(WorkflowContext, EncodedValues) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<EncodedValues>> + 'static,
    {
        self.inner.handlers.borrow_mut().updates.insert(
            name.to_string(),
            (
                Rc::new(validator),
                Rc::new(move |ctx, args| handler(ctx, args).boxed_local()),
            ),
        );
        self
    }

    /// Wait until any of the conditions is met. Resolves `true` immediately if a predicate
    /// already holds.
    pub fn await_conditions(&self, conditions: Vec<AwaitCondition>) -> CompletableResult<bool> {
        if self.is_cancelled() {
            return CompletableResult::rejected(WorkflowError::cancelled(
                "Attempt to await in cancelled scope",
            ));
        }
        let scope = self.inner.scopes.borrow().live(self.scope).unwrap_or(self.scope);
        self.inner.awaits.await_any(scope, conditions)
    }

    /// Wait until `predicate` returns true
    pub fn wait_condition(
        &self,
        predicate: impl FnMut() -> bool + 'static,
    ) -> CompletableResult<bool> {
        self.await_conditions(vec![AwaitCondition::predicate(predicate)])
    }

    /// Like [Self::await_conditions] but gives up after `interval`. Resolves `false` if the timer
    /// fired first. Otherwise the timer is cancelled and the result is `true`.
    #[track_caller]
    pub fn await_with_timeout(
        &self,
        interval: Duration,
        mut conditions: Vec<AwaitCondition>,
    ) -> CompletableResult<bool> {
        let timer = self.timer(interval);
        conditions.push(AwaitCondition::promise(&timer));
        CompletableResult::map(&self.await_conditions(conditions), move |_| {
            if timer.is_complete() {
                false
            } else {
                timer.cancel();
                true
            }
        })
    }

    /// Run `f` in a new scope, child of this context's scope. Cancelling this scope cancels the
    /// new one too.
    pub fn new_cancellation_scope<T, F, Fut>(&self, f: F) -> ScopeHandle<T>
    where
        T: Clone + 'static,
        F: FnOnce(WorkflowContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.spawn_scope(false, f)
    }

    /// Run `f` in a new scope which is not cancelled along with this context's scope
    pub fn new_detached_cancellation_scope<T, F, Fut>(&self, f: F) -> ScopeHandle<T>
    where
        T: Clone + 'static,
        F: FnOnce(WorkflowContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.spawn_scope(true, f)
    }

    fn spawn_scope<T, F, Fut>(&self, detached: bool, f: F) -> ScopeHandle<T>
    where
        T: Clone + 'static,
        F: FnOnce(WorkflowContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let key = self
            .inner
            .scopes
            .borrow_mut()
            .insert(Some(self.scope), detached);
        let ctx = WorkflowContext::new(self.inner.clone(), key);
        let deferred = Deferred::new();
        let handle = ScopeHandle {
            ctx: ctx.clone(),
            detached,
            result: deferred.promise(),
            finished_cancelled: Rc::new(Cell::new(None)),
        };
        let fut = f(ctx.clone());
        let finished = handle.finished_cancelled.clone();
        let coroutine = async move {
            let res = fut.await;
            finished.set(Some(ctx.is_cancelled()));
            deferred.settle(res.map_err(WorkflowError::from_anyhow));
        }
        .boxed_local();
        if let Some(node) = self.inner.scopes.borrow_mut().get_mut(key) {
            node.coroutine = Some(coroutine);
        }
        trace!(detached, "Started cancellation scope");
        self.inner.poll_scope(key);
        handle
    }

    /// Complete the workflow with `result`. Only valid from the workflow's root scope.
    pub fn complete<T: Serialize>(&self, result: &T) -> Result<(), WorkflowError> {
        if self.inner.scopes.borrow().root() != Some(self.scope) {
            return Err(WorkflowError::IllegalState(
                "Workflow can only be completed from its root scope".to_string(),
            ));
        }
        let vals = EncodedValues::from_value(result)?;
        self.inner.complete_with(Ok(WfExitValue::Normal(vals)));
        Ok(())
    }

    /// Describe where each live scope last issued a request
    pub fn get_stack_trace(&self) -> String {
        self.inner.stack_trace()
    }
}

/// A handle to a running cancellation scope. Awaiting it yields the scope's result.
pub struct ScopeHandle<T> {
    ctx: WorkflowContext,
    detached: bool,
    result: CompletableResult<T>,
    finished_cancelled: Rc<Cell<Option<bool>>>,
}

impl<T: Clone + 'static> ScopeHandle<T> {
    /// Cancel the scope and every non-detached scope beneath it
    pub fn cancel(&self) {
        self.ctx.inner.cancel_scope(self.ctx.scope);
    }

    pub fn is_cancelled(&self) -> bool {
        self.finished_cancelled
            .get()
            .unwrap_or_else(|| self.ctx.is_cancelled())
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Run `handler` when the scope is cancelled, or right away if it already was
    pub fn on_cancel(&self, handler: impl FnOnce() + 'static) {
        let run_now = {
            let mut scopes = self.ctx.inner.scopes.borrow_mut();
            match scopes.get_mut(self.ctx.scope) {
                Some(node) if !node.cancelled => {
                    node.on_cancel.push(Box::new(handler));
                    return;
                }
                Some(_) => true,
                None => self.finished_cancelled.get().unwrap_or(false),
            }
        };
        if run_now {
            handler();
        }
    }

    /// The context bound to this scope
    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    /// The scope's eventual result
    pub fn result(&self) -> CompletableResult<T> {
        self.result.clone()
    }
}

impl<T: Clone + 'static> Future for ScopeHandle<T> {
    type Output = Result<T, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.poll_unpin(cx)
    }
}
