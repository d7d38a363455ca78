//! A running workflow execution and the registry of runs a worker holds.

use crate::{
    client::Client,
    environment::Environment,
    errors::{DispatchError, WorkflowError},
    failure::Failure,
    payloads::EncodedValues,
    promise::CompletableResult,
    protocol::commands::Request,
    workflow::{
        awaits::AwaitResolver,
        panic_formatter,
        scope::{ScopeKey, ScopeTree},
        WfExitValue, WorkflowContext, WorkflowFunction, WorkflowInfo, WorkflowResult,
    },
};
use futures_util::{future::LocalBoxFuture, FutureExt};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap},
    fmt::Write,
    panic::AssertUnwindSafe,
    rc::Rc,
    task::{Context, Poll},
};
use tracing::Span;

pub(crate) type SignalHandler = Rc<dyn Fn(EncodedValues) -> anyhow::Result<()>>;
pub(crate) type QueryHandler = Rc<dyn Fn(EncodedValues) -> anyhow::Result<EncodedValues>>;
pub(crate) type UpdateValidator = Rc<dyn Fn(&EncodedValues) -> anyhow::Result<()>>;
pub(crate) type UpdateFuture = LocalBoxFuture<'static, anyhow::Result<EncodedValues>>;
pub(crate) type UpdateHandler = Rc<dyn Fn(WorkflowContext, EncodedValues) -> UpdateFuture>;

#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) signals: HashMap<String, SignalHandler>,
    /// Signals which arrived before a handler for them was registered, in arrival order
    pub(crate) buffered_signals: Vec<(String, EncodedValues)>,
    pub(crate) queries: BTreeMap<String, QueryHandler>,
    pub(crate) updates: HashMap<String, (UpdateValidator, UpdateHandler)>,
}

pub(crate) struct ProcessInner {
    pub(crate) run_id: String,
    pub(crate) info: WorkflowInfo,
    pub(crate) input: EncodedValues,
    pub(crate) client: Rc<Client>,
    pub(crate) env: Rc<RefCell<Environment>>,
    pub(crate) scopes: RefCell<ScopeTree>,
    pub(crate) awaits: AwaitResolver,
    pub(crate) handlers: RefCell<Handlers>,
    completed: Cell<bool>,
    pub(crate) continued: Cell<bool>,
    span: Span,
}

/// One workflow run. Cloning produces another handle to the same run.
#[derive(Clone)]
pub struct Process {
    inner: Rc<ProcessInner>,
}

impl Process {
    /// Create the run and drive its workflow function until it first blocks
    pub(crate) fn start(
        info: WorkflowInfo,
        input: EncodedValues,
        function: &WorkflowFunction,
        client: Rc<Client>,
        env: Rc<RefCell<Environment>>,
    ) -> Self {
        let run_id = info.workflow_execution.run_id.clone().unwrap_or_default();
        let span = info_span!("RunWorkflow", workflow_type = %info.workflow_type.name,
                              run_id = %run_id);
        let inner = Rc::new(ProcessInner {
            run_id,
            info,
            input,
            client,
            env,
            scopes: RefCell::new(ScopeTree::default()),
            awaits: AwaitResolver::default(),
            handlers: RefCell::new(Handlers::default()),
            completed: Cell::new(false),
            continued: Cell::new(false),
            span,
        });
        let root = inner.scopes.borrow_mut().insert(None, false);
        let fut = function.start(WorkflowContext::new(inner.clone(), root));
        let weak = Rc::downgrade(&inner);
        let coroutine = async move {
            let result = fut.await;
            if let Some(inner) = weak.upgrade() {
                inner.complete_with(result);
            }
        }
        .boxed_local();
        if let Some(node) = inner.scopes.borrow_mut().get_mut(root) {
            node.coroutine = Some(coroutine);
        }
        inner.span.in_scope(|| debug!("Starting workflow"));
        inner.run_until_blocked();
        Self { inner }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// A context bound to the root scope
    pub fn context(&self) -> Option<WorkflowContext> {
        let root = self.inner.scopes.borrow().root()?;
        Some(WorkflowContext::new(self.inner.clone(), root))
    }

    /// Resume every scope whose awaited results settled, until none can make progress
    pub fn run_until_blocked(&self) {
        self.inner.run_until_blocked();
    }

    /// Deliver a signal, buffering it if no handler is registered for it yet
    pub fn signal(&self, name: &str, args: EncodedValues) {
        self.inner.deliver_signal(name.to_string(), args);
    }

    /// Run a query handler. Queries must not issue requests or otherwise mutate the run.
    pub fn query(&self, name: &str, args: EncodedValues) -> Result<EncodedValues, WorkflowError> {
        let handler = {
            let handlers = self.inner.handlers.borrow();
            match handlers.queries.get(name) {
                Some(h) => h.clone(),
                None => {
                    return Err(DispatchError::QueryNotFound {
                        query: name.to_string(),
                        known: handlers.queries.keys().cloned().collect::<Vec<_>>().join(", "),
                    }
                    .into())
                }
            }
        };
        let _entered = self.inner.span.enter();
        debug!(query = name, "Running query");
        handler(args).map_err(WorkflowError::from_anyhow)
    }

    /// Validate and start an update. The handler runs in its own scope under the root.
    pub fn update(&self, name: &str, args: EncodedValues) -> CompletableResult<EncodedValues> {
        let found = self.inner.handlers.borrow().updates.get(name).cloned();
        let Some((validator, handler)) = found else {
            return CompletableResult::rejected(
                DispatchError::UpdateNotFound(name.to_string()).into(),
            );
        };
        if let Err(e) = validator(&args) {
            return CompletableResult::rejected(WorkflowError::from_anyhow(e));
        }
        let Some(ctx) = self.context() else {
            return CompletableResult::rejected(WorkflowError::IllegalState(
                "Workflow has already completed".to_string(),
            ));
        };
        let _entered = self.inner.span.enter();
        debug!(update = name, "Running update");
        ctx.new_cancellation_scope(move |ctx| handler(ctx, args))
            .result()
    }

    /// Cancel the root scope
    pub fn cancel(&self) {
        let root = self.inner.scopes.borrow().root();
        if let Some(root) = root {
            self.inner.span.in_scope(|| info!("Cancelling workflow"));
            self.inner.cancel_scope(root);
        }
    }

    /// Render the last request issued by each live scope
    pub fn stack_trace(&self) -> String {
        self.inner.stack_trace()
    }

    /// Tear the run down: every scope, await group and handler is dropped and the client forgets
    /// the run's requests
    pub fn destroy(&self) {
        self.inner.span.in_scope(|| debug!("Destroying workflow"));
        self.inner.completed.set(true);
        self.inner.drop_scopes();
        self.inner.awaits.destroy();
        let handlers = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        drop(handlers);
        self.inner.client.forget_run(&self.inner.run_id);
    }
}

impl ProcessInner {
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub(crate) fn run_until_blocked(&self) {
        let _entered = self.span.enter();
        loop {
            if self.completed.get() {
                self.drop_scopes();
                return;
            }
            self.awaits.evaluate();
            let woken: Vec<ScopeKey> = {
                let scopes = self.scopes.borrow();
                scopes
                    .dfs()
                    .into_iter()
                    .filter(|k| scopes.get(*k).is_some_and(|n| n.waker.take_woken()))
                    .collect()
            };
            if woken.is_empty() {
                return;
            }
            for key in woken {
                self.poll_scope(key);
                if self.completed.get() {
                    break;
                }
            }
        }
    }

    /// Poll the coroutine of a single scope. The coroutine is taken out of the tree while it runs
    /// so workflow code can freely create scopes and issue requests.
    pub(crate) fn poll_scope(&self, key: ScopeKey) {
        let (mut fut, waker) = {
            let mut scopes = self.scopes.borrow_mut();
            let Some(node) = scopes.get_mut(key) else {
                return;
            };
            let Some(fut) = node.coroutine.take() else {
                return;
            };
            node.waker.take_woken();
            (fut, node.waker.clone())
        };
        let waker = futures_util::task::waker(waker);
        let mut cx = Context::from_waker(&waker);
        match std::panic::catch_unwind(AssertUnwindSafe(|| fut.poll_unpin(&mut cx))) {
            Ok(Poll::Pending) => {
                let leftover = {
                    let mut scopes = self.scopes.borrow_mut();
                    match scopes.get_mut(key) {
                        Some(node) => {
                            node.coroutine = Some(fut);
                            None
                        }
                        None => Some(fut),
                    }
                };
                drop(leftover);
            }
            Ok(Poll::Ready(())) => {
                let removed = self.scopes.borrow_mut().remove(key);
                drop(removed);
            }
            Err(panic) => {
                let msg = format!("Workflow function panicked: {}", panic_formatter(panic));
                warn!("{}", msg);
                self.finish(Request::panic(Failure::application(msg, "PanicError")));
            }
        }
    }

    pub(crate) fn cancel_scope(&self, key: ScopeKey) {
        let cancellation = self.scopes.borrow_mut().cancel(key);
        if cancellation.scopes.is_empty() {
            return;
        }
        debug!(scopes = cancellation.scopes.len(), requests = ?cancellation.requests,
               "Cancelling scopes");
        for id in cancellation.requests {
            self.client.cancel(id);
        }
        self.awaits.reject_scopes(&cancellation.scopes);
        for handler in cancellation.handlers {
            handler();
        }
        // Woken so cancelled coroutines observe the cancellation on their next poll
        let scopes = self.scopes.borrow();
        for key in cancellation.scopes {
            if let Some(node) = scopes.get(key) {
                futures_util::task::ArcWake::wake_by_ref(&node.waker);
            }
        }
    }

    pub(crate) fn deliver_signal(&self, name: String, args: EncodedValues) {
        if self.completed.get() {
            debug!(signal = %name, "Dropping signal for completed workflow");
            return;
        }
        let handler = self.handlers.borrow().signals.get(&name).cloned();
        match handler {
            Some(h) => {
                let _entered = self.span.enter();
                debug!(signal = %name, "Delivering signal");
                if let Err(e) = h(args) {
                    warn!(signal = %name, error = %e, "Signal handler failed");
                    self.complete_with(Err(e));
                }
            }
            None => {
                debug!(signal = %name, "Buffering signal with no registered handler");
                self.handlers.borrow_mut().buffered_signals.push((name, args));
            }
        }
    }

    /// Deliver signals buffered for `name`, in arrival order
    pub(crate) fn flush_buffered_signals(&self, name: &str) {
        let buffered: Vec<_> = {
            let mut handlers = self.handlers.borrow_mut();
            let (matching, rest) = std::mem::take(&mut handlers.buffered_signals)
                .into_iter()
                .partition(|(n, _)| n == name);
            handlers.buffered_signals = rest;
            matching
        };
        for (name, args) in buffered {
            self.deliver_signal(name, args);
        }
    }

    /// Finish the run with the outcome of its workflow function
    pub(crate) fn complete_with(&self, result: WorkflowResult<EncodedValues>) {
        if self.completed.get() {
            return;
        }
        let request = match result {
            Ok(WfExitValue::Normal(vals)) => {
                info!("Workflow completed");
                Request::complete_workflow(Ok(vals))
            }
            Ok(WfExitValue::Cancelled) => {
                info!("Workflow cancelled");
                Request::complete_workflow(Err(Failure::canceled("Workflow cancelled")))
            }
            Ok(WfExitValue::ContinueAsNew(can)) => {
                info!(workflow_type = %can.workflow_type, "Workflow continued as new");
                match Request::continue_as_new(can.workflow_type, can.arguments, &can.options) {
                    Ok(r) => r,
                    Err(e) => Request::complete_workflow(Err(WorkflowError::from(e).to_failure())),
                }
            }
            Err(e) => {
                let err = WorkflowError::from_anyhow(e);
                match &err {
                    WorkflowError::NonDeterminism(_) | WorkflowError::Panic(_) => {
                        error!(error = %err, "Workflow failed unrecoverably");
                        Request::panic(err.to_failure())
                    }
                    _ => {
                        warn!(error = %err, "Workflow failed");
                        Request::complete_workflow(Err(err.to_failure()))
                    }
                }
            }
        };
        self.finish(request);
    }

    fn finish(&self, request: Request) {
        if self.completed.replace(true) {
            return;
        }
        // The completion response carries nothing the run could still act on
        let _ = self.client.request(request, &self.run_id);
    }

    fn drop_scopes(&self) {
        let nodes = self.scopes.borrow_mut().drain();
        drop(nodes);
    }

    pub(crate) fn stack_trace(&self) -> String {
        let scopes = self.scopes.borrow();
        let mut out = String::new();
        for key in scopes.dfs() {
            let Some(node) = scopes.get(key) else {
                continue;
            };
            let mut depth = 0;
            let mut parent = node.parent;
            while let Some(p) = parent.and_then(|p| scopes.get(p)) {
                depth += 1;
                parent = p.parent;
            }
            let _ = write!(
                out,
                "{:indent$}{}",
                "",
                if node.parent.is_none() {
                    "workflow".to_string()
                } else {
                    format!("scope #{}", node.seq)
                },
                indent = depth * 2
            );
            if node.detached {
                out.push_str(" (detached)");
            }
            if node.cancelled {
                out.push_str(" (cancelled)");
            }
            match node.last_trace {
                Some(t) => {
                    let _ = writeln!(
                        out,
                        ": {} at {}:{}:{}",
                        t.command,
                        t.location.file(),
                        t.location.line(),
                        t.location.column()
                    );
                }
                None => out.push_str(": no requests\n"),
            }
        }
        out
    }
}

/// Runs held by a worker, keyed by run id
#[derive(Default)]
pub(crate) struct ProcessCollection {
    runs: RefCell<BTreeMap<String, Process>>,
}

impl ProcessCollection {
    pub(crate) fn add(&self, process: Process) -> Result<(), DispatchError> {
        let mut runs = self.runs.borrow_mut();
        if runs.contains_key(process.run_id()) {
            return Err(DispatchError::DuplicateRun(process.run_id().to_string()));
        }
        runs.insert(process.run_id().to_string(), process);
        Ok(())
    }

    pub(crate) fn contains(&self, run_id: &str) -> bool {
        self.runs.borrow().contains_key(run_id)
    }

    pub(crate) fn get(&self, run_id: &str) -> Result<Process, DispatchError> {
        self.runs
            .borrow()
            .get(run_id)
            .cloned()
            .ok_or_else(|| DispatchError::ProcessNotFound(run_id.to_string()))
    }

    pub(crate) fn remove(&self, run_id: &str) -> Result<Process, DispatchError> {
        self.runs
            .borrow_mut()
            .remove(run_id)
            .ok_or_else(|| DispatchError::ProcessNotFound(run_id.to_string()))
    }

    pub(crate) fn len(&self) -> usize {
        self.runs.borrow().len()
    }

    /// Handles to every run, ordered by run id
    pub(crate) fn all(&self) -> Vec<Process> {
        self.runs.borrow().values().cloned().collect()
    }
}
