//! Demultiplexes orchestrator commands to the handler registered for their name.

mod routes;

use crate::{
    activity::Activities,
    client::Client,
    environment::Environment,
    errors::{DispatchError, WorkflowError},
    payloads::EncodedValues,
    promise::{CompletableResult, Deferred},
    protocol::ServerCommand,
    scheduler::Scheduler,
    worker::WorkerOptions,
    workflow::{process::ProcessCollection, WorkflowFunction},
};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// Everything routes operate on. Owned by the worker and shared with every route.
pub(crate) struct WorkerServices {
    pub(crate) options: WorkerOptions,
    pub(crate) client: Rc<Client>,
    pub(crate) env: Rc<RefCell<Environment>>,
    pub(crate) scheduler: Scheduler,
    pub(crate) processes: ProcessCollection,
    pub(crate) workflows: RefCell<HashMap<String, WorkflowFunction>>,
    pub(crate) activities: Activities,
}

impl WorkerServices {
    pub(crate) fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            client: Rc::new(Client::new()),
            env: Default::default(),
            scheduler: Scheduler::default(),
            processes: ProcessCollection::default(),
            workflows: Default::default(),
            activities: Activities::default(),
        }
    }
}

/// Handles one kind of command. The handler either settles `answer` itself, possibly later, or
/// returns an error which rejects it.
pub(crate) trait Route {
    fn name(&self) -> &'static str;

    fn handle(
        &self,
        cmd: ServerCommand,
        answer: Deferred<EncodedValues>,
    ) -> Result<(), WorkflowError>;
}

/// Routes keyed by exact command name
pub(crate) struct Router {
    routes: HashMap<&'static str, Box<dyn Route>>,
}

impl Router {
    /// A router with every worker route registered
    pub(crate) fn new(services: Rc<WorkerServices>) -> Self {
        let mut router = Self {
            routes: HashMap::new(),
        };
        router.add(routes::StartWorkflow::new(services.clone()));
        router.add(routes::InvokeSignal::new(services.clone()));
        router.add(routes::InvokeQuery::new(services.clone()));
        router.add(routes::InvokeUpdate::new(services.clone()));
        router.add(routes::CancelWorkflow::new(services.clone()));
        router.add(routes::DestroyWorkflow::new(services.clone()));
        router.add(routes::StackTrace::new(services.clone()));
        router.add(routes::InvokeActivity::new(services));
        router
    }

    pub(crate) fn add(&mut self, route: impl Route + 'static) {
        self.routes.insert(route.name(), Box::new(route));
    }

    /// Route a command. Failures only ever reject the command's own answer.
    pub(crate) fn dispatch(&self, cmd: ServerCommand) -> CompletableResult<EncodedValues> {
        let Some(route) = self.routes.get(cmd.name.as_str()) else {
            warn!(command = %cmd.name, id = cmd.id, "No route registered for command");
            return CompletableResult::rejected(
                DispatchError::MethodNotRegistered(cmd.name).into(),
            );
        };
        debug!(command = %cmd.name, id = cmd.id, "Routing command");
        let answer = Deferred::new();
        let result = answer.promise();
        if let Err(e) = route.handle(cmd, answer.clone()) {
            debug!(error = %e, "Command handler failed");
            answer.reject(e);
        }
        result
    }
}
