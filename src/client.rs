//! The workflow side of the transport.
//!
//! Workflow code never talks to the host directly. Requests are assigned correlation ids, queued
//! until the worker flushes them at the end of a batch, and tracked until their response arrives.

use crate::{
    errors::{ProtocolError, WorkflowError},
    payloads::EncodedValues,
    promise::{CompletableResult, Deferred},
    protocol::{
        commands::{CommandName, Request},
        Message, ServerResponse,
    },
};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

/// Ids handed to requests start here so they are easy to tell apart from orchestrator command
/// ids in logs
pub(crate) const FIRST_REQUEST_ID: u64 = 9000;

struct PendingRequest {
    run_id: String,
    command: CommandName,
    deferred: Deferred<EncodedValues>,
}

struct ClientState {
    next_id: u64,
    queue: Vec<(String, Message)>,
    pending: HashMap<u64, PendingRequest>,
    cancelled: HashSet<u64>,
}

/// Sends requests on behalf of workflow runs and resolves their results
pub struct Client {
    state: RefCell<ClientState>,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            state: RefCell::new(ClientState {
                next_id: FIRST_REQUEST_ID,
                queue: vec![],
                pending: HashMap::new(),
                cancelled: HashSet::new(),
            }),
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, mut req: Request, run_id: &str) -> u64 {
        let mut s = self.state.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        req.assign_id(id);
        debug!(request_id = id, command = %req.name(), run_id, "Queueing request");
        s.queue.push((run_id.to_string(), req.into()));
        id
    }

    /// Queue a request and return its id along with the result its response will settle
    pub fn request(&self, req: Request, run_id: &str) -> (u64, CompletableResult<EncodedValues>) {
        let command = req.name();
        let id = self.enqueue(req, run_id);
        let deferred = Deferred::new();
        let result = deferred.promise();
        self.state.borrow_mut().pending.insert(
            id,
            PendingRequest {
                run_id: run_id.to_string(),
                command,
                deferred,
            },
        );
        (id, result)
    }

    /// Queue a request whose response, if any, nobody waits for
    pub fn send(&self, req: Request, run_id: &str) -> u64 {
        self.enqueue(req, run_id)
    }

    /// Settle the result of the request the response answers. Responses for requests which were
    /// cancelled after being sent settle as cancellations even if they carry a value.
    pub fn dispatch(&self, response: ServerResponse) -> Result<(), ProtocolError> {
        let (pending, was_cancelled) = {
            let mut s = self.state.borrow_mut();
            let was_cancelled = s.cancelled.remove(&response.id);
            (s.pending.remove(&response.id), was_cancelled)
        };
        let Some(pending) = pending else {
            return Err(ProtocolError::UnknownRequest(response.id));
        };
        trace!(request_id = response.id, command = %pending.command, run_id = %pending.run_id,
               "Resolving request");
        match response.result {
            Ok(_) if was_cancelled => {
                pending.deferred.reject(WorkflowError::cancelled(format!(
                    "{} request was cancelled",
                    pending.command
                )));
            }
            Ok(vals) => {
                pending.deferred.resolve(vals);
            }
            Err(f) => {
                pending.deferred.reject(WorkflowError::from_failure(f));
            }
        }
        Ok(())
    }

    /// Cancel a request. A request which never left the queue is dropped and its result rejected
    /// right away. Otherwise a `Cancel` command is sent and the request is marked so its eventual
    /// response settles as a cancellation.
    pub fn cancel(&self, id: u64) {
        let (run_id, to_reject) = {
            let mut s = self.state.borrow_mut();
            let Some(run_id) = s.pending.get(&id).map(|p| p.run_id.clone()) else {
                return;
            };
            if let Some(pos) = s.queue.iter().position(|(_, m)| m.id == id) {
                s.queue.remove(pos);
                (run_id, s.pending.remove(&id))
            } else {
                if !s.cancelled.insert(id) {
                    return;
                }
                (run_id, None)
            }
        };
        match to_reject {
            Some(p) => {
                debug!(request_id = id, run_id = %run_id, "Dropped queued request on cancel");
                p.deferred.reject(WorkflowError::cancelled(format!(
                    "{} request was cancelled",
                    p.command
                )));
            }
            None => {
                debug!(request_id = id, run_id = %run_id, "Requesting cancellation");
                self.send(Request::cancel([id]), &run_id);
            }
        }
    }

    /// Take every queued message, in the order the requests were issued
    pub fn fetch(&self) -> Vec<Message> {
        self.state
            .borrow_mut()
            .queue
            .drain(..)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn is_queued(&self, id: u64) -> bool {
        self.state.borrow().queue.iter().any(|(_, m)| m.id == id)
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.state.borrow().pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Drop everything belonging to a run without settling it
    pub fn forget_run(&self, run_id: &str) {
        let mut s = self.state.borrow_mut();
        let ClientState {
            queue,
            pending,
            cancelled,
            ..
        } = &mut *s;
        queue.retain(|(r, _)| r != run_id);
        pending.retain(|id, p| {
            let keep = p.run_id != run_id;
            if !keep {
                cancelled.remove(id);
            }
            keep
        });
    }
}
