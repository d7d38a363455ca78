//! The catalog of commands a workflow may issue to the orchestrator.

use crate::{
    errors::PayloadConversionError,
    failure::Failure,
    payloads::{EncodedValues, Payload},
    workflow::options::{
        ActivityOptions, ChildWorkflowOptions, ContinueAsNewOptions, LocalActivityOptions,
    },
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, time::Duration};

/// Names of every command a workflow can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CommandName {
    ExecuteActivity,
    ExecuteLocalActivity,
    ExecuteChildWorkflow,
    GetChildWorkflowExecution,
    SignalExternalWorkflow,
    CancelExternalWorkflow,
    NewTimer,
    SideEffect,
    GetVersion,
    CompleteWorkflow,
    ContinueAsNew,
    Panic,
    UpsertSearchAttributes,
    Cancel,
}

/// A single outbound command. Immutable once built; the correlation id is assigned by the
/// [crate::client::Client] when the request is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    id: u64,
    name: CommandName,
    options: Map<String, Value>,
    payloads: EncodedValues,
    header: HashMap<String, Payload>,
    failure: Option<Failure>,
}

impl Request {
    fn new(name: CommandName, options: Value, payloads: EncodedValues) -> Self {
        let options = match options {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Self {
            id: 0,
            name,
            options,
            payloads,
            header: HashMap::new(),
            failure: None,
        }
    }

    pub fn new_timer(interval: Duration) -> Self {
        Self::new(
            CommandName::NewTimer,
            json!({ "ms": interval.as_millis() as u64 }),
            EncodedValues::empty(),
        )
    }

    pub fn execute_activity(
        name: impl Into<String>,
        args: EncodedValues,
        options: &ActivityOptions,
    ) -> Result<Self, PayloadConversionError> {
        Ok(Self::new(
            CommandName::ExecuteActivity,
            json!({ "name": name.into(), "options": to_json(options)? }),
            args,
        ))
    }

    pub fn execute_local_activity(
        name: impl Into<String>,
        args: EncodedValues,
        options: &LocalActivityOptions,
    ) -> Result<Self, PayloadConversionError> {
        Ok(Self::new(
            CommandName::ExecuteLocalActivity,
            json!({ "name": name.into(), "options": to_json(options)? }),
            args,
        ))
    }

    pub fn execute_child_workflow(
        workflow_type: impl Into<String>,
        args: EncodedValues,
        options: &ChildWorkflowOptions,
    ) -> Result<Self, PayloadConversionError> {
        Ok(Self::new(
            CommandName::ExecuteChildWorkflow,
            json!({ "name": workflow_type.into(), "options": to_json(options)? }),
            args,
        ))
    }

    /// Asks for the execution of the child started by the request with id `start_request_id`
    pub fn get_child_workflow_execution(start_request_id: u64) -> Self {
        Self::new(
            CommandName::GetChildWorkflowExecution,
            json!({ "id": start_request_id }),
            EncodedValues::empty(),
        )
    }

    pub fn signal_external_workflow(
        namespace: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        signal: &str,
        args: EncodedValues,
        child_workflow_only: bool,
    ) -> Self {
        Self::new(
            CommandName::SignalExternalWorkflow,
            json!({
                "namespace": namespace,
                "workflowid": workflow_id,
                "runid": run_id,
                "signal": signal,
                "childWorkflowOnly": child_workflow_only,
            }),
            args,
        )
    }

    pub fn cancel_external_workflow(
        namespace: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Self {
        Self::new(
            CommandName::CancelExternalWorkflow,
            json!({ "namespace": namespace, "workflowid": workflow_id, "runid": run_id }),
            EncodedValues::empty(),
        )
    }

    pub fn side_effect(value: EncodedValues) -> Self {
        Self::new(CommandName::SideEffect, json!({}), value)
    }

    pub fn get_version(change_id: &str, min_supported: i32, max_supported: i32) -> Self {
        Self::new(
            CommandName::GetVersion,
            json!({
                "changeID": change_id,
                "minSupported": min_supported,
                "maxSupported": max_supported,
            }),
            EncodedValues::empty(),
        )
    }

    /// Completes the workflow with either its result or the failure it ended with
    pub fn complete_workflow(result: Result<EncodedValues, Failure>) -> Self {
        match result {
            Ok(vals) => Self::new(CommandName::CompleteWorkflow, json!({}), vals),
            Err(f) => {
                let mut r = Self::new(CommandName::CompleteWorkflow, json!({}), Default::default());
                r.failure = Some(f);
                r
            }
        }
    }

    pub fn continue_as_new(
        workflow_type: impl Into<String>,
        args: EncodedValues,
        options: &ContinueAsNewOptions,
    ) -> Result<Self, PayloadConversionError> {
        Ok(Self::new(
            CommandName::ContinueAsNew,
            json!({ "name": workflow_type.into(), "options": to_json(options)? }),
            args,
        ))
    }

    pub fn panic(failure: Failure) -> Self {
        let mut r = Self::new(CommandName::Panic, json!({}), Default::default());
        r.failure = Some(failure);
        r
    }

    pub fn upsert_search_attributes(attributes: HashMap<String, Value>) -> Self {
        Self::new(
            CommandName::UpsertSearchAttributes,
            json!({ "searchAttributes": attributes }),
            EncodedValues::empty(),
        )
    }

    /// Ask the orchestrator to cancel the requests with the given ids
    pub fn cancel(ids: impl IntoIterator<Item = u64>) -> Self {
        Self::new(
            CommandName::Cancel,
            json!({ "ids": ids.into_iter().collect::<Vec<_>>() }),
            EncodedValues::empty(),
        )
    }

    /// Attach a header value, returning the request
    pub fn with_header(mut self, key: impl Into<String>, value: Payload) -> Self {
        self.header.insert(key.into(), value);
        self
    }

    pub(crate) fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn payloads(&self) -> &EncodedValues {
        &self.payloads
    }

    pub fn header(&self) -> &HashMap<String, Payload> {
        &self.header
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        u64,
        CommandName,
        Map<String, Value>,
        EncodedValues,
        HashMap<String, Payload>,
        Option<Failure>,
    ) {
        (
            self.id,
            self.name,
            self.options,
            self.payloads,
            self.header,
            self.failure,
        )
    }
}

fn to_json<T: Serialize>(v: &T) -> Result<Value, PayloadConversionError> {
    Ok(serde_json::to_value(v)?)
}
