//! Frames exchanged with the host process.
//!
//! Every frame carries the environment of the batch (`TickInfo`) and an ordered list of
//! messages. A message with a command name is a command from the orchestrator; a message without
//! one is the response to a request this worker issued earlier, correlated by id.

pub mod commands;

use crate::{
    errors::{DispatchError, ProtocolError},
    failure::Failure,
    payloads::{EncodedValues, Payload},
};
use chrono::{DateTime, Utc};
use commands::Request;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Environment headers delivered alongside each batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickInfo {
    #[serde(default)]
    pub task_queue: String,
    /// The authoritative logical clock
    #[serde(default)]
    pub tick_time: DateTime<Utc>,
    /// True when the orchestrator is replaying history
    #[serde(default)]
    pub replay: bool,
    #[serde(default)]
    pub rid: String,
}

/// One batch of messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub context: TickInfo,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Frame {
    pub fn new(context: TickInfo, messages: Vec<Message>) -> Self {
        Self { context, messages }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A single message in either direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "EncodedValues::is_empty")]
    pub payloads: EncodedValues,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(ServerCommand),
    Response(ServerResponse),
}

/// A command sent by the orchestrator which must be answered with the same id
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCommand {
    pub id: u64,
    pub name: String,
    pub options: Map<String, Value>,
    pub payloads: EncodedValues,
    pub header: HashMap<String, Payload>,
}

/// The outcome of a request this worker issued
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub id: u64,
    pub result: Result<EncodedValues, Failure>,
}

impl Message {
    /// Build the answer to a server command
    pub fn response(id: u64, result: Result<EncodedValues, Failure>) -> Self {
        match result {
            Ok(payloads) => Self {
                id,
                payloads,
                ..Default::default()
            },
            Err(f) => Self {
                id,
                failure: Some(f),
                ..Default::default()
            },
        }
    }

    pub fn classify(self) -> Inbound {
        match self.command {
            Some(name) => Inbound::Command(ServerCommand {
                id: self.id,
                name,
                options: self.options,
                payloads: self.payloads,
                header: self.header,
            }),
            None => Inbound::Response(ServerResponse {
                id: self.id,
                result: match self.failure {
                    Some(f) => Err(f),
                    None => Ok(self.payloads),
                },
            }),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        let (id, name, options, payloads, header, failure) = r.into_parts();
        Self {
            id,
            command: Some(name.to_string()),
            options,
            payloads,
            header,
            failure,
        }
    }
}

impl ServerCommand {
    pub fn new(id: u64, name: impl Into<String>, options: Value, payloads: EncodedValues) -> Self {
        Self {
            id,
            name: name.into(),
            options: match options {
                Value::Object(m) => m,
                _ => Map::new(),
            },
            payloads,
            header: HashMap::new(),
        }
    }

    /// Read a required option
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<T, DispatchError> {
        let v = self
            .options
            .get(key)
            .ok_or_else(|| DispatchError::malformed(&self.name, format!("missing `{key}`")))?;
        serde_json::from_value(v.clone())
            .map_err(|e| DispatchError::malformed(&self.name, format!("`{key}`: {e}")))
    }

    /// Read an option which may be absent
    pub fn option_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, DispatchError> {
        if self.options.get(key).map_or(true, Value::is_null) {
            return Ok(T::default());
        }
        self.option(key)
    }
}

impl From<ServerCommand> for Message {
    fn from(c: ServerCommand) -> Self {
        Self {
            id: c.id,
            command: Some(c.name),
            options: c.options,
            payloads: c.payloads,
            header: c.header,
            failure: None,
        }
    }
}

impl From<ServerResponse> for Message {
    fn from(r: ServerResponse) -> Self {
        Message::response(r.id, r.result)
    }
}
