use crate::failure::{Failure, FailureInfo};
use std::fmt::Display;

/// Errors surfaced to workflow code through rejected [crate::CompletableResult]s, stub calls, and
/// proxy calls.
///
/// Cloneable because a single result may be awaited from several places at once.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// The scope this operation belongs to (or the operation itself) was cancelled
    #[error("{0}")]
    Cancelled(String),
    /// The operation is not valid in the current state of the object it was invoked on
    #[error("{0}")]
    IllegalState(String),
    /// A stub or proxy was asked to invoke a method it cannot invoke
    #[error("{0}")]
    BadMethodCall(String),
    /// Arguments or options provided to an operation were invalid
    #[error("{0}")]
    InvalidArgument(String),
    /// The orchestrator reported a failure for a request (activity, child workflow, etc)
    #[error("{}", .0.message)]
    Failure(Box<Failure>),
    /// Could not convert a value to or from its encoded form
    #[error("Payload conversion failed: {0}")]
    Serialization(#[from] PayloadConversionError),
    /// Replayed commands diverged from the recorded history. Not recoverable by the workflow.
    #[error("Nondeterministic workflow: {0}")]
    NonDeterminism(String),
    /// Errors produced while routing a command to its handler
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Workflow code panicked
    #[error("Workflow code panicked: {0}")]
    Panic(String),
}

impl WorkflowError {
    pub(crate) fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Returns true if this error represents a cancellation, either raised locally or reported by
    /// the orchestrator anywhere in a failure's cause chain.
    pub fn is_cancellation(&self) -> bool {
        match self {
            WorkflowError::Cancelled(_) => true,
            WorkflowError::Failure(f) => f.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the failure reported by the orchestrator, if this error carries one
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            WorkflowError::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Maps a failure received from the orchestrator into an error. Server failures flagging a
    /// nondeterministic replay become [WorkflowError::NonDeterminism].
    pub fn from_failure(failure: Failure) -> Self {
        if failure.is_nondeterminism() {
            return WorkflowError::NonDeterminism(failure.message);
        }
        WorkflowError::Failure(Box::new(failure))
    }

    /// Converts any error escaping user code into a workflow error, preserving it if it already
    /// is one.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<WorkflowError>() {
            Ok(we) => we,
            Err(other) => match other.downcast::<Failure>() {
                Ok(f) => WorkflowError::Failure(Box::new(f)),
                Err(other) => WorkflowError::Failure(Box::new(Failure::application(
                    format!("{other:#}"),
                    "Error",
                ))),
            },
        }
    }

    /// Produce the wire form of this error
    pub fn to_failure(&self) -> Failure {
        match self {
            WorkflowError::Failure(f) => (**f).clone(),
            WorkflowError::Cancelled(m) => Failure::canceled(m.clone()),
            WorkflowError::IllegalState(m) => Failure::application(m.clone(), "LogicException"),
            WorkflowError::BadMethodCall(m) => {
                Failure::application(m.clone(), "BadMethodCallException")
            }
            WorkflowError::InvalidArgument(m) => {
                Failure::application(m.clone(), "InvalidArgumentException")
            }
            WorkflowError::Serialization(e) => {
                Failure::application(e.to_string(), "DataConverterException")
            }
            WorkflowError::NonDeterminism(m) => Failure {
                message: m.clone(),
                info: FailureInfo::Server {
                    non_retryable: true,
                },
                ..Default::default()
            },
            WorkflowError::Dispatch(e) => Failure::application(e.to_string(), "DispatchError"),
            WorkflowError::Panic(m) => Failure::application(m.clone(), "PanicError"),
        }
    }
}

/// Errors converting values to and from payloads
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PayloadConversionError {
    /// The payload's metadata declares an encoding this converter does not understand
    #[error("Unsupported payload encoding `{0}`")]
    UnsupportedEncoding(String),
    /// JSON (de)serialization failed
    #[error("{0}")]
    Json(String),
    /// A non-nullable value was expected but none was present
    #[error("Expected a value of type `{0}` but the payload was empty")]
    MissingValue(String),
}

impl From<serde_json::Error> for PayloadConversionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// Errors raised when routing an incoming command
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// No route exists for the command name
    #[error("Method {0} is not registered")]
    MethodNotRegistered(String),
    /// The command targets a run id with no running process
    #[error("Workflow with the specified run identifier \"{0}\" not found")]
    ProcessNotFound(String),
    /// A process with this run id already exists
    #[error("Workflow with run identifier \"{0}\" has already been started")]
    DuplicateRun(String),
    /// The workflow type in a StartWorkflow command was never registered
    #[error("Workflow with the specified name \"{0}\" was not registered")]
    WorkflowNotRegistered(String),
    /// The activity type in an InvokeActivity command was never registered
    #[error("Activity with the specified name \"{0}\" was not registered")]
    ActivityNotRegistered(String),
    /// No handler registered for the query name
    #[error("Unknown query type \"{query}\", known types: [{known}]")]
    QueryNotFound {
        /// The requested query
        query: String,
        /// Comma separated list of registered queries
        known: String,
    },
    /// No handler registered for the update name
    #[error("No update handler registered for update name {0}")]
    UpdateNotFound(String),
    /// The worker refuses to start more workflows than it was configured to hold
    #[error("Workflow cache is full ({0} runs)")]
    CacheFull(usize),
    /// The command arrived with malformed options or payloads
    #[error("Malformed {command} command: {reason}")]
    Malformed {
        /// Name of the command
        command: String,
        /// What was wrong
        reason: String,
    },
}

impl DispatchError {
    pub(crate) fn malformed(command: impl Into<String>, reason: impl Display) -> Self {
        Self::Malformed {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors decoding or encoding frames exchanged with the host process
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match the expected shape
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    /// A response referenced a request id this worker never issued
    #[error("Got the response to undefined request {0}")]
    UnknownRequest(u64),
}
