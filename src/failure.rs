//! The failure chain exchanged with the orchestrator.
//!
//! Failures nest through `cause`: a child workflow failure wraps an activity failure which wraps
//! the application failure raised by the activity, so callers can inspect where an error
//! originated across process boundaries.

use crate::payloads::EncodedValues;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A (possibly chained) failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    /// Human readable message
    pub message: String,
    /// Identifies the SDK or component which produced the failure
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_trace: String,
    /// The failure which caused this one, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
    /// Type specific information
    #[serde(default)]
    pub info: FailureInfo,
}

/// Type specific failure information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FailureInfo {
    /// Raised from user code
    #[serde(rename_all = "camelCase")]
    Application {
        type_name: String,
        #[serde(default)]
        non_retryable: bool,
        #[serde(default, skip_serializing_if = "EncodedValues::is_empty")]
        details: EncodedValues,
    },
    /// The operation was canceled
    #[serde(rename_all = "camelCase")]
    Canceled {
        #[serde(default, skip_serializing_if = "EncodedValues::is_empty")]
        details: EncodedValues,
    },
    /// The operation timed out
    #[serde(rename_all = "camelCase")]
    Timeout { timeout_type: String },
    /// The execution was terminated
    Terminated,
    /// Generated by the server
    #[serde(rename_all = "camelCase")]
    Server { non_retryable: bool },
    /// Wraps the cause of an activity failing
    #[serde(rename_all = "camelCase")]
    Activity {
        scheduled_event_id: i64,
        started_event_id: i64,
        activity_id: String,
        activity_type: String,
        #[serde(default)]
        retry_state: String,
    },
    /// Wraps the cause of a child workflow failing
    #[serde(rename_all = "camelCase")]
    ChildWorkflowExecution {
        namespace: String,
        workflow_id: String,
        run_id: String,
        workflow_type: String,
        #[serde(default)]
        retry_state: String,
    },
    #[default]
    Unknown,
}

impl Failure {
    /// Create an application failure with the given message and type name
    pub fn application(message: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            info: FailureInfo::Application {
                type_name: type_name.into(),
                non_retryable: false,
                details: EncodedValues::default(),
            },
            ..Default::default()
        }
    }

    /// Create a cancellation failure
    pub fn canceled(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            info: FailureInfo::Canceled {
                details: EncodedValues::default(),
            },
            ..Default::default()
        }
    }

    /// Attach a cause, returning the wrapping failure
    pub fn caused_by(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterate over this failure followed by each of its causes
    pub fn chain(&self) -> impl Iterator<Item = &Failure> {
        std::iter::successors(Some(self), |f| f.cause.as_deref())
    }

    /// The innermost failure of the chain
    pub fn root_cause(&self) -> &Failure {
        self.chain().last().unwrap_or(self)
    }

    /// True if any failure in the chain is a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.chain()
            .any(|f| matches!(f.info, FailureInfo::Canceled { .. }))
    }

    pub(crate) fn is_nondeterminism(&self) -> bool {
        matches!(self.info, FailureInfo::Server { .. })
            && self.message.to_lowercase().contains("nondeterministic")
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(c) = &self.cause {
            write!(f, ": {c}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}
