// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vmforge-core.
//!
//! Store errors are programming errors at the call site and are never retried.
//! Workflow errors are always recovered inside the workflow and recorded as the
//! task's failure result; [`WorkflowError::failure_reason`] produces that text.

use thiserror::Error;

use crate::platform::PlatformError;
use crate::task::TaskStatus;

/// Platform error code returned when a subscription may not deploy into a region.
pub const REQUEST_DISALLOWED_CODE: &str = "RequestDisallowedByAzure";

/// Result type for task store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by the task store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A task with this identity already exists.
    #[error("Task '{task_id}' already exists")]
    DuplicateTask {
        /// The conflicting task ID.
        task_id: String,
    },

    /// No task with this identity exists.
    #[error("Task '{task_id}' not found")]
    UnknownTask {
        /// The missing task ID.
        task_id: String,
    },

    /// The task already reached a terminal state and cannot be rewritten.
    #[error("Task '{task_id}' is already terminal ('{status}')")]
    TerminalTask {
        /// The task ID.
        task_id: String,
        /// The terminal status currently recorded.
        status: TaskStatus,
    },

    /// The requested transition would move the task backwards.
    #[error("Task '{task_id}' cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        /// The task ID.
        task_id: String,
        /// The currently recorded status.
        from: TaskStatus,
        /// The requested status.
        to: TaskStatus,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateTask { .. } => "DUPLICATE_TASK",
            Self::UnknownTask { .. } => "UNKNOWN_TASK",
            Self::TerminalTask { .. } => "TERMINAL_TASK",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

/// Errors raised while provisioning a virtual machine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The OS image selector is not in the image table.
    #[error("Unknown OS image '{0}'")]
    UnknownImage(String),

    /// The bootstrap payload is not valid base64-encoded text.
    #[error("Invalid user data: {0}")]
    InvalidUserData(String),

    /// The account is not entitled to provision in the requested region.
    #[error("account is not permitted to create instances in this region")]
    RegionDisallowed(#[source] PlatformError),

    /// Any other platform failure; the text passes through unchanged.
    #[error(transparent)]
    Platform(PlatformError),

    /// The success payload could not be serialized.
    #[error("Failed to encode outcome: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workflow task panicked before recording an outcome.
    #[error("workflow crashed")]
    Crashed,
}

impl WorkflowError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownImage(_) => "UNKNOWN_IMAGE",
            Self::InvalidUserData(_) => "INVALID_USER_DATA",
            Self::RegionDisallowed(_) => "REGION_DISALLOWED",
            Self::Platform(_) => "PLATFORM_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Crashed => "WORKFLOW_CRASHED",
        }
    }

    /// Human-readable reason recorded into a failed task's result.
    pub fn failure_reason(&self) -> String {
        self.to_string()
    }
}

impl From<PlatformError> for WorkflowError {
    fn from(err: PlatformError) -> Self {
        if err.code.as_deref() == Some(REQUEST_DISALLOWED_CODE) {
            WorkflowError::RegionDisallowed(err)
        } else {
            WorkflowError::Platform(err)
        }
    }
}

/// Errors raised while rotating an instance's public address.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RotationError {
    /// The instance has no network interface attached.
    #[error("Virtual machine '{vm_name}' has no network interface")]
    NoNetworkInterface {
        /// The instance name.
        vm_name: String,
    },

    /// The network interface has no IP configuration.
    #[error("Network interface '{nic_name}' has no IP configuration")]
    NoIpConfiguration {
        /// The interface name.
        nic_name: String,
    },

    /// A platform call failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Errors from the workflow runner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunnerError {
    /// All workflow slots are in use.
    #[error("Workflow capacity exhausted ({limit} running)")]
    Saturated {
        /// The configured concurrency limit.
        limit: usize,
    },

    /// The runner is draining and no longer accepts work.
    #[error("Workflow runner is shutting down")]
    ShuttingDown,
}

/// An action keyword that maps to no platform operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown action '{0}'")]
pub struct UnknownAction(pub String);

/// Errors returned synchronously to a submitter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmitError {
    /// The action keyword is not recognized.
    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),

    /// The request failed validation before any platform call.
    #[error(transparent)]
    Invalid(#[from] WorkflowError),

    /// The runner refused the workflow.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// The task could not be recorded.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::Invalid(e) => e.error_code(),
            Self::Runner(RunnerError::Saturated { .. }) => "RUNNER_SATURATED",
            Self::Runner(_) => "RUNNER_SHUTTING_DOWN",
            Self::Store(e) => e.error_code(),
        }
    }
}
