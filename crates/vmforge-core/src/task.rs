// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task lifecycle model.
//!
//! ```text
//!   ┌─────────┐  start   ┌─────────┐  complete  ┌─────────┐
//!   │ PENDING │─────────►│ RUNNING │───────────►│ SUCCESS │
//!   └────┬────┘          └────┬────┘            └─────────┘
//!        │                    │ fail            ┌─────────┐
//!        └────────────────────┴────────────────►│ FAILURE │
//!              interrupted                      └─────────┘
//! ```
//!
//! Transitions only move forward. `SUCCESS` and `FAILURE` are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Lifecycle state of a provisioning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Recorded at submission, workflow not yet started.
    Pending,
    /// Workflow is executing.
    Running,
    /// Workflow finished and the instance is reachable.
    Success,
    /// Workflow failed; the result carries the reason.
    Failure,
}

impl TaskStatus {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parse a status from its stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failure => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.rank() > self.rank()
    }

    /// States from which `self` may be entered.
    pub fn predecessors(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending],
            Self::Success | Self::Failure => &[Self::Pending, Self::Running],
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a fresh opaque task identity.
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// A task row as stored by the task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Unique task identity.
    pub id: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Result text, present only once the task is terminal.
    pub result: Option<String>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task last changed state.
    pub updated_at: DateTime<Utc>,
}

/// Answer to a status poll.
///
/// Serializes to `{"status": ..., "result": ...}` for known tasks and to
/// `{"status": "not_found"}` for unknown ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPoll {
    /// The task exists.
    Found {
        /// Current lifecycle state.
        status: TaskStatus,
        /// Result text if the task is terminal.
        result: Option<String>,
    },
    /// No task has this identity.
    NotFound,
}

impl TaskPoll {
    /// Whether the polled task reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Found { status, .. } if status.is_terminal())
    }
}

impl From<Option<TaskRecord>> for TaskPoll {
    fn from(record: Option<TaskRecord>) -> Self {
        match record {
            Some(r) => TaskPoll::Found {
                status: r.status,
                result: r.result,
            },
            None => TaskPoll::NotFound,
        }
    }
}

impl Serialize for TaskPoll {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaskPoll::Found { status, result } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("status", status)?;
                map.serialize_entry("result", result)?;
                map.end()
            }
            TaskPoll::NotFound => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("status", "not_found")?;
                map.end()
            }
        }
    }
}
