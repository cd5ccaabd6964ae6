// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! vmforge Core - Virtual Machine Provisioning Engine
//!
//! This crate runs long, failure-prone cloud provisioning workflows off the
//! request path, records their progress in a durable task registry, and rolls
//! back partial builds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Request layer (HTTP)                     │
//! └──────────────────────────────────────────────────────────────┘
//!          │ submit / poll
//!          ▼
//! ┌──────────────────────┐   spawn   ┌────────────────────────────┐
//! │     ControlPlane     │──────────►│       WorkflowRunner       │
//! │  validate, name,     │           │  bounded, supervised tasks │
//! │  create task         │           └─────────────┬──────────────┘
//! └──────────┬───────────┘                         │
//!            │                                     ▼
//!            │                       ┌────────────────────────────┐
//!            │                       │ provision / rotate / action│
//!            │                       └──────┬──────────────┬──────┘
//!            ▼                              │              │
//! ┌──────────────────────┐  transition      │              ▼
//! │      TaskStore       │◄─────────────────┘   ┌────────────────────┐
//! │  SQLite / Postgres   │                      │   CloudPlatform    │
//! └──────────────────────┘                      └────────────────────┘
//! ```
//!
//! # Task Lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `pending` | Recorded at submission, workflow not yet started |
//! | `running` | Workflow is creating resources |
//! | `success` | Result holds the instance name, address and admin login |
//! | `failure` | Result holds the reason; the resource group was deleted |
//!
//! Terminal states are final. Tasks left `pending` or `running` by a crash are
//! failed by [`control::ControlPlane::recover_interrupted`].
//!
//! # Workflows
//!
//! | Workflow | Tracked | On failure |
//! |----------|---------|------------|
//! | Provision | Task | Recorded, resource group deleted |
//! | Rotate public IP | No | Logged |
//! | Start / stop / restart / delete | No | Logged |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the `VMFORGE_*` environment variables.

#![deny(missing_docs)]

/// Environment-driven configuration.
pub mod config;

/// Submission and polling facade.
pub mod control;

/// Error types with stable error codes.
pub mod error;

/// OS image table.
pub mod image;

/// Embedded SQL migrations.
pub mod migrations;

/// Resource naming and admin secret generation.
pub mod naming;

/// Task store trait with SQLite and PostgreSQL backends.
pub mod persistence;

/// Cloud platform capability traits and the in-memory mock.
pub mod platform;

/// Bounded background workflow execution.
pub mod runner;

/// Task status model and poll view.
pub mod task;

/// Tracing subscriber setup.
pub mod telemetry;

/// Provisioning, rotation and action workflows.
pub mod workflow;

pub use config::Config;
pub use control::{ControlPlane, ControlPlaneBuilder};
pub use error::{RunnerError, StoreError, SubmitError, WorkflowError};
pub use persistence::{PostgresTaskStore, SqliteTaskStore, TaskStore};
pub use task::{TaskPoll, TaskStatus};
