// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflows executed by the runner.
//!
//! - [`provision`]: task-tracked instance build-out with rollback.
//! - [`rotate_ip`]: public address replacement, logged only.
//! - [`action`]: single lifecycle operations, logged only.

pub mod action;
pub mod provision;
pub mod rotate_ip;

pub use self::action::{ActionJob, VmAction, run_action};
pub use self::provision::{
    ProvisionJob, ProvisionOutcome, ProvisionRequest, record_crash, run_provision,
};
pub use self::rotate_ip::{RotationJob, rotate_public_ip, run_rotation};
