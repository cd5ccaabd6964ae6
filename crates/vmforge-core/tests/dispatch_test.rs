// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for action dispatch and public address rotation.

mod common;

use common::*;
use vmforge_core::error::{RunnerError, SubmitError, UnknownAction};
use vmforge_core::platform::{CallPhase, Operation, PlatformError};

#[tokio::test]
async fn test_actions_map_to_platform_operations() {
    let cases = [
        ("start", Operation::StartVm),
        ("stop", Operation::DeallocateVm),
        ("restart", Operation::RestartVm),
        ("delete", Operation::DeleteResourceGroup),
    ];

    for (keyword, expected) in cases {
        let ctx = TestContext::new().await;
        ctx.platform.seed_virtual_machine("rg-1", "vm-1", "westeurope", true);

        ctx.control
            .submit_action(credentials(), "rg-1", "vm-1", keyword)
            .unwrap();
        ctx.wait_idle().await;

        assert_eq!(ctx.platform.submitted(), vec![expected], "{}", keyword);
        assert_eq!(ctx.connector.connect_count(), 1);
    }
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let ctx = TestContext::new().await;

    let err = ctx
        .control
        .submit_action(credentials(), "rg-1", "vm-1", "hibernate")
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::UnknownAction(UnknownAction(ref s)) if s == "hibernate"
    ));
    assert_eq!(err.error_code(), "UNKNOWN_ACTION");
    assert_eq!(ctx.control.runner().active_count(), 0);
    assert_eq!(ctx.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_action_failure_is_not_surfaced() {
    let ctx = TestContext::new().await;
    ctx.platform.seed_virtual_machine("rg-1", "vm-1", "westeurope", true);
    ctx.platform.fail_on_completion(
        Operation::StartVm,
        PlatformError::with_code("OperationNotAllowed", "quota exceeded"),
    );

    ctx.control
        .submit_action(credentials(), "rg-1", "vm-1", "start")
        .expect("submission succeeds even if the action later fails");
    ctx.wait_idle().await;

    let phases: Vec<_> = ctx
        .platform
        .calls()
        .into_iter()
        .map(|c| c.phase)
        .collect();
    assert_eq!(phases, vec![CallPhase::Submitted, CallPhase::Failed]);
}

#[tokio::test]
async fn test_rotation_detaches_before_deleting() {
    let ctx = TestContext::new().await;
    ctx.platform.seed_virtual_machine("rg-1", "vm-1", "westeurope", true);

    ctx.control
        .submit_rotation(credentials(), "rg-1", "vm-1")
        .unwrap();
    ctx.wait_idle().await;

    let calls = ctx.platform.calls();
    let detach_done = calls
        .iter()
        .position(|c| {
            c.operation == Operation::CreateNetworkInterface && c.phase == CallPhase::Completed
        })
        .expect("interface push completed");
    let delete_issued = calls
        .iter()
        .position(|c| c.operation == Operation::DeletePublicIp && c.phase == CallPhase::Submitted)
        .expect("old address delete issued");
    assert!(detach_done < delete_issued);

    assert!(
        calls
            .iter()
            .all(|c| c.phase != CallPhase::Failed),
        "{:?}",
        calls
    );
    assert!(ctx.platform.public_ip("rg-1", "pip-vm-1").is_none());

    let nic = ctx.platform.network_interface("rg-1", "nic-vm-1").unwrap();
    let attached = nic.ip_configurations[0]
        .public_ip_address_id
        .as_deref()
        .unwrap();
    assert!(attached.contains("/publicIPAddresses/pip-vm-1-"));
}

#[tokio::test]
async fn test_rotation_on_missing_instance_is_logged_only() {
    let ctx = TestContext::new().await;

    ctx.control
        .submit_rotation(credentials(), "rg-1", "ghost")
        .unwrap();
    ctx.wait_idle().await;

    assert_eq!(ctx.platform.submitted(), vec![Operation::GetVirtualMachine]);
}

#[tokio::test]
async fn test_submissions_rejected_after_shutdown() {
    let ctx = TestContext::new().await;
    assert!(ctx.control.shutdown(std::time::Duration::from_secs(1)).await);

    let err = ctx
        .control
        .submit_rotation(credentials(), "rg-1", "vm-1")
        .unwrap_err();
    assert!(matches!(err, SubmitError::Runner(RunnerError::ShuttingDown)));

    let err = ctx
        .control
        .submit_provision(credentials(), request("ubuntu22"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RUNNER_SHUTTING_DOWN");
}
