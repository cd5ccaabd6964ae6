// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Derived resource names and generated admin secrets.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

/// Characters an admin secret is drawn from.
pub const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()";

/// Names derived for one provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// Instance name.
    pub vm_name: String,
    /// Resource group holding every resource of the instance.
    pub resource_group: String,
}

impl ResourceNames {
    /// Derive names from the region, the submission time and the task identity.
    ///
    /// The region is lowercased with spaces removed. A suffix derived from the
    /// whole task identity keeps same-second submissions apart, see
    /// [`identity_suffix`].
    pub fn generate(region: &str, task_id: &str, now: DateTime<Utc>) -> Self {
        let region: String = region
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        let vm_name = format!(
            "vm-{}-{}-{}",
            region,
            now.timestamp(),
            identity_suffix(task_id)
        );
        Self {
            resource_group: vm_name.clone(),
            vm_name,
        }
    }
}

/// Longest caller identity used verbatim as a name suffix.
pub const MAX_VERBATIM_SUFFIX: usize = 12;

/// Name suffix for a task identity. Never empty.
///
/// - UUIDs contribute their first eight hex digits.
/// - Short identities made only of lowercase letters and digits are used as is.
/// - Anything else is replaced by the first twelve hex digits of a name-based
///   UUID of the identity, so distinct identities map to distinct suffixes.
pub fn identity_suffix(task_id: &str) -> String {
    if let Ok(id) = Uuid::parse_str(task_id) {
        let mut hex = id.simple().to_string();
        hex.truncate(8);
        return hex;
    }

    let verbatim = !task_id.is_empty()
        && task_id.len() <= MAX_VERBATIM_SUFFIX
        && task_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if verbatim {
        return task_id.to_string();
    }

    let mut hex = Uuid::new_v5(&Uuid::NAMESPACE_OID, task_id.as_bytes())
        .simple()
        .to_string();
    hex.truncate(12);
    hex
}

/// Virtual network name for an instance.
pub fn vnet_name(vm_name: &str) -> String {
    format!("vnet-{}", vm_name)
}

/// Public address name for an instance.
pub fn public_ip_name(vm_name: &str) -> String {
    format!("pip-{}", vm_name)
}

/// Network interface name for an instance.
pub fn nic_name(vm_name: &str) -> String {
    format!("nic-{}", vm_name)
}

/// Name for a replacement public address allocated during rotation.
pub fn rotated_public_ip_name(vm_name: &str, now: DateTime<Utc>) -> String {
    format!("pip-{}-{}", vm_name, now.timestamp())
}

/// Generate a random admin secret of `length` characters.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_names_normalize_region() {
        let names = ResourceNames::generate(
            "West Europe",
            "3f2a9c1e-0000-4000-8000-000000000000",
            at(1_700_000_000),
        );

        assert_eq!(names.vm_name, "vm-westeurope-1700000000-3f2a9c1e");
        assert_eq!(names.resource_group, names.vm_name);
    }

    #[test]
    fn test_same_second_submissions_get_distinct_names() {
        let now = at(1_700_000_000);
        let ids = [
            "aaaaaaaa-1111-4000-8000-000000000000",
            "bbbbbbbb-1111-4000-8000-000000000000",
            "x1",
            "y1",
            "job-zzz",
            "job-zzy",
            "X1",
            "order-000000000001",
            "order-000000000002",
            "",
        ];

        let names: HashSet<String> = ids
            .iter()
            .map(|id| ResourceNames::generate("eastus", id, now).vm_name)
            .collect();
        assert_eq!(names.len(), ids.len(), "{:?}", names);
    }

    #[test]
    fn test_suffix_is_never_empty() {
        for id in ["", "---", "Ünïcode", "job-zzz"] {
            let suffix = identity_suffix(id);
            assert!(!suffix.is_empty(), "{:?}", id);
            assert!(
                suffix
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()),
                "{:?} -> {:?}",
                id,
                suffix
            );
        }
        assert!(!ResourceNames::generate("eastus", "", at(1)).vm_name.ends_with('-'));
    }

    #[test]
    fn test_short_identities_are_kept_verbatim() {
        assert_eq!(identity_suffix("x1"), "x1");
        assert_eq!(identity_suffix("job42"), "job42");
        assert_eq!(identity_suffix("job-42").len(), 12);
        assert_eq!(identity_suffix("job-42"), identity_suffix("job-42"));
    }

    #[test]
    fn test_sub_resource_names() {
        assert_eq!(vnet_name("vm-x"), "vnet-vm-x");
        assert_eq!(public_ip_name("vm-x"), "pip-vm-x");
        assert_eq!(nic_name("vm-x"), "nic-vm-x");
        assert_eq!(
            rotated_public_ip_name("vm-x", at(1_700_000_123)),
            "pip-vm-x-1700000123"
        );
    }

    #[test]
    fn test_password_shape() {
        let password = generate_password(12);
        assert_eq!(password.len(), 12);
        assert!(password.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));

        assert_eq!(generate_password(32).len(), 32);
        assert_ne!(generate_password(32), generate_password(32));
    }
}
