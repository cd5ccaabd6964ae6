// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OS image selectors and their marketplace references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Marketplace image coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Image publisher.
    pub publisher: String,
    /// Offer within the publisher's catalog.
    pub offer: String,
    /// Image SKU.
    pub sku: String,
    /// Image version.
    pub version: String,
}

/// Supported OS images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsImage {
    /// Debian 12 "bookworm".
    Debian12,
    /// Debian 11 "bullseye".
    Debian11,
    /// Ubuntu 22.04 LTS.
    Ubuntu22,
    /// Ubuntu 20.04 LTS.
    Ubuntu20,
}

impl OsImage {
    /// Every supported image, in display order.
    pub const ALL: [OsImage; 4] = [
        OsImage::Debian12,
        OsImage::Debian11,
        OsImage::Ubuntu22,
        OsImage::Ubuntu20,
    ];

    /// Selector string accepted in provisioning requests.
    pub fn selector(&self) -> &'static str {
        match self {
            Self::Debian12 => "debian12",
            Self::Debian11 => "debian11",
            Self::Ubuntu22 => "ubuntu22",
            Self::Ubuntu20 => "ubuntu20",
        }
    }

    /// Marketplace reference for this image, always pinned to `latest`.
    pub fn reference(&self) -> ImageReference {
        let (publisher, offer, sku) = match self {
            Self::Debian12 => ("Debian", "debian-12", "12-gen2"),
            Self::Debian11 => ("Debian", "debian-11", "11-gen2"),
            Self::Ubuntu22 => ("Canonical", "0001-com-ubuntu-server-jammy", "22_04-lts-gen2"),
            Self::Ubuntu20 => ("Canonical", "0001-com-ubuntu-server-focal", "20_04-lts-gen2"),
        };
        ImageReference {
            publisher: publisher.to_string(),
            offer: offer.to_string(),
            sku: sku.to_string(),
            version: "latest".to_string(),
        }
    }
}

impl FromStr for OsImage {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OsImage::ALL
            .into_iter()
            .find(|image| image.selector() == s)
            .ok_or_else(|| WorkflowError::UnknownImage(s.to_string()))
    }
}

impl fmt::Display for OsImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_selector_parses() {
        for image in OsImage::ALL {
            assert_eq!(image.selector().parse::<OsImage>().unwrap(), image);
        }
    }

    #[test]
    fn test_unknown_selector_is_rejected() {
        let err = "windows2022".parse::<OsImage>().unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownImage(ref s) if s == "windows2022"));

        // Selectors are exact.
        assert!("Debian12".parse::<OsImage>().is_err());
    }

    #[test]
    fn test_image_table() {
        let jammy = OsImage::Ubuntu22.reference();
        assert_eq!(jammy.publisher, "Canonical");
        assert_eq!(jammy.offer, "0001-com-ubuntu-server-jammy");
        assert_eq!(jammy.sku, "22_04-lts-gen2");
        assert_eq!(jammy.version, "latest");

        let bookworm = OsImage::Debian12.reference();
        assert_eq!(bookworm.publisher, "Debian");
        assert_eq!(bookworm.offer, "debian-12");
        assert_eq!(bookworm.sku, "12-gen2");
    }
}
