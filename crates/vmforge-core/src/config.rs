// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Shortest admin secret the engine will generate.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// vmforge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL for the task store
    pub database_url: String,
    /// Maximum workflows running at once
    pub max_concurrent_workflows: usize,
    /// Admin login set on every provisioned instance
    pub admin_username: String,
    /// Length of generated admin secrets
    pub password_length: usize,
    /// How long shutdown waits for running workflows
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_concurrent_workflows: 32,
            admin_username: "azureuser".to_string(),
            password_length: 12,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VMFORGE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `VMFORGE_MAX_CONCURRENT_WORKFLOWS`: Max running workflows (default: 32)
    /// - `VMFORGE_ADMIN_USERNAME`: Instance admin login (default: azureuser)
    /// - `VMFORGE_PASSWORD_LENGTH`: Generated secret length (default: 12, min: 8)
    /// - `VMFORGE_SHUTDOWN_TIMEOUT_SECS`: Drain timeout on shutdown (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = std::env::var("VMFORGE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("VMFORGE_DATABASE_URL"))?;

        let max_concurrent_workflows: usize = std::env::var("VMFORGE_MAX_CONCURRENT_WORKFLOWS")
            .unwrap_or_else(|_| defaults.max_concurrent_workflows.to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "VMFORGE_MAX_CONCURRENT_WORKFLOWS",
                "must be a positive integer",
            ))?;

        let admin_username = std::env::var("VMFORGE_ADMIN_USERNAME")
            .unwrap_or(defaults.admin_username);
        if admin_username.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "VMFORGE_ADMIN_USERNAME",
                "must not be empty",
            ));
        }

        let password_length: usize = std::env::var("VMFORGE_PASSWORD_LENGTH")
            .unwrap_or_else(|_| defaults.password_length.to_string())
            .parse()
            .ok()
            .filter(|n| *n >= MIN_PASSWORD_LENGTH)
            .ok_or(ConfigError::Invalid(
                "VMFORGE_PASSWORD_LENGTH",
                "must be an integer of at least 8",
            ))?;

        let shutdown_secs: u64 = std::env::var("VMFORGE_SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| defaults.shutdown_timeout.as_secs().to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "VMFORGE_SHUTDOWN_TIMEOUT_SECS",
                    "must be a non-negative number of seconds",
                )
            })?;

        Ok(Self {
            database_url,
            max_concurrent_workflows,
            admin_username,
            password_length,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
