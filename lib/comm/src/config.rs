// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Communicator configuration.
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults (blocking mode)
//! 2. TOML file from `DYN_COMM_CONFIG_PATH`
//! 3. Environment variables (`DYN_COMM_*`)

use std::sync::OnceLock;
use std::time::Duration;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// Init/abort deadline used in nonblocking mode when none is configured.
pub const DEFAULT_NONBLOCKING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Process-level communicator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CommConfig {
    /// Create communicators in nonblocking mode (`DYN_COMM_NONBLOCKING`).
    #[serde(default)]
    pub nonblocking: bool,

    /// Deadline for nonblocking init and abort polling
    /// (`DYN_COMM_NONBLOCKING_TIMEOUT_SECS`). Ignored in blocking mode.
    #[validate(range(min = 1))]
    #[serde(default)]
    pub nonblocking_timeout_secs: Option<u64>,
}

impl CommConfig {
    /// Blocking configuration.
    pub fn blocking() -> Self {
        Self::default()
    }

    /// Nonblocking configuration with an optional deadline.
    pub fn nonblocking(timeout: Option<Duration>) -> Self {
        Self {
            nonblocking: true,
            nonblocking_timeout_secs: timeout.map(|t| t.as_secs().max(1)),
        }
    }

    /// Deadline for init and abort polling.
    pub fn init_timeout(&self) -> Duration {
        self.nonblocking_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_NONBLOCKING_TIMEOUT)
    }

    pub fn figment() -> Figment {
        let config_path = std::env::var("DYN_COMM_CONFIG_PATH").unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(CommConfig::default()))
            .merge(Toml::file(&config_path))
            // DYN_COMM_NONBLOCKING, DYN_COMM_NONBLOCKING_TIMEOUT_SECS
            .merge(
                Env::prefixed("DYN_COMM_")
                    .ignore(&["CONFIG_PATH"])
                    .map(|k| k.as_str().to_lowercase().into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract configuration from any provider, then validate it.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let mut config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;

        if !config.nonblocking && config.nonblocking_timeout_secs.is_some() {
            tracing::warn!(
                timeout_secs = config.nonblocking_timeout_secs,
                "nonblocking timeout is set but nonblocking mode is disabled; ignoring it"
            );
            config.nonblocking_timeout_secs = None;
        }

        Ok(config)
    }

    /// Process-wide configuration, loaded from the environment on first use.
    ///
    /// A configuration that fails to load is logged and replaced by defaults.
    pub fn global() -> &'static CommConfig {
        static GLOBAL: OnceLock<CommConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "invalid communicator configuration; using defaults");
                Self::default()
            }
        })
    }
}
