// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flight recorder configuration.
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults (recorder disabled)
//! 2. TOML file from `DYN_FR_CONFIG_PATH`
//! 3. Environment variables (`DYN_FR_*`)

use std::sync::OnceLock;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

pub const DEFAULT_DUMP_PATH_PREFIX: &str = "/tmp/fr_trace_rank_";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RecorderConfig {
    /// Ring capacity in entries (`DYN_FR_BUFFER_SIZE`). 0 disables recording.
    #[serde(default)]
    pub buffer_size: usize,

    /// Walk the native stack on every record (`DYN_FR_CAPTURE_NATIVE_STACK`).
    #[serde(default)]
    pub capture_native_stack: bool,

    /// Default writer destination is `<prefix><rank>` (`DYN_FR_DUMP_PATH_PREFIX`).
    #[validate(length(min = 1))]
    #[serde(default = "default_dump_path_prefix")]
    pub dump_path_prefix: String,
}

fn default_dump_path_prefix() -> String {
    DEFAULT_DUMP_PATH_PREFIX.to_string()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 0,
            capture_native_stack: false,
            dump_path_prefix: default_dump_path_prefix(),
        }
    }
}

impl RecorderConfig {
    /// Enabled configuration with the given capacity.
    pub fn with_capacity(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.buffer_size > 0
    }

    pub fn figment() -> Figment {
        let config_path = std::env::var("DYN_FR_CONFIG_PATH").unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::file(&config_path))
            // DYN_FR_BUFFER_SIZE, DYN_FR_CAPTURE_NATIVE_STACK, DYN_FR_DUMP_PATH_PREFIX
            .merge(
                Env::prefixed("DYN_FR_")
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
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Process-wide configuration, loaded from the environment on first use.
    ///
    /// A configuration that fails to load is logged and replaced by defaults,
    /// which leave the recorder disabled.
    pub fn global() -> &'static RecorderConfig {
        static GLOBAL: OnceLock<RecorderConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "invalid flight recorder configuration; recording disabled");
                Self::default()
            }
        })
    }
}
