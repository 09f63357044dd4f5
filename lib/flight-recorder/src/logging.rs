// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for processes embedding the flight recorder.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `DYN_LOGGING_CONFIG_PATH` environment variable.
//!
//! Output is compact text on stderr, or one JSON object per line when
//! `DYN_LOGGING_JSONL` is truthy. Set `DYN_LOG_USE_LOCAL_TZ` to stamp events
//! in local time.
//!
//! Filters come from `DYN_LOG` or from the `log_filters` table in the TOML
//! file. The default level is `info`.
//!
//! Example:
//! ```toml
//! log_level = "debug"
//!
//! [log_filters]
//! "dynamo_comm" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::{LocalTime, SystemTime};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt};

/// ENV used to set the log level
const FILTER_ENV: &str = "DYN_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// ENV used to set the path to the logging configuration file
const CONFIG_PATH_ENV: &str = "DYN_LOGGING_CONFIG_PATH";

const JSONL_ENV: &str = "DYN_LOGGING_JSONL";
const LOCAL_TZ_ENV: &str = "DYN_LOG_USE_LOCAL_TZ";

static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([
                ("h2".to_string(), "error".to_string()),
                ("tower".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("axum".to_string(), "error".to_string()),
            ]),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter_layer = filters(load_config());
    // Each builder method returns a different type, so the branches repeat.
    let result = if env_is_truthy(JSONL_ENV) {
        let l = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    } else if env_is_truthy(LOCAL_TZ_ENV) {
        let l = fmt::layer()
            .event_format(fmt::format().compact().with_timer(LocalTime::rfc_3339()))
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    } else {
        let l = fmt::layer()
            .event_format(fmt::format().compact().with_timer(SystemTime))
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {e}");
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config
        .log_level
        .parse::<Directive>()
        .unwrap_or_else(|e| {
            eprintln!("Invalid log level '{}': {e}", config.log_level);
            tracing::level_filters::LevelFilter::INFO.into()
        });
    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let mut figment = Figment::new().merge(Serialized::defaults(LoggingConfig::default()));
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        figment = figment.merge(Toml::file(path));
    }
    figment.extract().unwrap_or_else(|e| {
        eprintln!("Failed to load logging config, using defaults: {e}");
        LoggingConfig::default()
    })
}

fn env_is_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_truthy_values() {
        temp_env::with_vars([("DYN_TEST_FLAG", Some("TRUE"))], || {
            assert!(env_is_truthy("DYN_TEST_FLAG"));
        });
        temp_env::with_vars([("DYN_TEST_FLAG", Some("0"))], || {
            assert!(!env_is_truthy("DYN_TEST_FLAG"));
        });
        temp_env::with_vars([("DYN_TEST_FLAG", None::<&str>)], || {
            assert!(!env_is_truthy("DYN_TEST_FLAG"));
        });
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"\n\n[log_filters]\ndynamo_comm = \"trace\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        temp_env::with_vars([(CONFIG_PATH_ENV, Some(path.as_str()))], || {
            let config = load_config();
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.log_filters["dynamo_comm"], "trace");
            assert_eq!(config.log_filters["axum"], "error");
        });
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        temp_env::with_vars([(CONFIG_PATH_ENV, None::<&str>)], || {
            assert_eq!(load_config(), LoggingConfig::default());
        });
    }
}
