// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! edgebus Logging Module.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `EDGEBUS_LOGGING_CONFIG_PATH` environment variable.
//!   3. `/opt/edgebus/etc/logging.toml`.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `EDGEBUS_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `EDGEBUS_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file.
//!
//! Example:
//! ```toml
//! log_level = "error"
//!
//! [log_filters]
//! "edgebus_runtime::databus" = "debug"
//! "edgebus_runtime::topology" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::Directive, fmt};

use crate::config::environment_names::logging as env_logging;
use crate::config::{disable_ansi_logging, jsonl_logging_enabled, use_local_timezone};

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
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
                ("tonic".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("rumqttc".to_string(), "error".to_string()),
                ("opcua".to_string(), "error".to_string()),
                ("rustls".to_string(), "error".to_string()),
            ]),
        }
    }
}

/// Initialize the logger. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = setup_logging() {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    });
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter_layer = filters(load_config()?)?;

    if jsonl_logging_enabled() {
        // one object per line, event fields flattened next to the message
        let l = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_file(true)
            .with_line_number(true)
            .with_timer(TimeFormatter::new())
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()?;
    } else {
        let l = fmt::layer()
            .with_ansi(!disable_ansi_logging())
            .event_format(fmt::format().compact().with_timer(TimeFormatter::new()))
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()?;
    }

    Ok(())
}

fn filters(config: LoggingConfig) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(config.log_level.parse()?)
        .with_env_var(env_logging::EDGEBUS_LOG)
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
    Ok(filter_layer)
}

fn load_config() -> Result<LoggingConfig, figment::Error> {
    let config_path =
        std::env::var(env_logging::EDGEBUS_LOGGING_CONFIG_PATH).unwrap_or_default();
    Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file("/opt/edgebus/etc/logging.toml"))
        .merge(Toml::file(config_path))
        .extract()
}

struct TimeFormatter {
    use_local_tz: bool,
}

impl TimeFormatter {
    fn new() -> Self {
        Self {
            use_local_tz: use_local_timezone(),
        }
    }

    fn format_now(&self) -> String {
        if self.use_local_tz {
            chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f%:z")
                .to_string()
        } else {
            chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.6fZ")
                .to_string()
        }
    }
}

impl FormatTime for TimeFormatter {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.format_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_parse() {
        let filter = filters(LoggingConfig::default());
        assert!(filter.is_ok());
    }

    #[test]
    fn test_load_config_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logging.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[log_filters]\n\"edgebus_runtime::databus\" = \"trace\"\n",
        )?;
        temp_env::with_var(
            env_logging::EDGEBUS_LOGGING_CONFIG_PATH,
            Some(path.as_os_str()),
            || {
                let config = load_config().unwrap();
                assert_eq!(config.log_level, "debug");
                assert_eq!(config.log_filters["edgebus_runtime::databus"], "trace");
                // defaults survive the merge
                assert_eq!(config.log_filters["rumqttc"], "error");
            },
        );
        Ok(())
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!(check = true, "logging initialized twice");
    }
}
