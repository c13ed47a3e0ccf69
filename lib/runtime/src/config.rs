// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

pub mod environment_names;

pub use edgebus_config::{env_is_truthy, is_falsey, is_truthy, parse_bool};

/// Default time to wait for the MQTT CONNACK
const DEFAULT_MQTT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default grace period for the MQTT disconnect
const DEFAULT_MQTT_DISCONNECT_TIMEOUT_MS: u64 = 250;

const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 30;

/// Capacity of the rumqttc request channel
const DEFAULT_MQTT_CHANNEL_CAPACITY: usize = 64;

const DEFAULT_OPCUA_APPLICATION_NAME: &str = "edgebus";

/// Tuning knobs for the facade and its transport backends.
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct DataBusConfig {
    /// How long `ContextCreate` waits for the broker to acknowledge an MQTT connection.
    /// Set this at runtime with environment variable EDGEBUS_DATABUS_MQTT_CONNECT_TIMEOUT_MS
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_MQTT_CONNECT_TIMEOUT_MS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub mqtt_connect_timeout_ms: u64,

    /// Bounded grace period for the MQTT disconnect on `ContextDestroy`.
    /// Set this at runtime with environment variable EDGEBUS_DATABUS_MQTT_DISCONNECT_TIMEOUT_MS
    #[builder(default = "DEFAULT_MQTT_DISCONNECT_TIMEOUT_MS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub mqtt_disconnect_timeout_ms: u64,

    /// MQTT keep-alive interval in seconds, must be at least 5 (rumqttc minimum)
    #[validate(range(min = 5))]
    #[builder(default = "DEFAULT_MQTT_KEEP_ALIVE_SECS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub mqtt_keep_alive_secs: u64,

    /// Number of in-flight client requests rumqttc buffers before `publish` waits
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_MQTT_CHANNEL_CAPACITY")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub mqtt_channel_capacity: usize,

    /// Application name the embedded OPC-UA server advertises
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_OPCUA_APPLICATION_NAME.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub opcua_application_name: String,
}

impl fmt::Display for DataBusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mqtt_connect_timeout_ms={}, ",
            self.mqtt_connect_timeout_ms
        )?;
        write!(
            f,
            "mqtt_disconnect_timeout_ms={}, ",
            self.mqtt_disconnect_timeout_ms
        )?;
        write!(f, "mqtt_keep_alive_secs={}, ", self.mqtt_keep_alive_secs)?;
        write!(f, "mqtt_channel_capacity={}, ", self.mqtt_channel_capacity)?;
        write!(f, "opcua_application_name={}", self.opcua_application_name)
    }
}

impl DataBusConfig {
    pub fn builder() -> DataBusConfigBuilder {
        DataBusConfigBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        let prefix = environment_names::databus::EDGEBUS_DATABUS_PREFIX;
        Figment::new()
            .merge(Serialized::defaults(DataBusConfig::default()))
            .merge(Toml::file("/opt/edgebus/etc/databus.toml"))
            .merge(Env::prefixed(prefix).filter_map(move |k| {
                let full_key = format!("{prefix}{}", k.as_str().to_uppercase());
                // filters out empty environment variables
                match std::env::var(&full_key) {
                    Ok(v) if !v.is_empty() => Some(k.into()),
                    _ => None,
                }
            }))
    }

    /// Load the configuration from the environment and configuration files
    /// Configuration is priorities in the following order, where the last has the lowest priority:
    /// 1. Environment variables prefixed with `EDGEBUS_DATABUS_` (top priority)
    /// 2. /opt/edgebus/etc/databus.toml
    /// 3. Built-in defaults
    pub fn from_settings() -> Result<DataBusConfig> {
        let config: DataBusConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_connect_timeout_ms)
    }

    pub fn mqtt_disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_disconnect_timeout_ms)
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }
}

impl Default for DataBusConfig {
    fn default() -> Self {
        DataBusConfig {
            mqtt_connect_timeout_ms: DEFAULT_MQTT_CONNECT_TIMEOUT_MS,
            mqtt_disconnect_timeout_ms: DEFAULT_MQTT_DISCONNECT_TIMEOUT_MS,
            mqtt_keep_alive_secs: DEFAULT_MQTT_KEEP_ALIVE_SECS,
            mqtt_channel_capacity: DEFAULT_MQTT_CHANNEL_CAPACITY,
            opcua_application_name: DEFAULT_OPCUA_APPLICATION_NAME.to_string(),
        }
    }
}

impl DataBusConfigBuilder {
    /// Build and validate the configuration
    pub fn build(&self) -> Result<DataBusConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Check whether JSONL logging enabled
/// Set the `EDGEBUS_LOGGING_JSONL` environment variable a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::EDGEBUS_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::EDGEBUS_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::EDGEBUS_LOG_USE_LOCAL_TZ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_databus_config_with_env_vars() -> Result<()> {
        use environment_names::databus;
        temp_env::with_vars(
            vec![
                (databus::EDGEBUS_DATABUS_MQTT_CONNECT_TIMEOUT_MS, Some("1500")),
                (databus::EDGEBUS_DATABUS_MQTT_DISCONNECT_TIMEOUT_MS, Some("100")),
            ],
            || {
                let config = DataBusConfig::from_settings()?;
                assert_eq!(config.mqtt_connect_timeout_ms, 1500);
                assert_eq!(config.mqtt_disconnect_timeout(), Duration::from_millis(100));
                Ok(())
            },
        )
    }

    #[test]
    fn test_databus_config_defaults() -> Result<()> {
        use environment_names::databus;
        temp_env::with_vars(
            vec![
                (databus::EDGEBUS_DATABUS_MQTT_CONNECT_TIMEOUT_MS, None::<&str>),
                (databus::EDGEBUS_DATABUS_MQTT_DISCONNECT_TIMEOUT_MS, Some("")),
            ],
            || {
                let config = DataBusConfig::from_settings()?;
                assert_eq!(config, DataBusConfig::default());
                Ok(())
            },
        )
    }

    #[test]
    fn test_databus_config_builder_validates() {
        let config = DataBusConfig::builder()
            .mqtt_keep_alive_secs(10)
            .build()
            .unwrap();
        assert_eq!(config.mqtt_keep_alive(), Duration::from_secs(10));
        assert_eq!(config.mqtt_disconnect_timeout_ms, 250);

        let result = DataBusConfig::builder().mqtt_keep_alive_secs(1).build();
        assert!(result.is_err());

        let result = DataBusConfig::builder()
            .opcua_application_name(String::new())
            .build();
        assert!(result.is_err());
    }
}
