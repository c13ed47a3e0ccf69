// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants for centralized management across the codebase
//!
//! ## Organization
//!
//! - **Logging**: Log level, configuration file and output format
//! - **DataBus**: Facade and backend tuning
//! - **Topology**: Secure topology wiring (legacy names kept for deployment compatibility)
//! - **KeyStore**: Key store selection and ETCD connection

/// Logging and tracing environment variables
pub mod logging {
    /// Log level / filter directives (e.g., "debug", "edgebus_runtime::databus=trace")
    pub const EDGEBUS_LOG: &str = "EDGEBUS_LOG";

    /// Path to logging configuration file
    pub const EDGEBUS_LOGGING_CONFIG_PATH: &str = "EDGEBUS_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const EDGEBUS_LOGGING_JSONL: &str = "EDGEBUS_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const EDGEBUS_DISABLE_ANSI_LOGGING: &str = "EDGEBUS_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const EDGEBUS_LOG_USE_LOCAL_TZ: &str = "EDGEBUS_LOG_USE_LOCAL_TZ";
}

/// DataBus facade and backend configuration
pub mod databus {
    /// Prefix for every [`crate::config::DataBusConfig`] field
    pub const EDGEBUS_DATABUS_PREFIX: &str = "EDGEBUS_DATABUS_";

    /// Milliseconds to wait for the MQTT broker to acknowledge the connection
    pub const EDGEBUS_DATABUS_MQTT_CONNECT_TIMEOUT_MS: &str =
        "EDGEBUS_DATABUS_MQTT_CONNECT_TIMEOUT_MS";

    /// Grace period in milliseconds for the MQTT disconnect on context destroy
    pub const EDGEBUS_DATABUS_MQTT_DISCONNECT_TIMEOUT_MS: &str =
        "EDGEBUS_DATABUS_MQTT_DISCONNECT_TIMEOUT_MS";
}

/// Secure topology wiring
///
/// These names predate this crate and are read verbatim.
pub mod topology {
    /// This application's identity, used to form key store paths
    pub const APP_NAME: &str = "AppName";

    /// Comma-separated list of peers allowed to connect to this application
    pub const CLIENTS: &str = "Clients";

    /// Comma-separated list of servers this application connects to
    pub const SERVER: &str = "Server";

    /// Development mode disables transport security entirely
    pub const DEV_MODE: &str = "DEV_MODE";
}

/// Key store environment variables
pub mod key_store {
    /// Key store backend: "etcd" or "mem"
    pub const EDGEBUS_KEY_STORE: &str = "EDGEBUS_KEY_STORE";
}

/// ETCD transport environment variables
pub mod etcd {
    /// ETCD endpoints (comma-separated list of URLs)
    pub const ETCD_ENDPOINTS: &str = "ETCD_ENDPOINTS";

    /// Prefix prepended to every key read from ETCD
    pub const ETCD_PREFIX: &str = "ETCD_PREFIX";

    /// ETCD authentication environment variables
    pub mod auth {
        /// Username for ETCD authentication
        pub const ETCD_AUTH_USERNAME: &str = "ETCD_AUTH_USERNAME";

        /// Password for ETCD authentication
        pub const ETCD_AUTH_PASSWORD: &str = "ETCD_AUTH_PASSWORD";

        /// CA certificate (PEM) for ETCD TLS
        pub const ETCD_AUTH_CA: &str = "ETCD_AUTH_CA";

        /// Client certificate (PEM) for ETCD TLS
        pub const ETCD_AUTH_CLIENT_CERT: &str = "ETCD_AUTH_CLIENT_CERT";

        /// Client key (PEM) for ETCD TLS
        pub const ETCD_AUTH_CLIENT_KEY: &str = "ETCD_AUTH_CLIENT_KEY";
    }
}
