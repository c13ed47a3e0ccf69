// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::Direction;

/// Status returned for a successful call
pub const STATUS_OK: i32 = 0;

#[derive(thiserror::Error, Debug)]
pub enum DataBusError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown endpoint scheme '{0}:'")]
    UnknownScheme(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("No context has been created")]
    NotInitialized,

    #[error("A context already exists on this bus")]
    AlreadyCreated,

    #[error("The context has been destroyed")]
    Destroyed,

    #[error("{op} needs a {expected} context, this context is {actual}")]
    WrongDirection {
        op: &'static str,
        expected: Direction,
        actual: Direction,
    },

    #[error("Topic '{name}' is declared as '{declared}', cannot use it as '{requested}'")]
    TopicTypeMismatch {
        name: String,
        declared: String,
        requested: String,
    },

    #[error("Payload type '{0}' is not supported")]
    UnsupportedType(String),

    #[error("Topic '{topic}' carries '{expected}' payloads, got '{actual}'")]
    PayloadMismatch {
        topic: String,
        expected: String,
        actual: String,
    },

    #[error("Topic '{0}' is already subscribed")]
    AlreadySubscribed(String),

    #[error("Topic '{0}' is not subscribed")]
    NotSubscribed(String),

    #[error("Backend failed to {op}: {source:#}")]
    Backend {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Backend panicked during {op}: {message}")]
    BackendPanic { op: &'static str, message: String },
}

impl DataBusError {
    /// Stable non-zero code for the integer status contract.
    pub fn status_code(&self) -> i32 {
        match self {
            DataBusError::InvalidConfig(_) => 1,
            DataBusError::UnknownScheme(_) => 2,
            DataBusError::Unsupported(_) => 3,
            DataBusError::NotInitialized => 4,
            DataBusError::AlreadyCreated => 5,
            DataBusError::Destroyed => 6,
            DataBusError::WrongDirection { .. } => 7,
            DataBusError::TopicTypeMismatch { .. } => 8,
            DataBusError::UnsupportedType(_) => 9,
            DataBusError::PayloadMismatch { .. } => 10,
            DataBusError::AlreadySubscribed(_) => 11,
            DataBusError::NotSubscribed(_) => 12,
            DataBusError::Backend { .. } => 13,
            DataBusError::BackendPanic { .. } => 14,
        }
    }
}

/// Collapse a facade result into its status code.
pub fn status<T>(result: &Result<T, DataBusError>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_non_zero() {
        let errors = [
            DataBusError::InvalidConfig("x".into()),
            DataBusError::UnknownScheme("ftp".into()),
            DataBusError::Destroyed,
            DataBusError::Backend {
                op: "send",
                source: anyhow::anyhow!("broker unreachable"),
            },
            DataBusError::BackendPanic {
                op: "send",
                message: "boom".into(),
            },
        ];
        for e in &errors {
            assert_ne!(e.status_code(), STATUS_OK, "{e}");
        }
        assert_eq!(status(&Ok::<(), DataBusError>(())), STATUS_OK);
        assert_eq!(status::<()>(&Err(DataBusError::Destroyed)), 6);
    }

    #[test]
    fn test_backend_error_keeps_context() {
        let err = DataBusError::Backend {
            op: "create context",
            source: anyhow::anyhow!("connection refused").context("connecting to mqtt://localhost:1883"),
        };
        let text = err.to_string();
        assert!(text.contains("create context"));
        assert!(text.contains("connection refused"));
    }
}
