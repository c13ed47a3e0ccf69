// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use derive_getters::Getters;
use serde::Serialize;
use strum::Display;

use super::TopologyError;

/// Directive kind for a TCP socket, `"zmq_tcp, host:port"`
pub const ZMQ_TCP: &str = "zmq_tcp";

/// Directive kind for an IPC socket directory, `"zmq_ipc, /socket/dir"`
pub const ZMQ_IPC: &str = "zmq_ipc";

/// Which side of a secure channel this application plays.
#[derive(Copy, Debug, Clone, Display, Serialize, Eq, PartialEq, Hash)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
    Server,
    Client,
}

impl Role {
    /// Publishers and servers bind and accept peers.
    pub fn binds(&self) -> bool {
        matches!(self, Role::Publisher | Role::Server)
    }
}

impl FromStr for Role {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "publisher" => Ok(Role::Publisher),
            "subscriber" => Ok(Role::Subscriber),
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            _ => Err(TopologyError::UnknownRole(s.to_string())),
        }
    }
}

/// Where the socket lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Ipc { socket_dir: PathBuf },
}

impl Endpoint {
    /// Parse a transport directive such as `zmq_tcp, 127.0.0.1:65013`.
    ///
    /// Surrounding quotes on either part are tolerated, deployments often carry them.
    pub fn from_directive(directive: &str) -> Result<Self, TopologyError> {
        let invalid = |reason: &str| TopologyError::InvalidDirective {
            directive: directive.to_string(),
            reason: reason.to_string(),
        };

        let (kind, address) = directive
            .split_once(',')
            .ok_or_else(|| invalid("expected '<kind>, <address>'"))?;
        let kind = unquote(kind);
        let address = unquote(address);
        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        match kind {
            ZMQ_TCP => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("expected 'host:port'"))?;
                if host.is_empty() {
                    return Err(invalid("empty host"));
                }
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            ZMQ_IPC => Ok(Endpoint::Ipc {
                socket_dir: PathBuf::from(address),
            }),
            other => Err(invalid(&format!("unknown transport kind '{other}'"))),
        }
    }

    /// ZeroMQ address for `topic` on this endpoint.
    ///
    /// IPC topics get one socket file per topic inside the socket directory.
    pub fn zmq_address(&self, topic: &str) -> String {
        match self {
            Endpoint::Tcp { host, port } => format!("tcp://{host}:{port}"),
            Endpoint::Ipc { socket_dir } => {
                format!("ipc://{}", socket_dir.join(topic).display())
            }
        }
    }

    pub fn is_ipc(&self) -> bool {
        matches!(self, Endpoint::Ipc { .. })
    }
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"').trim()
}

/// CURVE key material, Z85 encoded.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CurveSecurity {
    /// Bind side: our secret key plus the public keys of every peer allowed in.
    Bind {
        #[serde(skip_serializing)]
        secret_key: String,
        allowed_peer_keys: Vec<String>,
    },
    /// Connect side: our key pair plus the server's public key.
    Connect {
        #[serde(skip_serializing)]
        secret_key: String,
        public_key: String,
        peer_public_key: String,
    },
}

impl CurveSecurity {
    pub fn secret_key(&self) -> &str {
        match self {
            CurveSecurity::Bind { secret_key, .. } | CurveSecurity::Connect { secret_key, .. } => {
                secret_key
            }
        }
    }
}

// secret keys never reach the logs
impl fmt::Debug for CurveSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveSecurity::Bind {
                allowed_peer_keys, ..
            } => f
                .debug_struct("Bind")
                .field("secret_key", &"<redacted>")
                .field("allowed_peer_keys", allowed_peer_keys)
                .finish(),
            CurveSecurity::Connect {
                public_key,
                peer_public_key,
                ..
            } => f
                .debug_struct("Connect")
                .field("secret_key", &"<redacted>")
                .field("public_key", public_key)
                .field("peer_public_key", peer_public_key)
                .finish(),
        }
    }
}

/// Transport-ready connection parameters for one topic and role.
///
/// Produced once by the resolver and handed to the backend that asked for it.
/// `security` is `None` in development mode and for IPC endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
pub struct ConnectionDescriptor {
    topic: String,
    role: Role,
    endpoint: Endpoint,
    dev_mode: bool,
    security: Option<CurveSecurity>,
}

impl ConnectionDescriptor {
    pub(crate) fn new(
        topic: String,
        role: Role,
        endpoint: Endpoint,
        dev_mode: bool,
        security: Option<CurveSecurity>,
    ) -> Self {
        Self {
            topic,
            role,
            endpoint,
            dev_mode,
            security,
        }
    }

    /// Topic name without any `<peer>/` prefix; this is what goes on the wire.
    pub fn wire_topic(&self) -> &str {
        self.topic
            .split_once('/')
            .map(|(_, t)| t)
            .unwrap_or(&self.topic)
    }

    pub fn zmq_address(&self) -> String {
        self.endpoint.zmq_address(self.wire_topic())
    }
}
