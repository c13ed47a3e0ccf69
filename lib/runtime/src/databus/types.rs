// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use super::DataBusError;
use crate::topology::Role;

/// Context configuration key holding the endpoint URI
pub const KEY_ENDPOINT: &str = "endpoint";
/// Context configuration key holding the direction
pub const KEY_DIRECTION: &str = "direction";
/// Context configuration key holding the logical name
pub const KEY_NAME: &str = "name";
/// Topic configuration key holding the topic name
pub const KEY_TOPIC_NAME: &str = "name";
/// Topic configuration key holding the declared payload type
pub const KEY_TOPIC_TYPE: &str = "type";

/// Backend family, chosen once per context.
#[derive(Copy, Debug, Clone, Display, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum TransportKind {
    #[strum(serialize = "mqtt")]
    Mqtt,
    #[strum(serialize = "opcua")]
    OpcUa,
    #[strum(serialize = "secure-socket")]
    SecureSocket,
}

impl TransportKind {
    /// Pick the backend from the endpoint scheme.
    ///
    /// Secure-socket contexts come from a resolved connection descriptor, never from a scheme.
    pub fn from_endpoint(endpoint: &Url) -> Result<Self, DataBusError> {
        match endpoint.scheme() {
            "mqtt" => Ok(TransportKind::Mqtt),
            "opcua" => Ok(TransportKind::OpcUa),
            "nats" => Err(DataBusError::Unsupported("the nats: transport".to_string())),
            other => Err(DataBusError::UnknownScheme(other.to_string())),
        }
    }
}

#[derive(Copy, Debug, Clone, Display, EnumString, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Pub,
    Sub,
    Server,
    Client,
}

impl From<Role> for Direction {
    fn from(role: Role) -> Self {
        match role {
            Role::Publisher => Direction::Pub,
            Role::Subscriber => Direction::Sub,
            Role::Server => Direction::Server,
            Role::Client => Direction::Client,
        }
    }
}

/// What `ContextCreate` is called with.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    pub endpoint: Url,
    pub direction: Direction,
    /// Logical name: MQTT client id, OPC-UA namespace
    pub name: Option<String>,
    /// Remaining backend-specific keys
    pub extra: HashMap<String, String>,
}

impl ContextConfig {
    pub fn new(endpoint: &str, direction: Direction) -> Result<Self, DataBusError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            direction,
            name: None,
            extra: HashMap::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build from the flat map callers hand to `ContextCreate`.
    ///
    /// `endpoint` and `direction` are required, only `PUB` and `SUB` are accepted.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, DataBusError> {
        let endpoint = map
            .get(KEY_ENDPOINT)
            .ok_or_else(|| DataBusError::InvalidConfig(format!("missing '{KEY_ENDPOINT}'")))?;
        let direction = map
            .get(KEY_DIRECTION)
            .ok_or_else(|| DataBusError::InvalidConfig(format!("missing '{KEY_DIRECTION}'")))?;
        let direction = Direction::from_str(direction.trim()).map_err(|_| {
            DataBusError::InvalidConfig(format!("unknown direction '{direction}'"))
        })?;
        if !matches!(direction, Direction::Pub | Direction::Sub) {
            return Err(DataBusError::InvalidConfig(format!(
                "direction must be PUB or SUB, got {direction}"
            )));
        }

        let extra = map
            .iter()
            .filter(|(k, _)| ![KEY_ENDPOINT, KEY_DIRECTION, KEY_NAME].contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            direction,
            name: map.get(KEY_NAME).filter(|n| !n.is_empty()).cloned(),
            extra,
        })
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, DataBusError> {
    Url::parse(endpoint.trim())
        .map_err(|e| DataBusError::InvalidConfig(format!("invalid endpoint '{endpoint}': {e}")))
}

/// Payload kinds a topic may be declared with.
#[derive(Copy, Debug, Clone, Display, EnumString, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    String,
    Int,
    Float,
    Bool,
}

impl PayloadKind {
    /// Only string payloads travel over the bus today.
    pub fn is_supported(&self) -> bool {
        matches!(self, PayloadKind::String)
    }
}

/// A topic as the caller declares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Declared payload type, compared verbatim against earlier declarations
    #[serde(rename = "type")]
    pub kind: String,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PayloadKind::String.to_string())
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, DataBusError> {
        let name = map
            .get(KEY_TOPIC_NAME)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DataBusError::InvalidConfig("topic is missing 'name'".to_string()))?;
        let kind = map
            .get(KEY_TOPIC_TYPE)
            .ok_or_else(|| DataBusError::InvalidConfig(format!("topic '{name}' is missing 'type'")))?;
        Ok(Self::new(name.clone(), kind.clone()))
    }

    pub fn payload_kind(&self) -> Option<PayloadKind> {
        PayloadKind::from_str(&self.kind).ok()
    }
}

/// Value handed to `Publish`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::String(_) => PayloadKind::String,
            Payload::Int(_) => PayloadKind::Int,
            Payload::Float(_) => PayloadKind::Float,
            Payload::Bool(_) => PayloadKind::Bool,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Payload::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            other => Bytes::from(other.to_string()),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::String(s) => write!(f, "{s}"),
            Payload::Int(i) => write!(f, "{i}"),
            Payload::Float(v) => write!(f, "{v}"),
            Payload::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Payload::Int(i)
    }
}

/// One received message, as pushed onto a delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Routing of one measurement onto a bus topic, as consumed by ingestion services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    #[serde(rename = "Measurement")]
    pub measurement: String,
    #[serde(rename = "Topic")]
    pub topic: String,
    #[serde(rename = "MsgBusType", default = "TopicBinding::default_bus_type")]
    pub msg_bus_type: String,
}

impl TopicBinding {
    fn default_bus_type() -> String {
        "mqtt".to_string()
    }

    /// Parse a JSON array of bindings.
    pub fn parse_list(json: &str) -> Result<Vec<TopicBinding>, DataBusError> {
        serde_json::from_str(json)
            .map_err(|e| DataBusError::InvalidConfig(format!("invalid topic bindings: {e}")))
    }

    pub fn topic_config(&self) -> TopicConfig {
        TopicConfig::string(self.topic.clone())
    }
}
