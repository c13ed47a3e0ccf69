// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport backend abstraction.
//!
//! One implementation per [`TransportKind`]. The facade owns exactly one
//! backend per context and serializes every call into it.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::mqtt_transport::MqttBackend;
use super::opcua_transport::OpcUaBackend;
use super::zmq_transport::ZmqBackend;
use super::{ContextConfig, Message, Payload, TopicConfig, TransportKind};
use crate::config::DataBusConfig;
use crate::topology::ConnectionDescriptor;

/// Sender half of a subscription's delivery channel
pub type DeliverySender = mpsc::UnboundedSender<Message>;

/// Starts or stops delivery for a topic.
#[derive(Debug)]
pub enum Trigger {
    /// Push every message for the topic onto the channel
    Start(DeliverySender),
    Stop,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the underlying connection.
    async fn create_context(&mut self, config: &ContextConfig) -> Result<()>;

    /// Per-topic setup. Called once, before the first send or receive of a topic.
    async fn start_topic(&mut self, topic: &TopicConfig) -> Result<()>;

    async fn send(&mut self, topic: &TopicConfig, payload: &Payload) -> Result<()>;

    async fn receive(&mut self, topic: &TopicConfig, trigger: Trigger) -> Result<()>;

    async fn stop_topic(&mut self, name: &str) -> Result<()>;

    /// Tear down the connection. Must tolerate a context that was never fully created.
    async fn destroy_context(&mut self) -> Result<()>;
}

/// Constructs backends for the facade.
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: TransportKind) -> Result<Box<dyn Backend>>;

    fn create_secure(&self, descriptor: ConnectionDescriptor) -> Result<Box<dyn Backend>> {
        Ok(Box::new(ZmqBackend::new(descriptor)))
    }
}

/// The backends that ship with the crate.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackends {
    config: DataBusConfig,
}

impl DefaultBackends {
    pub fn new(config: DataBusConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for DefaultBackends {
    fn create(&self, kind: TransportKind) -> Result<Box<dyn Backend>> {
        match kind {
            TransportKind::Mqtt => Ok(Box::new(MqttBackend::new(self.config.clone()))),
            TransportKind::OpcUa => Ok(Box::new(OpcUaBackend::new(self.config.clone()))),
            TransportKind::SecureSocket => {
                anyhow::bail!("secure-socket contexts need a resolved connection descriptor")
            }
        }
    }
}
