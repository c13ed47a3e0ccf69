// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! edgebus runtime
//!
//! A transport-agnostic publish/subscribe bus for edge analytics services:
//!
//! - [`databus`]: the [`DataBus`] facade and its MQTT, OPC-UA and secure-socket backends
//! - [`topology`]: derivation of secure-socket connection descriptors and CURVE keys
//! - [`storage::key_store`]: access to the distributed key namespace (etcd or in-memory)

pub mod config;
pub use config::DataBusConfig;

pub mod databus;
pub mod logging;
pub mod storage;
pub mod topology;
pub mod transports;

pub use databus::{
    ContextConfig, DataBus, DataBusError, Direction, Message, Payload, STATUS_OK, TopicConfig,
    TransportKind, status,
};
pub use storage::key_store::{KeyStore, MemoryStore};
pub use tokio_util::sync::CancellationToken;
pub use topology::{ConnectionDescriptor, Role, TopologyConfig, TopologyResolver};
