// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OPC-UA backend, publisher side only.
//!
//! `create_context` starts an embedded server and registers a namespace. Every
//! topic path `a/b/c` becomes folders `a/` and `a/b/` under the Objects folder
//! with a writable string variable `a/b/c` at the leaf. Node ids are the
//! cumulative path, so walking a path twice finds the nodes created the first
//! time instead of adding new ones. Folder ids keep the trailing slash, which
//! lets `a/b` be a variable and the folder holding `a/b/c` at the same time.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use opcua::server::prelude::*;
use opcua::sync::RwLock;

use super::backend::{Backend, Trigger};
use super::{ContextConfig, Direction, Payload, TopicConfig, TransportKind};
use crate::config::DataBusConfig;

const DEFAULT_OPCUA_PORT: u16 = 4840;

/// Topic paths mapped onto nodes of one namespace.
#[derive(Clone)]
pub struct TopicTree {
    address_space: Arc<RwLock<AddressSpace>>,
    namespace: u16,
}

impl TopicTree {
    /// Register `namespace_uri` in `address_space`.
    pub fn new(address_space: Arc<RwLock<AddressSpace>>, namespace_uri: &str) -> Result<Self> {
        let namespace = address_space
            .write()
            .register_namespace(namespace_uri)
            .map_err(|_| anyhow::anyhow!("cannot register namespace '{namespace_uri}'"))?;
        Ok(Self {
            address_space,
            namespace,
        })
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    /// Walk `path`, creating missing folders and the leaf variable. Returns the leaf id.
    pub fn ensure(&self, path: &str) -> Result<NodeId> {
        let segments = split_path(path)?;
        let (leaf, folders) = segments
            .split_last()
            .ok_or_else(|| anyhow::anyhow!("empty topic path '{path}'"))?;

        let mut address_space = self.address_space.write();
        let mut parent = NodeId::objects_folder_id();
        let mut walked = String::new();
        for folder in folders {
            append_segment(&mut walked, folder);
            let id = folder_id(self.namespace, &walked);
            if address_space.find_node(&id).is_none() {
                if !address_space.add_folder_with_id(&id, *folder, *folder, &parent) {
                    anyhow::bail!("cannot create folder '{walked}'");
                }
                tracing::debug!(folder = %walked, "created opcua folder");
            }
            parent = id;
        }

        append_segment(&mut walked, leaf);
        let id = NodeId::new(self.namespace, walked.clone());
        if address_space.find_node(&id).is_none() {
            let inserted = VariableBuilder::new(&id, *leaf, *leaf)
                .data_type(DataTypeId::String)
                .value(UAString::from(""))
                .writable()
                .organized_by(parent)
                .insert(&mut address_space);
            if !inserted {
                anyhow::bail!("cannot create variable '{walked}'");
            }
            tracing::debug!(variable = %walked, "created opcua variable");
        }
        Ok(id)
    }

    /// Set the leaf variable of `path`, creating the path if needed.
    pub fn write(&self, path: &str, value: &str) -> Result<()> {
        let id = self.ensure(path)?;
        let now = DateTime::now();
        let updated = self.address_space.write().set_variable_value(
            id,
            Variant::from(UAString::from(value)),
            &now,
            &now,
        );
        if !updated {
            anyhow::bail!("variable for '{path}' is missing");
        }
        Ok(())
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        anyhow::bail!("empty topic path '{path}'");
    }
    Ok(segments)
}

fn folder_id(namespace: u16, walked: &str) -> NodeId {
    NodeId::new(namespace, format!("{walked}/"))
}

fn append_segment(walked: &mut String, segment: &str) {
    if !walked.is_empty() {
        walked.push('/');
    }
    walked.push_str(segment);
}

pub struct OpcUaBackend {
    config: DataBusConfig,
    server: Option<Arc<RwLock<Server>>>,
    server_thread: Option<std::thread::JoinHandle<()>>,
    tree: Option<TopicTree>,
}

impl OpcUaBackend {
    pub fn new(config: DataBusConfig) -> Self {
        Self {
            config,
            server: None,
            server_thread: None,
            tree: None,
        }
    }

    fn tree(&self) -> Result<&TopicTree> {
        self.tree
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPC-UA context is not created"))
    }
}

#[async_trait]
impl Backend for OpcUaBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::OpcUa
    }

    async fn create_context(&mut self, config: &ContextConfig) -> Result<()> {
        if config.direction != Direction::Pub {
            anyhow::bail!("the OPC-UA backend only publishes, got {}", config.direction);
        }
        let host = config.endpoint.host_str().unwrap_or("0.0.0.0").to_string();
        let port = config.endpoint.port().unwrap_or(DEFAULT_OPCUA_PORT);
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| self.config.opcua_application_name.clone());

        let server = ServerBuilder::new_anonymous(self.config.opcua_application_name.as_str())
            .application_uri(format!("urn:{}", self.config.opcua_application_name))
            .host_and_port(host.as_str(), port)
            .discovery_urls(vec![format!("opc.tcp://{host}:{port}/")])
            .pki_dir(std::env::temp_dir().join("edgebus-opcua-pki"))
            .create_sample_keypair(true)
            .server()
            .ok_or_else(|| anyhow::anyhow!("invalid OPC-UA server configuration for {host}:{port}"))?;

        let tree = TopicTree::new(server.address_space(), &format!("urn:{name}"))?;
        let server = Arc::new(RwLock::new(server));
        let runner = server.clone();
        let thread = std::thread::Builder::new()
            .name("opcua-server".to_string())
            .spawn(move || Server::run_server(runner))
            .context("spawning the OPC-UA server thread")?;

        tracing::info!(%host, port, namespace = tree.namespace(), "OPC-UA server started");
        self.server = Some(server);
        self.server_thread = Some(thread);
        self.tree = Some(tree);
        Ok(())
    }

    async fn start_topic(&mut self, topic: &TopicConfig) -> Result<()> {
        self.tree()?.ensure(&topic.name)?;
        Ok(())
    }

    async fn send(&mut self, topic: &TopicConfig, payload: &Payload) -> Result<()> {
        self.tree()?.write(&topic.name, &payload.to_string())
    }

    async fn receive(&mut self, _topic: &TopicConfig, _trigger: Trigger) -> Result<()> {
        anyhow::bail!("the OPC-UA backend does not subscribe")
    }

    async fn stop_topic(&mut self, name: &str) -> Result<()> {
        // nodes outlive the topic, subscribers may still read the last value
        tracing::trace!(topic = name, "opcua topic stopped");
        Ok(())
    }

    async fn destroy_context(&mut self) -> Result<()> {
        self.tree = None;
        if let Some(server) = self.server.take() {
            server.write().abort();
        }
        if let Some(thread) = self.server_thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await?
                .map_err(|_| anyhow::anyhow!("OPC-UA server thread panicked"))?;
            tracing::info!("OPC-UA server stopped");
        }
        Ok(())
    }
}
