// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Secure-socket backend on ZMQ PUB/SUB:
//! - Publishers bind the descriptor's address and broadcast
//! - Subscribers connect to it and filter by topic at the socket
//! - Outside development mode both sides speak CURVE; the publisher only
//!   admits clients whose public key is on its allow-list
//!
//! ## Message Format
//!
//! ZMQ multipart message:
//! - Frame 0: Topic (string) - for ZMQ subscription filtering
//! - Frame 1: Payload bytes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{Backend, DeliverySender, Trigger};
use super::zap::{AllowList, ZapHandler};
use super::{ContextConfig, Direction, Message, Payload, TopicConfig, TransportKind};
use crate::topology::{ConnectionDescriptor, CurveSecurity, Endpoint};

/// Send buffer: 100K messages
const ZMQ_SNDHWM: i32 = 100_000;
/// Receive buffer: 100K messages
const ZMQ_RCVHWM: i32 = 100_000;

/// How long the socket pump blocks in `recv` before releasing the socket
const RECV_TIMEOUT_MS: i32 = 100;

/// ZAP domain reported to the handler
const ZAP_DOMAIN: &str = "edgebus";

type Handlers = Arc<Mutex<HashMap<String, DeliverySender>>>;

pub struct ZmqBackend {
    descriptor: ConnectionDescriptor,
    context: zmq::Context,
    socket: Option<Arc<Mutex<zmq::Socket>>>,
    zap: Option<ZapHandler>,
    handlers: Handlers,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl ZmqBackend {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            context: zmq::Context::new(),
            socket: None,
            zap: None,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            pump: None,
        }
    }

    fn socket(&self) -> Result<Arc<Mutex<zmq::Socket>>> {
        self.socket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("secure-socket context is not created"))
    }

    fn bind_publisher(&mut self, address: &str) -> Result<zmq::Socket> {
        if let Endpoint::Ipc { socket_dir } = self.descriptor.endpoint() {
            std::fs::create_dir_all(socket_dir)
                .with_context(|| format!("creating socket directory {}", socket_dir.display()))?;
        }

        let socket = self.context.socket(zmq::PUB)?;
        socket.set_linger(0)?;
        socket.set_sndhwm(ZMQ_SNDHWM)?;
        socket.set_sndtimeo(0)?;

        match self.descriptor.security() {
            Some(CurveSecurity::Bind {
                secret_key,
                allowed_peer_keys,
            }) => {
                // the handler must be listening before the first handshake
                self.zap = Some(ZapHandler::start(
                    &self.context,
                    AllowList::from_z85(allowed_peer_keys),
                )?);
                socket.set_zap_domain(ZAP_DOMAIN)?;
                socket.set_curve_server(true)?;
                socket.set_curve_secretkey(&decode_key(secret_key, "own secret key")?)?;
            }
            Some(CurveSecurity::Connect { .. }) => {
                anyhow::bail!("publisher got connect-side key material")
            }
            None => {}
        }

        socket.bind(address)?;
        Ok(socket)
    }

    fn connect_subscriber(&self, address: &str) -> Result<zmq::Socket> {
        let socket = self.context.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket.set_rcvhwm(ZMQ_RCVHWM)?;
        socket.set_rcvtimeo(RECV_TIMEOUT_MS)?;

        match self.descriptor.security() {
            Some(CurveSecurity::Connect {
                secret_key,
                public_key,
                peer_public_key,
            }) => {
                socket.set_curve_serverkey(&decode_key(peer_public_key, "peer public key")?)?;
                socket.set_curve_publickey(&decode_key(public_key, "own public key")?)?;
                socket.set_curve_secretkey(&decode_key(secret_key, "own secret key")?)?;
            }
            Some(CurveSecurity::Bind { .. }) => {
                anyhow::bail!("subscriber got bind-side key material")
            }
            None => {}
        }

        socket.connect(address)?;
        Ok(socket)
    }

    /// Background task reading `[topic, payload]` messages and routing them by exact topic.
    ///
    /// The socket lock is held only for one `recv`, which times out, so
    /// subscription changes get a turn.
    fn start_socket_pump(
        socket: Arc<Mutex<zmq::Socket>>,
        handlers: Handlers,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !cancel.is_cancelled() {
                let socket_clone = Arc::clone(&socket);
                let result = tokio::task::spawn_blocking(move || -> Result<Option<Vec<Vec<u8>>>> {
                    let socket = socket_clone.lock();
                    match socket.recv_multipart(0) {
                        Ok(frames) => Ok(Some(frames)),
                        Err(zmq::Error::EAGAIN) => Ok(None),
                        Err(e) => Err(e.into()),
                    }
                })
                .await;

                match result {
                    Ok(Ok(Some(frames))) => route(&handlers, frames),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "ZMQ receive error in socket pump");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "ZMQ socket pump task failed");
                        break;
                    }
                }
            }
            tracing::debug!("ZMQ socket pump terminated");
        })
    }
}

fn route(handlers: &Handlers, frames: Vec<Vec<u8>>) {
    let [topic, payload]: [Vec<u8>; 2] = match frames.try_into() {
        Ok(frames) => frames,
        Err(frames) => {
            tracing::warn!(frames = frames.len(), "dropping ZMQ message, expected [topic, payload]");
            return;
        }
    };
    let topic = String::from_utf8_lossy(&topic).into_owned();
    // ZMQ filters by prefix, delivery is by exact topic
    if let Some(tx) = handlers.lock().get(&topic)
        && tx.send(Message::new(topic.clone(), Bytes::from(payload))).is_err()
    {
        tracing::trace!(%topic, "subscriber dropped its delivery channel");
    }
}

fn decode_key(z85: &str, what: &str) -> Result<Vec<u8>> {
    let key = zmq::z85_decode(z85).map_err(|e| anyhow::anyhow!("{what} is not valid Z85: {e:?}"))?;
    if key.len() != 32 {
        anyhow::bail!("{what} decodes to {} bytes, expected 32", key.len());
    }
    Ok(key)
}

async fn blocking<T, F>(socket: Arc<Mutex<zmq::Socket>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&zmq::Socket) -> zmq::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || f(&socket.lock()))
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {}", e))?;
    Ok(result?)
}

#[async_trait]
impl Backend for ZmqBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::SecureSocket
    }

    async fn create_context(&mut self, config: &ContextConfig) -> Result<()> {
        let address = self.descriptor.zmq_address();
        let socket = match config.direction {
            Direction::Pub => self.bind_publisher(&address)?,
            Direction::Sub => self.connect_subscriber(&address)?,
            other => anyhow::bail!("no socket pattern for {other} contexts"),
        };
        let socket = Arc::new(Mutex::new(socket));

        if config.direction == Direction::Sub {
            self.pump = Some(Self::start_socket_pump(
                socket.clone(),
                self.handlers.clone(),
                self.cancel.clone(),
            ));
        }
        self.socket = Some(socket);

        tracing::info!(
            %address,
            direction = %config.direction,
            secured = self.descriptor.security().is_some(),
            "ZMQ secure-socket context created"
        );
        Ok(())
    }

    async fn start_topic(&mut self, topic: &TopicConfig) -> Result<()> {
        // a PUB socket carries any topic, nothing to declare
        tracing::trace!(topic = %topic.name, "zmq topic started");
        Ok(())
    }

    async fn send(&mut self, topic: &TopicConfig, payload: &Payload) -> Result<()> {
        let frames = vec![topic.name.as_bytes().to_vec(), payload.to_bytes().to_vec()];
        blocking(self.socket()?, move |socket| socket.send_multipart(frames, 0))
            .await
            .with_context(|| format!("publishing to '{}'", topic.name))
    }

    async fn receive(&mut self, topic: &TopicConfig, trigger: Trigger) -> Result<()> {
        let socket = self.socket()?;
        let name = topic.name.clone();
        match trigger {
            Trigger::Start(tx) => {
                self.handlers.lock().insert(name.clone(), tx);
                if let Err(e) = blocking(socket, move |s| s.set_subscribe(name.as_bytes())).await {
                    self.handlers.lock().remove(&topic.name);
                    return Err(e).with_context(|| format!("subscribing to '{}'", topic.name));
                }
            }
            Trigger::Stop => {
                self.handlers.lock().remove(&name);
                blocking(socket, move |s| s.set_unsubscribe(name.as_bytes()))
                    .await
                    .with_context(|| format!("unsubscribing from '{}'", topic.name))?;
            }
        }
        Ok(())
    }

    async fn stop_topic(&mut self, name: &str) -> Result<()> {
        self.handlers.lock().remove(name);
        Ok(())
    }

    async fn destroy_context(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.handlers.lock().clear();
        if let Some(pump) = self.pump.take()
            && tokio::time::timeout(Duration::from_secs(1), pump).await.is_err()
        {
            tracing::warn!("ZMQ socket pump did not stop in time");
        }
        self.socket = None;
        if let Some(mut zap) = self.zap.take() {
            tokio::task::spawn_blocking(move || zap.stop()).await?;
        }
        tracing::debug!(address = %self.descriptor.zmq_address(), "ZMQ secure-socket context destroyed");
        Ok(())
    }
}

impl Drop for ZmqBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_store::MemoryStore;
    use crate::topology::{Role, TopologyConfig, TopologyResolver};
    use tokio::sync::mpsc;

    #[test]
    fn test_route_by_exact_topic() {
        let handlers: Handlers = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        handlers.lock().insert("results".to_string(), tx);

        route(&handlers, vec![b"results2".to_vec(), b"ignored".to_vec()]);
        route(&handlers, vec![b"results".to_vec()]);
        route(&handlers, vec![b"results".to_vec(), b"42".to_vec()]);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "results");
        assert_eq!(message.as_str(), Some("42"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_decode_key() {
        let pair = zmq::CurveKeyPair::new().unwrap();
        let z85 = zmq::z85_encode(&pair.secret_key).unwrap();
        assert_eq!(decode_key(&z85, "k").unwrap(), pair.secret_key.to_vec());
        assert!(decode_key("too short", "k").is_err());
    }

    async fn descriptor(
        store: MemoryStore,
        app: &str,
        topic: &str,
        role: Role,
        dev_mode: bool,
    ) -> ConnectionDescriptor {
        let config = TopologyConfig::builder()
            .app_name(app)
            .clients(vec!["sub".to_string()])
            .topic("results", "zmq_ipc, /tmp/placeholder")
            .build()
            .unwrap();
        TopologyResolver::new(config, Arc::new(store))
            .resolve(topic, role, dev_mode)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_calls_before_create_fail() {
        let desc = descriptor(MemoryStore::new(), "pub", "results", Role::Publisher, true).await;
        let mut backend = ZmqBackend::new(desc);
        assert!(backend.send(&TopicConfig::string("results"), &"x".into()).await.is_err());
        assert!(backend.destroy_context().await.is_ok());
    }

    #[tokio::test]
    async fn test_server_direction_is_rejected() {
        let desc = descriptor(MemoryStore::new(), "pub", "results", Role::Publisher, true).await;
        let mut backend = ZmqBackend::new(desc);
        let config = ContextConfig::new("tcp://127.0.0.1:65013", Direction::Server).unwrap();
        assert!(backend.create_context(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_side_keys_on_subscriber_are_rejected() {
        let pair = zmq::CurveKeyPair::new().unwrap();
        let store = MemoryStore::with_entries([(
            "/pub/private_key",
            zmq::z85_encode(&pair.secret_key).unwrap(),
        )]);
        let config = TopologyConfig::builder()
            .app_name("pub")
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let desc = TopologyResolver::new(config, Arc::new(store))
            .resolve("results", Role::Publisher, false)
            .await
            .unwrap();
        let mut backend = ZmqBackend::new(desc);
        let config = ContextConfig::new("tcp://127.0.0.1:65013", Direction::Sub).unwrap();
        let err = backend.create_context(&config).await.unwrap_err();
        assert!(err.to_string().contains("bind-side"));
    }
}
