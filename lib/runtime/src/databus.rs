// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! DataBus facade.
//!
//! A [`DataBus`] holds at most one context. `context_create` picks the backend
//! from the endpoint scheme, `publish` and `subscribe` enforce the topic
//! registry (a topic keeps the payload type it was first declared with) and
//! the context direction, and `context_destroy` releases the backend.
//!
//! Every backend call runs behind a guard that turns both errors and panics
//! into a [`DataBusError`]; [`status`] collapses any result into the integer
//! contract, `0` on success.
//!
//! ```ignore
//! let bus = DataBus::new(DataBusConfig::from_settings()?);
//! bus.context_create(&ContextConfig::new("mqtt://localhost:1883/", Direction::Pub)?).await?;
//! bus.publish(&TopicConfig::string("line1/temp"), &"72.5".into()).await?;
//! bus.context_destroy().await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Stream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::DataBusConfig;
use crate::topology::{ConnectionDescriptor, Role};

pub mod backend;
mod error;
pub mod mqtt_transport;
pub mod opcua_transport;
mod types;
pub mod zap;
pub mod zmq_transport;

pub use backend::{Backend, BackendFactory, DefaultBackends, DeliverySender, Trigger};
pub use error::{DataBusError, STATUS_OK, status};
pub use types::{
    ContextConfig, Direction, Message, Payload, PayloadKind, TopicBinding, TopicConfig,
    TransportKind,
};

/// Transport-agnostic publish/subscribe entry point.
pub struct DataBus {
    factory: Arc<dyn BackendFactory>,
    state: Mutex<BusState>,
}

enum BusState {
    Uninitialized,
    Active(BusContext),
    Destroyed,
}

/// One live context: its backend plus the bookkeeping the facade enforces.
struct BusContext {
    transport: TransportKind,
    direction: Direction,
    /// topic name -> declared type; an entry never changes once written
    topics: HashMap<String, String>,
    backend: Box<dyn Backend>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl BusState {
    fn active_mut(&mut self) -> Result<&mut BusContext, DataBusError> {
        match self {
            BusState::Active(ctx) => Ok(ctx),
            BusState::Uninitialized => Err(DataBusError::NotInitialized),
            BusState::Destroyed => Err(DataBusError::Destroyed),
        }
    }

    fn active(&self) -> Result<&BusContext, DataBusError> {
        match self {
            BusState::Active(ctx) => Ok(ctx),
            BusState::Uninitialized => Err(DataBusError::NotInitialized),
            BusState::Destroyed => Err(DataBusError::Destroyed),
        }
    }
}

impl BusContext {
    fn require_direction(&self, op: &'static str, expected: Direction) -> Result<(), DataBusError> {
        if self.direction != expected {
            return Err(DataBusError::WrongDirection {
                op,
                expected,
                actual: self.direction,
            });
        }
        Ok(())
    }

    /// Registry and payload-type checks shared by publish and subscribe.
    fn check_topic(&self, topic: &TopicConfig) -> Result<PayloadKind, DataBusError> {
        if let Some(declared) = self.topics.get(&topic.name)
            && declared != &topic.kind
        {
            return Err(DataBusError::TopicTypeMismatch {
                name: topic.name.clone(),
                declared: declared.clone(),
                requested: topic.kind.clone(),
            });
        }
        match topic.payload_kind() {
            Some(kind) if kind.is_supported() => Ok(kind),
            _ => Err(DataBusError::UnsupportedType(topic.kind.clone())),
        }
    }

    /// Run the backend's per-topic setup the first time a topic is used.
    async fn ensure_topic(&mut self, topic: &TopicConfig) -> Result<(), DataBusError> {
        if self.topics.contains_key(&topic.name) {
            return Ok(());
        }
        guarded("start topic", self.backend.start_topic(topic)).await?;
        self.topics.insert(topic.name.clone(), topic.kind.clone());
        Ok(())
    }
}

impl DataBus {
    /// A bus using the built-in backends.
    pub fn new(config: DataBusConfig) -> Self {
        Self::with_backend_factory(Arc::new(DefaultBackends::new(config)))
    }

    pub fn with_backend_factory(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(BusState::Uninitialized),
        }
    }

    /// Create the context and open its connection.
    ///
    /// Fails if a context already exists. When the backend cannot connect it
    /// is torn down again and the bus stays without a context.
    pub async fn context_create(&self, config: &ContextConfig) -> Result<(), DataBusError> {
        let mut state = self.state.lock().await;
        ensure_vacant(&state)?;

        let transport = TransportKind::from_endpoint(&config.endpoint)?;
        let backend = self
            .factory
            .create(transport)
            .map_err(|source| DataBusError::Backend {
                op: "construct backend",
                source,
            })?;
        *state = BusState::Active(open(transport, backend, config).await?);
        Ok(())
    }

    /// Same as [`DataBus::context_create`] with the flat key/value configuration.
    pub async fn context_create_from_map(
        &self,
        config: &HashMap<String, String>,
    ) -> Result<(), DataBusError> {
        let config = ContextConfig::from_map(config)?;
        self.context_create(&config).await
    }

    /// Create a secure-socket context from a resolved topology descriptor.
    ///
    /// Only publisher and subscriber roles have a socket pattern.
    pub async fn context_create_secure(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<(), DataBusError> {
        let mut state = self.state.lock().await;
        ensure_vacant(&state)?;

        let role = *descriptor.role();
        if !matches!(role, Role::Publisher | Role::Subscriber) {
            return Err(DataBusError::Unsupported(format!(
                "the {role} role on secure-socket contexts"
            )));
        }
        let mut config = ContextConfig::new(&descriptor.zmq_address(), Direction::from(role))?;
        config.name = Some(descriptor.wire_topic().to_string());

        let backend = self
            .factory
            .create_secure(descriptor)
            .map_err(|source| DataBusError::Backend {
                op: "construct backend",
                source,
            })?;
        *state = BusState::Active(open(TransportKind::SecureSocket, backend, &config).await?);
        Ok(())
    }

    /// Publish `payload` on `topic`.
    ///
    /// The first publish of a topic runs the backend's topic setup and records
    /// the declared type. A failed publish never changes the registry.
    pub async fn publish(&self, topic: &TopicConfig, payload: &Payload) -> Result<(), DataBusError> {
        let mut state = self.state.lock().await;
        let ctx = state.active_mut()?;
        ctx.require_direction("publish", Direction::Pub)?;

        let kind = ctx.check_topic(topic)?;
        if payload.kind() != kind {
            return Err(DataBusError::PayloadMismatch {
                topic: topic.name.clone(),
                expected: kind.to_string(),
                actual: payload.kind().to_string(),
            });
        }

        ctx.ensure_topic(topic).await?;
        guarded("send", ctx.backend.send(topic, payload)).await
    }

    /// Invoke `callback` for every message on `topic` until unsubscribed or destroyed.
    ///
    /// The callback runs on a dedicated delivery task; a panicking callback is
    /// logged and delivery continues.
    pub async fn subscribe<F>(&self, topic: &TopicConfig, callback: F) -> Result<(), DataBusError>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        let ctx = state.active_mut()?;
        ctx.require_direction("subscribe", Direction::Sub)?;
        ctx.check_topic(topic)?;
        if ctx.subscriptions.contains_key(&topic.name) {
            return Err(DataBusError::AlreadySubscribed(topic.name.clone()));
        }

        ctx.ensure_topic(topic).await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        guarded("receive", ctx.backend.receive(topic, Trigger::Start(tx))).await?;

        let name = topic.name.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
                    tracing::error!(
                        topic = %name,
                        panic = %panic_message(panic.as_ref()),
                        "subscriber callback panicked"
                    );
                }
            }
            tracing::debug!(topic = %name, "delivery task finished");
        });
        ctx.subscriptions.insert(topic.name.clone(), handle);
        Ok(())
    }

    /// Subscribe and consume messages as a stream instead of a callback.
    pub async fn subscribe_stream(
        &self,
        topic: &TopicConfig,
    ) -> Result<impl Stream<Item = Message> + Send + 'static, DataBusError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribe(topic, move |message| {
            let _ = tx.send(message);
        })
        .await?;
        Ok(async_stream::stream! {
            while let Some(message) = rx.recv().await {
                yield message;
            }
        })
    }

    /// Stop delivery for a subscribed topic. The topic keeps its declared type.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), DataBusError> {
        let mut state = self.state.lock().await;
        let ctx = state.active_mut()?;
        let Some(handle) = ctx.subscriptions.remove(name) else {
            return Err(DataBusError::NotSubscribed(name.to_string()));
        };
        let topic = TopicConfig::new(name, ctx.topics.get(name).cloned().unwrap_or_default());

        let result = async {
            guarded("receive", ctx.backend.receive(&topic, Trigger::Stop)).await?;
            guarded("stop topic", ctx.backend.stop_topic(name)).await
        }
        .await;
        handle.abort();
        result
    }

    /// Tear down the backend connection and clear the context.
    ///
    /// Any later call, including a second destroy, fails with [`DataBusError::Destroyed`].
    pub async fn context_destroy(&self) -> Result<(), DataBusError> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, BusState::Destroyed) {
            BusState::Destroyed => Err(DataBusError::Destroyed),
            BusState::Uninitialized => {
                tracing::debug!("destroying a bus that never got a context");
                Ok(())
            }
            BusState::Active(mut ctx) => {
                let result = guarded("destroy context", ctx.backend.destroy_context()).await;
                for (name, handle) in ctx.subscriptions.drain() {
                    tracing::trace!(topic = %name, "stopping delivery task");
                    handle.abort();
                }
                tracing::info!(transport = %ctx.transport, "context destroyed");
                result
            }
        }
    }

    /// Declared type of `name`, if the topic has been used on the current context.
    pub async fn topic_type(&self, name: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.active().ok()?.topics.get(name).cloned()
    }

    pub async fn transport(&self) -> Result<TransportKind, DataBusError> {
        Ok(self.state.lock().await.active()?.transport)
    }

    pub async fn direction(&self) -> Result<Direction, DataBusError> {
        Ok(self.state.lock().await.active()?.direction)
    }
}

fn ensure_vacant(state: &BusState) -> Result<(), DataBusError> {
    match state {
        BusState::Uninitialized => Ok(()),
        BusState::Active(_) => Err(DataBusError::AlreadyCreated),
        BusState::Destroyed => Err(DataBusError::Destroyed),
    }
}

async fn open(
    transport: TransportKind,
    mut backend: Box<dyn Backend>,
    config: &ContextConfig,
) -> Result<BusContext, DataBusError> {
    if let Err(e) = guarded("create context", backend.create_context(config)).await {
        // release whatever the backend managed to open
        if let Err(cleanup) = guarded("destroy context", backend.destroy_context()).await {
            tracing::warn!(error = %cleanup, "cleanup after failed context creation also failed");
        }
        return Err(e);
    }

    tracing::info!(
        %transport,
        direction = %config.direction,
        endpoint = %config.endpoint,
        "context created"
    );
    Ok(BusContext {
        transport,
        direction: config.direction,
        topics: HashMap::new(),
        backend,
        subscriptions: HashMap::new(),
    })
}

/// Await a backend call, converting its error or panic into a [`DataBusError`].
async fn guarded<T>(
    op: &'static str,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, DataBusError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => {
            tracing::error!(op, error = %format!("{source:#}"), "backend call failed");
            Err(DataBusError::Backend { op, source })
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(op, panic = %message, "backend call panicked");
            Err(DataBusError::BackendPanic { op, message })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
