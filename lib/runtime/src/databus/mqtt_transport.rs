// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! MQTT backend.
//!
//! One broker connection per context. Publishes go out at QoS 1. Requests are
//! queued without waiting; a full request queue means the broker stopped
//! draining it and the call fails instead of holding the bus. Subscriptions
//! register a delivery channel per topic filter; the event loop task routes
//! every incoming publish to each filter it matches, `+` and `#` included.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{Backend, DeliverySender, Trigger};
use super::{ContextConfig, Message, Payload, TopicConfig, TransportKind};
use crate::config::DataBusConfig;

const DEFAULT_MQTT_PORT: u16 = 1883;

type Handlers = Arc<Mutex<HashMap<String, DeliverySender>>>;

pub struct MqttBackend {
    config: DataBusConfig,
    client: Option<AsyncClient>,
    handlers: Handlers,
    cancel: CancellationToken,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttBackend {
    pub fn new(config: DataBusConfig) -> Self {
        Self {
            config,
            client: None,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            event_loop: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("MQTT context is not connected"))
    }

    fn options(&self, config: &ContextConfig) -> Result<MqttOptions> {
        let url = &config.endpoint;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);
        let client_id = config
            .name
            .clone()
            .unwrap_or_else(|| format!("edgebus-{}", uuid::Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(self.config.mqtt_keep_alive());
        options.set_clean_session(true);
        if !url.username().is_empty() {
            options.set_credentials(url.username(), url.password().unwrap_or_default());
        }
        Ok(options)
    }
}

#[async_trait]
impl Backend for MqttBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    async fn create_context(&mut self, config: &ContextConfig) -> Result<()> {
        let options = self.options(config)?;
        let broker = format!("{}:{}", options.broker_address().0, options.broker_address().1);
        let (client, event_loop) = AsyncClient::new(options, self.config.mqtt_channel_capacity);

        let (connected_tx, connected_rx) = oneshot::channel();
        self.event_loop = Some(tokio::spawn(run_event_loop(
            event_loop,
            self.handlers.clone(),
            self.cancel.clone(),
            connected_tx,
        )));
        self.client = Some(client);

        match tokio::time::timeout(self.config.mqtt_connect_timeout(), connected_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(%broker, "connected to MQTT broker");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e).with_context(|| format!("connecting to MQTT broker {broker}")),
            Ok(Err(_)) => anyhow::bail!("MQTT event loop for {broker} ended before connecting"),
            Err(_) => anyhow::bail!(
                "timed out after {:?} connecting to MQTT broker {broker}",
                self.config.mqtt_connect_timeout()
            ),
        }
    }

    async fn start_topic(&mut self, topic: &TopicConfig) -> Result<()> {
        // topics need no setup on a broker
        tracing::trace!(topic = %topic.name, "mqtt topic started");
        Ok(())
    }

    async fn send(&mut self, topic: &TopicConfig, payload: &Payload) -> Result<()> {
        self.client()?
            .try_publish(
                topic.name.as_str(),
                QoS::AtLeastOnce,
                false,
                Vec::from(payload.to_bytes()),
            )
            .with_context(|| format!("publishing to '{}'", topic.name))
    }

    async fn receive(&mut self, topic: &TopicConfig, trigger: Trigger) -> Result<()> {
        match trigger {
            Trigger::Start(tx) => {
                self.handlers.lock().insert(topic.name.clone(), tx);
                if let Err(e) = self
                    .client()?
                    .try_subscribe(topic.name.as_str(), QoS::AtLeastOnce)
                {
                    self.handlers.lock().remove(&topic.name);
                    return Err(e).with_context(|| format!("subscribing to '{}'", topic.name));
                }
            }
            Trigger::Stop => {
                self.handlers.lock().remove(&topic.name);
                self.client()?
                    .try_unsubscribe(topic.name.as_str())
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
        self.handlers.lock().clear();
        let Some(client) = self.client.take() else {
            self.cancel.cancel();
            return Ok(());
        };

        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "could not queue MQTT disconnect");
        }
        if let Some(mut handle) = self.event_loop.take() {
            // the event loop exits once the DISCONNECT is flushed
            if tokio::time::timeout(self.config.mqtt_disconnect_timeout(), &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    timeout = ?self.config.mqtt_disconnect_timeout(),
                    "MQTT disconnect did not complete in time"
                );
                self.cancel.cancel();
                handle.abort();
            }
        }
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for MqttBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    handlers: Handlers,
    cancel: CancellationToken,
    connected: oneshot::Sender<Result<()>>,
) {
    let mut connected = Some(connected);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let result = if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("broker refused the connection: {:?}", ack.code))
                };
                let refused = result.is_err();
                match connected.take() {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => tracing::info!(code = ?ack.code, "reconnected to MQTT broker"),
                }
                if refused {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch(&handlers, Message::new(publish.topic, publish.payload));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Err(e.into()));
                    break;
                }
                // rumqttc reconnects on the next poll
                tracing::warn!(error = %e, "MQTT connection error, reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                }
            }
        }
    }
    tracing::debug!("MQTT event loop terminated");
}

fn dispatch(handlers: &Handlers, message: Message) {
    let handlers = handlers.lock();
    for (filter, tx) in handlers.iter() {
        if topic_matches(filter, &message.topic) && tx.send(message.clone()).is_err() {
            tracing::trace!(%filter, "subscriber dropped its delivery channel");
        }
    }
}

/// MQTT topic filter matching.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level and
/// everything below. Wildcards never match topics starting with `$`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
