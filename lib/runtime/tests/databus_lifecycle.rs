// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use edgebus_runtime::databus::{Backend, BackendFactory, PayloadKind, Trigger};
use edgebus_runtime::{
    ContextConfig, DataBus, DataBusError, Payload, STATUS_OK, TopicConfig, TransportKind, status,
};

/// Keeps the last value written per topic, like a tiny OPC-UA server would.
#[derive(Default)]
struct LastValue {
    values: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl Backend for LastValue {
    fn kind(&self) -> TransportKind {
        TransportKind::OpcUa
    }

    async fn create_context(&mut self, _config: &ContextConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_topic(&mut self, topic: &TopicConfig) -> anyhow::Result<()> {
        self.values.lock().entry(topic.name.clone()).or_default();
        Ok(())
    }

    async fn send(&mut self, topic: &TopicConfig, payload: &Payload) -> anyhow::Result<()> {
        self.values
            .lock()
            .insert(topic.name.clone(), payload.to_string());
        Ok(())
    }

    async fn receive(&mut self, _topic: &TopicConfig, _trigger: Trigger) -> anyhow::Result<()> {
        anyhow::bail!("publish only")
    }

    async fn stop_topic(&mut self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn destroy_context(&mut self) -> anyhow::Result<()> {
        self.values.lock().clear();
        Ok(())
    }
}

struct Factory(Arc<Mutex<HashMap<String, String>>>);

impl BackendFactory for Factory {
    fn create(&self, _kind: TransportKind) -> anyhow::Result<Box<dyn Backend>> {
        Ok(Box::new(LastValue {
            values: self.0.clone(),
        }))
    }
}

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_publish_lifecycle_through_status_codes() {
    let values = Arc::new(Mutex::new(HashMap::new()));
    let bus = DataBus::with_backend_factory(Arc::new(Factory(values.clone())));

    let created = bus
        .context_create_from_map(&map(&[
            ("endpoint", "opcua://0.0.0.0:4840/"),
            ("direction", "PUB"),
            ("name", "plant"),
        ]))
        .await;
    assert_eq!(status(&created), STATUS_OK);

    let topic = TopicConfig::from_map(&map(&[("name", "line1/temp"), ("type", "string")])).unwrap();
    assert_eq!(status(&bus.publish(&topic, &"72.5".into()).await), STATUS_OK);
    assert_eq!(status(&bus.publish(&topic, &"73.0".into()).await), STATUS_OK);
    assert_eq!(values.lock().get("line1/temp").map(String::as_str), Some("73.0"));

    let as_int = TopicConfig::new("line1/temp", PayloadKind::Int.to_string());
    let mismatch = bus.publish(&as_int, &Payload::Int(72)).await;
    assert_ne!(status(&mismatch), STATUS_OK);
    assert_eq!(values.lock().get("line1/temp").map(String::as_str), Some("73.0"));

    // the OPC-UA side has no receive path
    let subscribe = bus.subscribe(&topic, |_| {}).await;
    assert!(matches!(subscribe, Err(DataBusError::WrongDirection { .. })));

    assert_eq!(status(&bus.context_destroy().await), STATUS_OK);
    assert!(values.lock().is_empty());
    assert_ne!(status(&bus.context_destroy().await), STATUS_OK);
}

#[tokio::test]
async fn test_bad_configuration_maps() {
    let bus = DataBus::with_backend_factory(Arc::new(Factory(Default::default())));

    let missing_direction = bus
        .context_create_from_map(&map(&[("endpoint", "mqtt://localhost:1883/")]))
        .await;
    assert!(matches!(missing_direction, Err(DataBusError::InvalidConfig(_))));

    let unknown_scheme = bus
        .context_create_from_map(&map(&[("endpoint", "kafka://localhost:9092/"), ("direction", "PUB")]))
        .await;
    assert!(matches!(unknown_scheme, Err(DataBusError::UnknownScheme(ref s)) if s == "kafka"));

    // nothing was created, a valid configuration still works
    let ok = bus
        .context_create_from_map(&map(&[("endpoint", "mqtt://localhost:1883/"), ("direction", "PUB")]))
        .await;
    assert!(ok.is_ok());
}
