// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Secure topology derivation.
//!
//! Given a logical topic and the role this application plays on it, the
//! [`TopologyResolver`] produces a [`ConnectionDescriptor`]: the TCP address or
//! IPC socket directory from the topic's transport directive and, outside
//! development mode, the CURVE keys fetched from the [`KeyStore`].
//!
//! Key store layout:
//!
//! - `/Publickeys/<app>`: public key of every application
//! - `/<app>/private_key`: secret key, readable by `<app>` only
//!
//! Bind roles (publisher, server) skip peers whose public key cannot be read,
//! those peers simply cannot connect. Every other missing or unreadable key
//! fails the derivation.

use std::collections::HashMap;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Deserialize;
use validator::Validate;

use crate::config::environment_names::topology as env_topology;
use crate::storage::key_store::{KeyStore, StoreError};

mod descriptor;
pub use descriptor::{ConnectionDescriptor, CurveSecurity, Endpoint, Role, ZMQ_IPC, ZMQ_TCP};

/// Key store path of an application's public key
pub fn public_key_path(app: &str) -> String {
    format!("/Publickeys/{app}")
}

/// Key store path of an application's secret key
pub fn private_key_path(app: &str) -> String {
    format!("/{app}/private_key")
}

#[derive(thiserror::Error, Debug)]
pub enum TopologyError {
    #[error("Unknown role '{0}', expected publisher, subscriber, server or client")]
    UnknownRole(String),

    #[error("No transport directive configured for topic '{0}'")]
    MissingDirective(String),

    #[error("Invalid transport directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("No peer to connect to for topic '{0}'; prefix it with '<peer>/' or set Server")]
    MissingPeer(String),

    #[error("Required key '{key}' is unavailable: {reason}")]
    MissingKey { key: String, reason: String },

    #[error("Invalid topology configuration: {0}")]
    InvalidConfig(String),

    #[error("Required key '{key}' could not be read from the key store")]
    KeyUnavailable {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl TopologyError {
    /// Resolution runs once at startup; every error here aborts it.
    pub fn is_fatal(&self) -> bool {
        match self {
            TopologyError::UnknownRole(_)
            | TopologyError::MissingDirective(_)
            | TopologyError::InvalidDirective { .. }
            | TopologyError::MissingPeer(_)
            | TopologyError::MissingKey { .. }
            | TopologyError::InvalidConfig(_)
            | TopologyError::KeyUnavailable { .. } => true,
        }
    }
}

/// Static wiring of this application, replacing the legacy environment globals.
#[derive(Debug, Clone, Builder, Validate, Deserialize, PartialEq, Eq)]
#[builder(build_fn(private, name = "build_internal"))]
pub struct TopologyConfig {
    /// This application's identity in the key store
    #[validate(length(min = 1))]
    #[builder(setter(into))]
    pub app_name: String,

    /// Peers allowed to connect to topics this application binds
    #[builder(default)]
    pub clients: Vec<String>,

    /// Peers this application connects to, the first one is the default
    #[builder(default)]
    pub servers: Vec<String>,

    /// Transport directive per topic name
    #[builder(default)]
    pub topics: HashMap<String, String>,

    /// Development mode disables transport security
    #[builder(default)]
    pub dev_mode: bool,
}

impl TopologyConfigBuilder {
    /// Set the transport directive of one topic.
    pub fn topic(&mut self, name: impl Into<String>, directive: impl Into<String>) -> &mut Self {
        self.topics
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), directive.into());
        self
    }

    pub fn build(&self) -> Result<TopologyConfig, TopologyError> {
        let config = self
            .build_internal()
            .map_err(|e| TopologyError::InvalidConfig(e.to_string()))?;
        config
            .validate()
            .map_err(|e| TopologyError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }
}

impl TopologyConfig {
    pub fn builder() -> TopologyConfigBuilder {
        TopologyConfigBuilder::default()
    }

    /// Read the legacy deployment variables: `AppName`, `Clients`, `Server`,
    /// `DEV_MODE` and every `<topic>_cfg`.
    pub fn from_env() -> Result<TopologyConfig, TopologyError> {
        let app_name = std::env::var(env_topology::APP_NAME).unwrap_or_default();
        let dev_mode = edgebus_config::env_parse_bool(env_topology::DEV_MODE)
            .map_err(|e| TopologyError::InvalidConfig(e.to_string()))?
            .unwrap_or(false);

        TopologyConfig::builder()
            .app_name(app_name)
            .clients(edgebus_config::env_list(env_topology::CLIENTS))
            .servers(edgebus_config::env_list(env_topology::SERVER))
            .topics(edgebus_config::collect_topic_directives(std::env::vars()))
            .dev_mode(dev_mode)
            .build()
    }

    /// Directive for `topic`, falling back to the name after a `<peer>/` prefix.
    fn directive(&self, topic: &str) -> Option<&str> {
        self.topics
            .get(topic)
            .or_else(|| {
                let (_, bare) = topic.split_once('/')?;
                self.topics.get(bare)
            })
            .map(String::as_str)
    }

    /// Peer a connect role talks to: the `<peer>/` prefix of the topic, else the first server.
    fn peer_for<'a>(&'a self, topic: &'a str) -> Option<&'a str> {
        match topic.split_once('/') {
            Some((peer, _)) if !peer.is_empty() => Some(peer),
            _ => self.servers.first().map(String::as_str),
        }
    }
}

/// Derives [`ConnectionDescriptor`]s from a [`TopologyConfig`] and a [`KeyStore`].
#[derive(Clone)]
pub struct TopologyResolver {
    config: TopologyConfig,
    store: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for TopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TopologyResolver {
    pub fn new(config: TopologyConfig, store: Arc<dyn KeyStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Resolve the descriptor for `topic` in `role`.
    ///
    /// `dev_mode` wins over the configured flag so callers can force either mode.
    pub async fn resolve(
        &self,
        topic: &str,
        role: Role,
        dev_mode: bool,
    ) -> Result<ConnectionDescriptor, TopologyError> {
        let directive = self
            .config
            .directive(topic)
            .ok_or_else(|| TopologyError::MissingDirective(topic.to_string()))?;
        let endpoint = Endpoint::from_directive(directive)?;

        // connect roles need a peer even when no keys are fetched
        let peer = if role.binds() {
            None
        } else {
            Some(
                self.config
                    .peer_for(topic)
                    .ok_or_else(|| TopologyError::MissingPeer(topic.to_string()))?,
            )
        };

        let security = if dev_mode || endpoint.is_ipc() {
            None
        } else if let Some(peer) = peer {
            Some(self.connect_security(peer).await?)
        } else {
            Some(self.bind_security(topic).await?)
        };

        let descriptor =
            ConnectionDescriptor::new(topic.to_string(), role, endpoint, dev_mode, security);
        tracing::debug!(
            topic,
            %role,
            dev_mode,
            address = %descriptor.zmq_address(),
            secured = descriptor.security().is_some(),
            "resolved connection descriptor"
        );
        Ok(descriptor)
    }

    /// Resolve with the configured development mode.
    pub async fn resolve_configured(
        &self,
        topic: &str,
        role: Role,
    ) -> Result<ConnectionDescriptor, TopologyError> {
        self.resolve(topic, role, self.config.dev_mode).await
    }

    async fn bind_security(&self, topic: &str) -> Result<CurveSecurity, TopologyError> {
        let mut allowed_peer_keys: Vec<String> = Vec::with_capacity(self.config.clients.len());
        for peer in &self.config.clients {
            let path = public_key_path(peer);
            match self.store.get(&path).await {
                Ok(Some(key)) if !key.is_empty() => {
                    if !allowed_peer_keys.contains(&key) {
                        allowed_peer_keys.push(key);
                    }
                }
                Ok(_) => {
                    tracing::warn!(topic, peer, "no public key for peer, it will not be able to connect");
                }
                Err(err) => {
                    tracing::warn!(topic, peer, %err, "public key lookup failed, peer will not be able to connect");
                }
            }
        }

        let secret_key = self.required(&private_key_path(&self.config.app_name)).await?;
        Ok(CurveSecurity::Bind {
            secret_key,
            allowed_peer_keys,
        })
    }

    async fn connect_security(&self, peer: &str) -> Result<CurveSecurity, TopologyError> {
        let peer_public_key = self.required(&public_key_path(peer)).await?;
        let public_key = self
            .required(&public_key_path(&self.config.app_name))
            .await?;
        let secret_key = self
            .required(&private_key_path(&self.config.app_name))
            .await?;
        Ok(CurveSecurity::Connect {
            secret_key,
            public_key,
            peer_public_key,
        })
    }

    async fn required(&self, key: &str) -> Result<String, TopologyError> {
        let missing = |reason: String| TopologyError::MissingKey {
            key: key.to_string(),
            reason,
        };
        match self.store.get(key).await {
            Ok(Some(value)) if !value.is_empty() => Ok(value),
            Ok(Some(_)) => Err(missing("value is empty".to_string())),
            Ok(None) => Err(missing("key does not exist".to_string())),
            Err(source) => Err(TopologyError::KeyUnavailable {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_store::MemoryStore;

    const KEY_A: &str = "rq:rM>}U?@Lns47E1%kR.o@n%FcmmsL/@{H8]yf7";
    const KEY_PUB: &str = "Yne@$w-vo<fVvi]a<NY6T1ed:M$fCG*[IaLV{hID";
    const KEY_SUB: &str = "e9AR*8zZ@[4VN+fe5MT*8wsJBm*&yCjI}mOW)ua^";

    fn store() -> Arc<dyn KeyStore> {
        Arc::new(MemoryStore::with_entries([
            ("/Publickeys/svcA", KEY_A),
            ("/Publickeys/pub", KEY_PUB),
            ("/pub/private_key", "pub-secret"),
            ("/Publickeys/sub", KEY_SUB),
            ("/sub/private_key", "sub-secret"),
        ]))
    }

    fn publisher_config() -> TopologyConfig {
        TopologyConfig::builder()
            .app_name("pub")
            .clients(vec!["svcA".to_string(), "svcB".to_string()])
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publisher_skips_peers_without_keys() {
        let resolver = TopologyResolver::new(publisher_config(), store());
        let descriptor = resolver
            .resolve("results", Role::Publisher, false)
            .await
            .unwrap();

        assert_eq!(
            descriptor.endpoint(),
            &Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 65013
            }
        );
        match descriptor.security() {
            Some(CurveSecurity::Bind {
                secret_key,
                allowed_peer_keys,
            }) => {
                assert_eq!(secret_key, "pub-secret");
                assert_eq!(allowed_peer_keys, &vec![KEY_A.to_string()]);
            }
            other => panic!("expected bind security, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allow_list_is_deduplicated_in_order() {
        let config = TopologyConfig::builder()
            .app_name("pub")
            .clients(vec!["sub".into(), "svcA".into(), "sub".into()])
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let descriptor = resolver
            .resolve("results", Role::Server, false)
            .await
            .unwrap();
        let Some(CurveSecurity::Bind {
            allowed_peer_keys, ..
        }) = descriptor.security()
        else {
            panic!("expected bind security");
        };
        assert_eq!(allowed_peer_keys, &vec![KEY_SUB.to_string(), KEY_A.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_own_secret_key_is_fatal() {
        let config = TopologyConfig::builder()
            .app_name("svcA")
            .clients(vec!["pub".into()])
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let err = resolver
            .resolve("results", Role::Publisher, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::MissingKey { ref key, .. } if key == "/pub/private_key"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_subscriber_gets_full_key_set() {
        let config = TopologyConfig::builder()
            .app_name("sub")
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let descriptor = resolver
            .resolve("pub/results", Role::Subscriber, false)
            .await
            .unwrap();

        assert_eq!(descriptor.wire_topic(), "results");
        assert_eq!(
            descriptor.security(),
            &Some(CurveSecurity::Connect {
                secret_key: "sub-secret".into(),
                public_key: KEY_SUB.into(),
                peer_public_key: KEY_PUB.into(),
            })
        );
    }

    #[tokio::test]
    async fn test_client_uses_first_server() {
        let config = TopologyConfig::builder()
            .app_name("sub")
            .servers(vec!["pub".into(), "svcA".into()])
            .topic("echo", "zmq_tcp, 127.0.0.1:66000")
            .build();
        assert!(config.is_ok());
        let resolver = TopologyResolver::new(config.unwrap(), store());
        let err = resolver.resolve("echo", Role::Client, false).await.unwrap_err();
        assert!(matches!(err, TopologyError::InvalidDirective { .. }));

        let config = TopologyConfig::builder()
            .app_name("sub")
            .servers(vec!["pub".into(), "svcA".into()])
            .topic("echo", "zmq_tcp, 127.0.0.1:6600")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let descriptor = resolver.resolve("echo", Role::Client, false).await.unwrap();
        let Some(CurveSecurity::Connect {
            peer_public_key, ..
        }) = descriptor.security()
        else {
            panic!("expected connect security");
        };
        assert_eq!(peer_public_key, KEY_PUB);
    }

    #[tokio::test]
    async fn test_subscriber_missing_peer_key_is_fatal() {
        let config = TopologyConfig::builder()
            .app_name("sub")
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let err = resolver
            .resolve("svcB/results", Role::Subscriber, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::MissingKey { ref key, .. } if key == "/Publickeys/svcB"));
    }

    #[tokio::test]
    async fn test_subscriber_without_peer_fails() {
        let config = TopologyConfig::builder()
            .app_name("sub")
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let err = resolver
            .resolve("results", Role::Subscriber, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::MissingPeer(_)));
    }

    #[tokio::test]
    async fn test_dev_mode_never_carries_keys() {
        let config = TopologyConfig::builder()
            .app_name("nobody")
            .clients(vec!["svcA".into()])
            .servers(vec!["pub".into()])
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        // no keys at all for "nobody", dev mode must not look
        let resolver = TopologyResolver::new(config, store());
        for role in [Role::Publisher, Role::Subscriber, Role::Server, Role::Client] {
            let descriptor = resolver.resolve("results", role, true).await.unwrap();
            assert!(descriptor.security().is_none(), "{role} carried keys");
            assert!(*descriptor.dev_mode());
        }
    }

    #[tokio::test]
    async fn test_ipc_carries_no_keys() {
        let config = TopologyConfig::builder()
            .app_name("nobody")
            .topic("camera1_stream", "zmq_ipc, /EII/sockets")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, store());
        let descriptor = resolver
            .resolve("camera1_stream", Role::Publisher, false)
            .await
            .unwrap();
        assert!(descriptor.security().is_none());
        assert_eq!(descriptor.zmq_address(), "ipc:///EII/sockets/camera1_stream");
    }

    #[tokio::test]
    async fn test_missing_directive_is_fatal() {
        let resolver = TopologyResolver::new(publisher_config(), store());
        let err = resolver
            .resolve("unknown", Role::Publisher, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::MissingDirective(_)));
        assert!(err.is_fatal());
    }

    struct UnreachableStore;

    #[async_trait::async_trait]
    impl KeyStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::EtcdError("connection refused".into()))
        }

        async fn put(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::EtcdError("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::EtcdError("connection refused".into()))
        }

        async fn watch(
            &self,
            _scope: crate::storage::key_store::WatchScope,
            _callback: crate::storage::key_store::WatchCallback,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> Result<tokio::task::JoinHandle<()>, StoreError> {
            Err(StoreError::EtcdError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_closed() {
        let resolver = TopologyResolver::new(publisher_config(), Arc::new(UnreachableStore));
        let err = resolver
            .resolve("results", Role::Publisher, false)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TopologyError::KeyUnavailable { ref key, .. } if key == "/pub/private_key")
        );
        assert!(err.is_fatal());

        // nothing is fetched in dev mode
        assert!(resolver.resolve("results", Role::Publisher, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_subscriber() {
        let config = TopologyConfig::builder()
            .app_name("sub")
            .topic("results", "zmq_tcp, 127.0.0.1:65013")
            .build()
            .unwrap();
        let resolver = TopologyResolver::new(config, Arc::new(UnreachableStore));
        let err = resolver
            .resolve("svcA/results", Role::Subscriber, false)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TopologyError::KeyUnavailable { ref key, .. } if key == "/Publickeys/svcA")
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_config_requires_app_name() {
        let err = TopologyConfig::builder().app_name("").build().unwrap_err();
        assert!(matches!(err, TopologyError::InvalidConfig(_)));
        assert!(TopologyConfig::builder().build().is_err());
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            vec![
                (env_topology::APP_NAME, Some("VideoIngestion")),
                (env_topology::CLIENTS, Some("VideoAnalytics, Visualizer")),
                (env_topology::SERVER, None),
                (env_topology::DEV_MODE, Some("true")),
                ("camera1_stream_cfg", Some("zmq_tcp, 127.0.0.1:65013")),
            ],
            || {
                let config = TopologyConfig::from_env().unwrap();
                assert_eq!(config.app_name, "VideoIngestion");
                assert_eq!(config.clients, vec!["VideoAnalytics", "Visualizer"]);
                assert!(config.servers.is_empty());
                assert!(config.dev_mode);
                assert_eq!(
                    config.topics.get("camera1_stream").map(String::as_str),
                    Some("zmq_tcp, 127.0.0.1:65013")
                );
            },
        );
    }

    #[test]
    fn test_config_from_env_rejects_bad_dev_mode() {
        temp_env::with_vars(
            vec![
                (env_topology::APP_NAME, Some("VideoIngestion")),
                (env_topology::DEV_MODE, Some("sometimes")),
            ],
            || {
                assert!(TopologyConfig::from_env().is_err());
            },
        );
    }
}
