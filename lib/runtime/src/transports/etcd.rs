// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use derive_builder::Builder;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use etcd_client::{Certificate, GetOptions, Identity, TlsOptions, WatchOptions};
pub use etcd_client::{ConnectOptions, KeyValue};

use crate::config::environment_names::etcd as env_etcd;

const DEFAULT_ETCD_URL: &str = "http://localhost:2379";

/// ETCD Client
///
/// Thin wrapper over [`etcd_client::Client`] exposing the handful of calls the key store needs.
#[derive(Clone)]
pub struct Client {
    client: etcd_client::Client,
    etcd_urls: Vec<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "etcd::Client urls={}", self.etcd_urls.join(","))
    }
}

impl Client {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Establish a connection to the etcd cluster.
    pub async fn new(config: ClientOptions) -> Result<Self> {
        config.validate()?;
        let client = etcd_client::Client::connect(
            config.etcd_url.clone(),
            config.etcd_connect_options.clone(),
        )
        .await
        .with_context(|| {
            format!(
                "Unable to connect to etcd server at {}. Check etcd server status",
                config.etcd_url.join(", ")
            )
        })?;

        tracing::debug!(urls = %config.etcd_url.join(","), "connected to etcd");

        Ok(Client {
            client,
            etcd_urls: config.etcd_url,
        })
    }

    pub async fn kv_get(
        &self,
        key: impl Into<Vec<u8>>,
        options: Option<GetOptions>,
    ) -> Result<Vec<KeyValue>> {
        let mut get_response = self.client.kv_client().get(key, options).await?;
        Ok(get_response.take_kvs())
    }

    pub async fn kv_put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let _ = self.client.kv_client().put(key, value, None).await?;
        Ok(())
    }

    /// Returns whether a key was removed.
    pub async fn kv_delete(&self, key: impl Into<Vec<u8>>) -> Result<bool> {
        let response = self.client.kv_client().delete(key, None).await?;
        Ok(response.deleted() > 0)
    }

    /// Watch a single key, or every key under `key` when `prefix` is set.
    ///
    /// Only changes after the call are reported. The forwarding task stops when
    /// `cancel` fires or the receiver is dropped.
    pub async fn kv_watch(
        &self,
        key: &str,
        prefix: bool,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<WatchEvent>> {
        let options = if prefix {
            WatchOptions::new().with_prefix()
        } else {
            WatchOptions::new()
        };
        let (watcher, mut watch_stream) = self
            .client
            .watch_client()
            .watch(key, Some(options))
            .await
            .with_context(|| format!("Unable to watch etcd key '{key}'"))?;

        let (tx, rx) = mpsc::channel(32);
        let key = key.to_string();
        tokio::spawn(async move {
            // the watch is cancelled server-side once the watcher is dropped
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    maybe_resp = watch_stream.next() => {
                        let response = match maybe_resp {
                            Some(Ok(res)) => res,
                            Some(Err(err)) => {
                                tracing::warn!(error = %err, key, "etcd watch stream error");
                                break;
                            }
                            None => {
                                tracing::warn!(key, "etcd watch stream closed");
                                break;
                            }
                        };
                        for event in response.events() {
                            let Some(kv) = event.kv() else {
                                continue;
                            };
                            let item = match event.event_type() {
                                etcd_client::EventType::Put => WatchEvent::Put(kv.clone()),
                                etcd_client::EventType::Delete => WatchEvent::Delete(kv.clone()),
                            };
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!(key, "etcd watch task terminated");
        });

        Ok(rx)
    }
}

#[derive(Debug)]
pub enum WatchEvent {
    Put(KeyValue),
    Delete(KeyValue),
}

/// ETCD client configuration options
#[derive(Debug, Clone, Builder, Validate)]
pub struct ClientOptions {
    #[validate(length(min = 1))]
    pub etcd_url: Vec<String>,

    #[builder(default)]
    pub etcd_connect_options: Option<ConnectOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            etcd_url: endpoints_from_env(),
            etcd_connect_options: auth_from_env(),
        }
    }
}

/// `ETCD_ENDPOINTS` as a comma-separated list, else the local default.
fn endpoints_from_env() -> Vec<String> {
    std::env::var(env_etcd::ETCD_ENDPOINTS)
        .map(|urls| edgebus_config::parse_list(&urls))
        .unwrap_or_else(|_| vec![DEFAULT_ETCD_URL.to_string()])
}

/// User/password auth wins over mutual TLS when both are configured.
fn auth_from_env() -> Option<ConnectOptions> {
    let var = |name: &str| std::env::var(name).ok();
    if let (Some(user), Some(password)) = (
        var(env_etcd::auth::ETCD_AUTH_USERNAME),
        var(env_etcd::auth::ETCD_AUTH_PASSWORD),
    ) {
        return Some(ConnectOptions::new().with_user(user, password));
    }

    let ca = var(env_etcd::auth::ETCD_AUTH_CA)?;
    let cert = var(env_etcd::auth::ETCD_AUTH_CLIENT_CERT)?;
    let key = var(env_etcd::auth::ETCD_AUTH_CLIENT_KEY)?;
    let tls = TlsOptions::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key));
    Some(ConnectOptions::new().with_tls(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_servers_from_env() {
        temp_env::with_var(
            env_etcd::ETCD_ENDPOINTS,
            Some("http://10.0.0.1:2379, http://10.0.0.2:2379"),
            || {
                let options = ClientOptions::default();
                assert_eq!(
                    options.etcd_url,
                    vec!["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
                );
            },
        );
        temp_env::with_var_unset(env_etcd::ETCD_ENDPOINTS, || {
            let options = ClientOptions::default();
            assert_eq!(options.etcd_url, vec!["http://localhost:2379"]);
        });
    }

    #[test]
    fn test_auth_from_env() {
        temp_env::with_vars(
            [
                (env_etcd::auth::ETCD_AUTH_USERNAME, Some("edge")),
                (env_etcd::auth::ETCD_AUTH_PASSWORD, Some("secret")),
            ],
            || assert!(auth_from_env().is_some()),
        );
        temp_env::with_vars_unset(
            [
                env_etcd::auth::ETCD_AUTH_USERNAME,
                env_etcd::auth::ETCD_AUTH_PASSWORD,
                env_etcd::auth::ETCD_AUTH_CA,
            ],
            || assert!(auth_from_env().is_none()),
        );
    }

    #[test]
    fn test_options_require_an_endpoint() {
        let options = Client::builder().etcd_url(vec![]).build().unwrap();
        assert!(options.validate().is_err());
    }
}
