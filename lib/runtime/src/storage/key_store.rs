// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client side of the distributed configuration namespace.
//!
//! The namespace holds per-application CURVE key pairs (`/<app>/private_key`,
//! `/Publickeys/<app>`) and topic wiring strings. The data bus only ever reads
//! from it; watches are offered for the surrounding system.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transports::etcd as etcd_transport;

mod etcd;
pub use etcd::EtcdStore;
mod mem;
pub use mem::MemoryStore;

/// Invoked as `callback(key, value)` whenever a watched key changes.
/// A deleted key is reported with an empty value.
pub type WatchCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Which keys a watch reports on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    Key(String),
    Prefix(String),
}

impl WatchScope {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            WatchScope::Key(k) => k == key,
            WatchScope::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch a value. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Start a background task invoking `callback` for every change in `scope`
    /// until `cancel` fires.
    async fn watch(
        &self,
        scope: WatchScope,
        callback: WatchCallback,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError>;

    async fn watch_key(
        &self,
        key: &str,
        callback: WatchCallback,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        self.watch(WatchScope::Key(key.to_string()), callback, cancel)
            .await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        callback: WatchCallback,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        self.watch(WatchScope::Prefix(prefix.to_string()), callback, cancel)
            .await
    }
}

#[derive(Clone, Debug, Default)]
pub enum Selector {
    // Box it because it is significantly bigger than the other variant
    Etcd(Box<etcd_transport::ClientOptions>),
    #[default]
    Memory,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Etcd(opts) => {
                let urls = opts.etcd_url.join(",");
                write!(f, "Etcd({urls})")
            }
            Selector::Memory => write!(f, "Memory"),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Selector> {
        match s {
            "etcd" => Ok(Self::Etcd(Box::default())),
            "mem" => Ok(Self::Memory),
            x => anyhow::bail!("Unknown key store type '{x}'"),
        }
    }
}

impl Selector {
    /// Connect to the selected store. `prefix` is prepended to every etcd key.
    pub async fn connect(self, prefix: Option<String>) -> anyhow::Result<Arc<dyn KeyStore>> {
        Ok(match self {
            Selector::Etcd(opts) => {
                let client = etcd_transport::Client::new(*opts).await?;
                Arc::new(EtcdStore::new(client, prefix))
            }
            Selector::Memory => Arc::new(MemoryStore::new()),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Internal etcd error: {0}")]
    EtcdError(String),

    #[error("Value of key '{0}' is not valid UTF-8")]
    InvalidUtf8(String),
}
