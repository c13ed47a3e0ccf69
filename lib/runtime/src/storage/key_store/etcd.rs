// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transports::etcd;

use super::{KeyStore, StoreError, WatchCallback, WatchScope};

/// Key store backed by an etcd cluster.
///
/// Every key is read under an optional deployment prefix, so `/Publickeys/svcA`
/// with prefix `/edge` is stored at `/edge/Publickeys/svcA`.
#[derive(Clone)]
pub struct EtcdStore {
    client: etcd::Client,
    prefix: String,
}

impl EtcdStore {
    pub fn new(client: etcd::Client, prefix: Option<String>) -> Self {
        Self {
            client,
            prefix: prefix.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl KeyStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let k = make_key(&self.prefix, key);
        tracing::trace!("etcd get: {k}");

        let mut kvs = self
            .client
            .kv_get(k, None)
            .await
            .map_err(|e| StoreError::EtcdError(e.to_string()))?;
        if kvs.is_empty() {
            return Ok(None);
        }
        let (_, val) = kvs.swap_remove(0).into_key_value();
        String::from_utf8(val)
            .map(Some)
            .map_err(|_| StoreError::InvalidUtf8(key.to_string()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let k = make_key(&self.prefix, key);
        tracing::trace!("etcd put: {k}");
        self.client
            .kv_put(k, value)
            .await
            .map_err(|e| StoreError::EtcdError(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let k = make_key(&self.prefix, key);
        tracing::trace!("etcd delete: {k}");
        let _ = self
            .client
            .kv_delete(k)
            .await
            .map_err(|e| StoreError::EtcdError(e.to_string()))?;
        Ok(())
    }

    async fn watch(
        &self,
        scope: WatchScope,
        callback: WatchCallback,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        let (target, prefix) = match &scope {
            WatchScope::Key(k) => (make_key(&self.prefix, k), false),
            WatchScope::Prefix(p) => (make_key(&self.prefix, p), true),
        };
        tracing::trace!("etcd watch: {target}");
        let mut rx = self
            .client
            .kv_watch(&target, prefix, cancel)
            .await
            .map_err(|e| StoreError::EtcdError(e.to_string()))?;

        let deployment_prefix = self.prefix.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let (kv, deleted) = match event {
                    etcd::WatchEvent::Put(kv) => (kv, false),
                    etcd::WatchEvent::Delete(kv) => (kv, true),
                };
                let (k, v) = kv.into_key_value();
                let key = match String::from_utf8(k) {
                    Ok(k) => k,
                    Err(err) => {
                        tracing::error!(%err, "Invalid UTF8 in etcd key");
                        continue;
                    }
                };
                let key = strip_key(&deployment_prefix, &key);
                if deleted {
                    callback(key, "");
                    continue;
                }
                match std::str::from_utf8(&v) {
                    Ok(value) => callback(key, value),
                    Err(err) => tracing::error!(%err, key, "Invalid UTF8 in etcd value"),
                }
            }
        }))
    }
}

fn make_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

fn strip_key<'a>(prefix: &str, key: &'a str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(make_key("/edge", "/Publickeys/svcA"), "/edge/Publickeys/svcA");
        assert_eq!(make_key("", "/svcA/private_key"), "/svcA/private_key");
        assert_eq!(strip_key("/edge", "/edge/Publickeys/svcA"), "/Publickeys/svcA");
        assert_eq!(strip_key("/edge", "/other/key"), "/other/key");
    }
}
