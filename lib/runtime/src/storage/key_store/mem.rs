// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{KeyStore, StoreError, WatchCallback, WatchScope};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// In-process key store, for tests and single-node development setups.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryStoreInner {
    data: Mutex<HashMap<String, String>>,
    change_sender: broadcast::Sender<(String, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (change_sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MemoryStore {
            inner: Arc::new(MemoryStoreInner {
                data: Mutex::new(HashMap::new()),
                change_sender,
            }),
        }
    }

    /// Seed the store from `(key, value)` pairs.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        store.inner.data.lock().extend(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into())),
        );
        store
    }

    fn notify(&self, key: &str, value: &str) {
        // no receivers is not an error
        let _ = self
            .inner
            .change_sender
            .send((key.to_string(), value.to_string()));
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .data
            .lock()
            .insert(key.to_string(), value.to_string());
        self.notify(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.inner.data.lock().remove(key).is_some() {
            self.notify(key, "");
        }
        Ok(())
    }

    async fn watch(
        &self,
        scope: WatchScope,
        callback: WatchCallback,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, StoreError> {
        // Subscribe before spawning so changes made right after this call are not missed
        let mut changes = self.inner.change_sender.subscribe();
        Ok(tokio::spawn(async move {
            loop {
                let (key, value) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => change,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, ?scope, "memory store watcher lagged behind");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                };
                if scope.matches(&key) {
                    callback(&key, &value);
                }
            }
        }))
    }
}
