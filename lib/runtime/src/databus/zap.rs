// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! ZAP/1.0 handler enforcing a CURVE client allow-list.
//!
//! libzmq asks the handler bound at `inproc://zeromq.zap.01` of the socket's
//! context whether a client may complete its handshake. Request frames:
//!
//! `[version, request_id, domain, address, identity, mechanism, client_key]`
//!
//! Reply frames: `[version, request_id, status_code, status_text, user_id, metadata]`

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::{Context, Result};

pub const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";
pub const ZAP_VERSION: &[u8] = b"1.0";

/// How long a handler blocks in `recv` before checking for shutdown
const POLL_INTERVAL_MS: i32 = 100;

/// Binary CURVE public keys allowed to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    keys: HashSet<Vec<u8>>,
}

impl AllowList {
    /// Decode Z85 public keys. Keys that do not decode to 32 bytes are skipped.
    pub fn from_z85<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = HashSet::new();
        for key in keys {
            match zmq::z85_decode(key.as_ref()) {
                Ok(decoded) if decoded.len() == 32 => {
                    allowed.insert(decoded);
                }
                _ => tracing::warn!(key = key.as_ref(), "ignoring malformed CURVE public key"),
            }
        }
        Self { keys: allowed }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of one ZAP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapReply {
    pub request_id: Vec<u8>,
    pub status_code: &'static str,
    pub status_text: &'static str,
    pub user_id: String,
}

impl ZapReply {
    pub fn is_allowed(&self) -> bool {
        self.status_code == "200"
    }

    pub fn into_frames(self) -> Vec<Vec<u8>> {
        vec![
            ZAP_VERSION.to_vec(),
            self.request_id,
            self.status_code.as_bytes().to_vec(),
            self.status_text.as_bytes().to_vec(),
            self.user_id.into_bytes(),
            Vec::new(),
        ]
    }
}

/// Decide a ZAP request against `allowed`.
pub fn authorize(allowed: &AllowList, request: &[Vec<u8>]) -> ZapReply {
    let request_id = request.get(1).cloned().unwrap_or_default();
    let reply = |status_code, status_text| ZapReply {
        request_id: request_id.clone(),
        status_code,
        status_text,
        user_id: String::new(),
    };

    if request.len() < 6 || request[0] != ZAP_VERSION {
        return reply("500", "Malformed ZAP request");
    }
    if request[5] != b"CURVE" {
        return reply("400", "Only CURVE is accepted");
    }
    let Some(client_key) = request.get(6).filter(|k| k.len() == 32) else {
        return reply("400", "Missing client key");
    };
    if !allowed.contains(client_key) {
        return reply("400", "Client key is not allowed");
    }

    ZapReply {
        user_id: zmq::z85_encode(client_key).unwrap_or_default(),
        ..reply("200", "OK")
    }
}

/// Background thread answering ZAP requests for one context.
pub struct ZapHandler {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ZapHandler {
    /// Bind the handler on `context`. Must run before any CURVE server socket binds.
    pub fn start(context: &zmq::Context, allowed: AllowList) -> Result<Self> {
        let socket = context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(POLL_INTERVAL_MS)?;
        socket
            .bind(ZAP_ENDPOINT)
            .context("binding the ZAP handler, is another one running on this context?")?;

        tracing::debug!(allowed = allowed.len(), "ZAP handler started");
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::Builder::new()
            .name("zap-handler".to_string())
            .spawn(move || serve(socket, allowed, stop_flag))
            .context("spawning the ZAP handler thread")?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("ZAP handler thread panicked");
        }
    }
}

impl Drop for ZapHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(socket: zmq::Socket, allowed: AllowList, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let request = match socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => continue,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                tracing::error!(error = %e, "ZAP handler receive failed");
                break;
            }
        };

        let reply = authorize(&allowed, &request);
        if !reply.is_allowed() {
            tracing::warn!(
                address = %String::from_utf8_lossy(request.get(3).map(Vec::as_slice).unwrap_or_default()),
                reason = reply.status_text,
                "rejected CURVE client"
            );
        }
        if let Err(e) = socket.send_multipart(reply.into_frames(), 0) {
            tracing::error!(error = %e, "ZAP handler reply failed");
            break;
        }
    }
    tracing::debug!("ZAP handler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (String, Vec<u8>) {
        let pair = zmq::CurveKeyPair::new().unwrap();
        (zmq::z85_encode(&pair.public_key).unwrap(), pair.public_key.to_vec())
    }

    fn request(mechanism: &[u8], key: &[u8]) -> Vec<Vec<u8>> {
        vec![
            ZAP_VERSION.to_vec(),
            b"7".to_vec(),
            b"edgebus".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            mechanism.to_vec(),
            key.to_vec(),
        ]
    }

    #[test]
    fn test_allowed_key_is_accepted() {
        let (z85, binary) = keypair();
        let allowed = AllowList::from_z85([z85.as_str()]);
        let reply = authorize(&allowed, &request(b"CURVE", &binary));
        assert!(reply.is_allowed());
        assert_eq!(reply.request_id, b"7");
        assert_eq!(reply.user_id, z85);

        let frames = reply.into_frames();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[2], b"200");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let (allowed_key, _) = keypair();
        let (_, stranger) = keypair();
        let allowed = AllowList::from_z85([allowed_key]);
        let reply = authorize(&allowed, &request(b"CURVE", &stranger));
        assert_eq!(reply.status_code, "400");
    }

    #[test]
    fn test_non_curve_and_malformed_requests() {
        let (z85, binary) = keypair();
        let allowed = AllowList::from_z85([z85]);
        assert_eq!(authorize(&allowed, &request(b"NULL", &binary)).status_code, "400");
        assert_eq!(authorize(&allowed, &request(b"CURVE", b"short")).status_code, "400");
        assert_eq!(authorize(&allowed, &[b"1.0".to_vec()]).status_code, "500");

        let mut wrong_version = request(b"CURVE", &binary);
        wrong_version[0] = b"2.0".to_vec();
        assert_eq!(authorize(&allowed, &wrong_version).status_code, "500");
    }

    #[test]
    fn test_empty_allow_list_rejects_everyone() {
        let (_, binary) = keypair();
        let allowed = AllowList::from_z85(["not a key", ""]);
        assert!(allowed.is_empty());
        assert!(!authorize(&allowed, &request(b"CURVE", &binary)).is_allowed());
    }

    #[test]
    fn test_handler_starts_and_stops() {
        let context = zmq::Context::new();
        let mut handler = ZapHandler::start(&context, AllowList::default()).unwrap();
        // only one handler per context
        assert!(ZapHandler::start(&context, AllowList::default()).is_err());
        handler.stop();
    }
}
