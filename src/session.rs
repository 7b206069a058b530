//! Peer Session: an ordered, reliable, bidirectional byte channel to one
//! remote peer, abstracted behind a trait so the transport substrate stays
//! an external collaborator (see PURPOSE & SCOPE).
//!
//! An async trait behind a mockable event stream, with a tagged-enum JSON
//! message envelope for the text side of the channel.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::manifest::Manifest;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("channel not open")]
    ChannelNotOpen,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// The text message envelope exchanged over a `PeerSession`. Binary chunk
/// payloads are pushed separately via `sendBinary` and are not represented
/// here: a `Chunk` header must be immediately followed by exactly one
/// binary frame of the declared length, and the session itself does not
/// enforce this — callers must not interleave other sends in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionMessage {
    Manifest { manifest: Manifest },
    Chunk {
        transfer_id: String,
        chunk_index: u32,
        total_chunks: u32,
        byte_length: u32,
    },
    TransferComplete {
        transfer_id: String,
        file_name: String,
    },
    ChunkRequest {
        request_id: String,
        manifest_id: String,
        chunk_index: u32,
    },
    ChunkResponse {
        request_id: String,
        manifest_id: String,
        chunk_index: u32,
        data: String,
    },
    ChunkError {
        request_id: String,
        manifest_id: String,
        chunk_index: u32,
        reason: String,
    },
    ChunkUpload {
        manifest_id: String,
        chunk_index: u32,
        data: String,
        hash: String,
    },
    ChunkUploadAck {
        manifest_id: String,
        chunk_index: u32,
        peer_id: String,
        status: String,
    },
    ChunkUploadNack {
        manifest_id: String,
        chunk_index: u32,
        peer_id: String,
        reason: String,
    },
}

/// Inbound events surfaced by a session: a decoded text message, a binary
/// frame (always immediately following a `Chunk` header), or a lifecycle
/// transition.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened,
    Closed,
    Message(SessionMessage),
    Binary(Vec<u8>),
    Error(String),
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn send_json(&self, message: &SessionMessage) -> Result<(), SessionError>;
    async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), SessionError>;
    fn buffered_amount(&self) -> u64;
    fn is_open(&self) -> bool;
}

/// An in-memory, bounded-channel implementation of two connected
/// `PeerSession` endpoints, standing in for a real NAT-traversing data
/// channel in tests and in any environment lacking one. `bufferedAmount`
/// tracks the outbound queue depth in bytes, drained as the peer consumes
/// events from its receiver.
pub struct InMemorySession {
    outbound: mpsc::UnboundedSender<SessionEvent>,
    buffered: Mutex<VecDeque<u64>>,
    open: std::sync::atomic::AtomicBool,
}

impl InMemorySession {
    /// Creates a connected pair: `(a, a_events)` and `(b, b_events)`, where
    /// messages sent on `a` arrive as events on `b_events` and vice versa.
    pub fn pair() -> (
        InMemorySession,
        mpsc::UnboundedReceiver<SessionEvent>,
        InMemorySession,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        let a = InMemorySession {
            outbound: tx_ab,
            buffered: Mutex::new(VecDeque::new()),
            open: std::sync::atomic::AtomicBool::new(true),
        };
        let b = InMemorySession {
            outbound: tx_ba,
            buffered: Mutex::new(VecDeque::new()),
            open: std::sync::atomic::AtomicBool::new(true),
        };
        (a, rx_ba, b, rx_ab)
    }

    pub fn close(&self) {
        self.open.store(false, std::sync::atomic::Ordering::SeqCst);
        let _ = self.outbound.send(SessionEvent::Closed);
    }

    fn record_sent(&self, len: u64) {
        let mut buffered = self.buffered.lock().expect("session mutex poisoned");
        buffered.push_back(len);
    }

    /// Simulates the transport draining queued bytes once the peer consumes
    /// an event; tests call this after receiving to keep `bufferedAmount`
    /// meaningful.
    pub fn drain_one(&self) {
        let mut buffered = self.buffered.lock().expect("session mutex poisoned");
        buffered.pop_front();
    }
}

#[async_trait]
impl PeerSession for InMemorySession {
    async fn send_json(&self, message: &SessionMessage) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        let encoded = serde_json::to_vec(message)
            .map_err(|e| SessionError::SendFailed(e.to_string()))?;
        self.record_sent(encoded.len() as u64);
        self.outbound
            .send(SessionEvent::Message(message.clone()))
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        self.record_sent(bytes.len() as u64);
        self.outbound
            .send(SessionEvent::Binary(bytes))
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    fn buffered_amount(&self) -> u64 {
        self.buffered
            .lock()
            .expect("session mutex poisoned")
            .iter()
            .sum()
    }

    fn is_open(&self) -> bool {
        self.open.load(std::sync::atomic::Ordering::SeqCst)
    }
}
