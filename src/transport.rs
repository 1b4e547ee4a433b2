//! Transport boundary.
//!
//! The WhatsApp-style client lives outside this crate; the core only sees
//! this trait. The in-memory implementation backs tests and the dashboard
//! simulator.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Participant jids to mention.
    pub mentions: Vec<String>,
    /// Flash a typing presence before the send (anti-detection).
    pub typing_flash: bool,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub ok: bool,
    pub reason: Option<String>,
}

impl SendReceipt {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, group_jid: &str, text: &str, opts: SendOptions) -> SendReceipt;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub group_jid: String,
    pub text: String,
    pub mentions: Vec<String>,
}

/// Captures sends instead of delivering them.
pub struct InMemoryTransport {
    sent: Mutex<Vec<OutboundRecord>>,
    connected: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundRecord> {
        std::mem::take(&mut self.sent.lock())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, group_jid: &str, text: &str, opts: SendOptions) -> SendReceipt {
        if !self.is_connected() {
            return SendReceipt::failed("disconnected");
        }
        self.sent.lock().push(OutboundRecord {
            group_jid: group_jid.to_string(),
            text: text.to_string(),
            mentions: opts.mentions,
        });
        SendReceipt::ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_while_connected() {
        let transport = InMemoryTransport::new();
        let receipt = transport
            .send("g1", "R$ 5,2260", SendOptions::default())
            .await;
        assert!(receipt.ok);
        assert_eq!(transport.sent().len(), 1);

        transport.set_connected(false);
        let receipt = transport.send("g1", "x", SendOptions::default()).await;
        assert!(!receipt.ok);
        assert_eq!(transport.sent().len(), 1);
    }
}
