//! In-memory tunnel transport.
//!
//! Each domain attaches one inbox. Frames are encoded on `send` and decoded by
//! the receiving side, so both domains exercise the same wire format a real
//! bridge would carry. With duplicate delivery enabled every frame is queued
//! twice, which is the at-least-once worst case the replay guards must absorb.

use super::codec::{decode_frame, encode_frame, CodecError};
use super::traits::{Tunnel, TunnelError};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{Domain, TunnelEnvelope};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

struct TunnelInner {
    routes: RwLock<HashMap<Domain, UnboundedSender<Bytes>>>,
    duplicate_delivery: AtomicBool,
    online: AtomicBool,
    frames_sent: AtomicU64,
}

#[derive(Clone)]
pub struct InMemoryTunnel {
    inner: Arc<TunnelInner>,
}

impl InMemoryTunnel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TunnelInner {
                routes: RwLock::new(HashMap::new()),
                duplicate_delivery: AtomicBool::new(false),
                online: AtomicBool::new(true),
                frames_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Delivers every frame twice.
    pub fn with_duplicate_delivery(self, enabled: bool) -> Self {
        self.inner.duplicate_delivery.store(enabled, Ordering::Relaxed);
        self
    }

    /// Creates the inbox for `domain`, replacing any previous one.
    pub fn attach(&self, domain: Domain) -> TunnelReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routes.write().insert(domain, tx);
        TunnelReceiver { domain, rx }
    }

    /// 模拟桥接中断：离线时 `send` 直接失败
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl Tunnel for InMemoryTunnel {
    fn send(&self, destination: Domain, envelope: &TunnelEnvelope) -> Result<usize, TunnelError> {
        if !self.inner.online.load(Ordering::Relaxed) {
            return Err(TunnelError::Offline);
        }

        let frame = encode_frame(envelope)?;
        let routes = self.inner.routes.read();
        let inbox = routes
            .get(&destination)
            .ok_or(TunnelError::Unroutable(destination))?;

        inbox
            .send(frame.clone())
            .map_err(|_| TunnelError::Closed(destination))?;

        let copies = if self.inner.duplicate_delivery.load(Ordering::Relaxed) {
            // 对端已关闭时重复帧丢失无妨，首帧已成功入队
            let _ = inbox.send(frame.clone());
            2
        } else {
            1
        };

        self.inner.frames_sent.fetch_add(copies, Ordering::Relaxed);
        METRICS
            .tunnel_messages_total
            .with_label_values(&["sent", destination.as_str()])
            .inc_by(copies as f64);

        debug!(
            to = destination.as_str(),
            handle = %envelope.message.handle(),
            bytes = frame.len(),
            copies,
            "frame queued"
        );

        Ok(frame.len())
    }
}

/// 某个域的收件箱
pub struct TunnelReceiver {
    domain: Domain,
    rx: UnboundedReceiver<Bytes>,
}

impl TunnelReceiver {
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Waits for the next frame. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Result<TunnelEnvelope, CodecError>> {
        let frame = self.rx.recv().await?;
        Some(self.decode(&frame))
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Result<TunnelEnvelope, CodecError>> {
        let frame = self.rx.try_recv().ok()?;
        Some(self.decode(&frame))
    }

    fn decode(&self, frame: &[u8]) -> Result<TunnelEnvelope, CodecError> {
        METRICS
            .tunnel_messages_total
            .with_label_values(&["received", self.domain.as_str()])
            .inc();
        decode_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::protocol::{AccountId, BatchHandle, TunnelMessage};

    fn fired_sell() -> TunnelEnvelope {
        TunnelEnvelope {
            sender: AccountId::new("child-batcher"),
            message: TunnelMessage::fired(BatchHandle::sell(0), vec![70, 90]),
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let tunnel = InMemoryTunnel::new();
        let mut root = tunnel.attach(Domain::Root);

        let bytes = tunnel.send(Domain::Root, &fired_sell()).unwrap();
        assert!(bytes > 0);

        let received = root.recv().await.unwrap().unwrap();
        assert_eq!(received, fired_sell());
        assert!(root.try_recv().is_none());
    }

    #[test]
    fn test_duplicate_delivery() {
        let tunnel = InMemoryTunnel::new().with_duplicate_delivery(true);
        let mut root = tunnel.attach(Domain::Root);

        tunnel.send(Domain::Root, &fired_sell()).unwrap();

        assert!(root.try_recv().is_some());
        assert!(root.try_recv().is_some());
        assert!(root.try_recv().is_none());
        assert_eq!(tunnel.frames_sent(), 2);
    }

    #[test]
    fn test_unroutable_and_offline() {
        let tunnel = InMemoryTunnel::new();
        assert!(matches!(
            tunnel.send(Domain::Child, &fired_sell()).unwrap_err(),
            TunnelError::Unroutable(Domain::Child)
        ));

        let _child = tunnel.attach(Domain::Child);
        tunnel.set_online(false);
        assert!(matches!(
            tunnel.send(Domain::Child, &fired_sell()).unwrap_err(),
            TunnelError::Offline
        ));
    }

    #[test]
    fn test_closed_inbox() {
        let tunnel = InMemoryTunnel::new();
        drop(tunnel.attach(Domain::Root));
        assert!(matches!(
            tunnel.send(Domain::Root, &fired_sell()).unwrap_err(),
            TunnelError::Closed(Domain::Root)
        ));
    }
}
