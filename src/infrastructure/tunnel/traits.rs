/// 消息隧道 trait 定义
///
/// 单向、异步、至少一次投递。`send` 只负责把帧交给隧道，不等待对端处理；
/// 对端通过自己的收件箱异步取出消息并调用 `on_inbound_message`。

use super::codec::CodecError;
use crate::shared::protocol::{Domain, TunnelEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel is offline")]
    Offline,

    #[error("no route to {0} domain")]
    Unroutable(Domain),

    #[error("{0} domain inbox is closed")]
    Closed(Domain),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// 跨域消息通道
pub trait Tunnel: Send + Sync {
    /// Hands `envelope` to the tunnel for delivery to `destination`.
    ///
    /// Fire-and-forget: returns the encoded frame size once the frame is
    /// queued. A failed send is never retried here.
    fn send(&self, destination: Domain, envelope: &TunnelEnvelope) -> Result<usize, TunnelError>;
}
