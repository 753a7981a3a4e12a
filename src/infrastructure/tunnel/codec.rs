/// 隧道帧编解码器
///
/// 帧格式：4 字节大端长度前缀 + bincode(serde) 编码的 `TunnelEnvelope`。
///
/// ```text
/// +----------------+---------------------------+
/// | len: u32 (BE)  | bincode(TunnelEnvelope)   |
/// +----------------+---------------------------+
/// ```

use crate::shared::protocol::TunnelEnvelope;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// 长度前缀字节数
pub const HEADER_LEN: usize = 4;

/// 默认帧上限 64KB
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// 编解码错误
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Incomplete frame: {len} bytes available")]
    Incomplete { len: usize },

    #[error("Trailing bytes after frame: {0}")]
    TrailingBytes(usize),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-delimited bincode codec for tunnel envelopes
#[derive(Debug, Clone)]
pub struct TunnelCodec {
    max_frame_len: usize,
}

impl TunnelCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for TunnelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Encoder<&'a TunnelEnvelope> for TunnelCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a TunnelEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serde::encode_to_vec(item, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        if payload.len() > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for TunnelCodec {
    type Item = TunnelEnvelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None); // 需要更多数据
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        let (envelope, _) =
            bincode::serde::decode_from_slice(&payload, bincode::config::standard())
                .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Some(envelope))
    }
}

/// 编码单个完整帧
pub fn encode_frame(envelope: &TunnelEnvelope) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    TunnelCodec::new().encode(envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// 解码单个完整帧，不允许残缺或多余字节
pub fn decode_frame(frame: &[u8]) -> Result<TunnelEnvelope, CodecError> {
    let mut buf = BytesMut::from(frame);
    match TunnelCodec::new().decode(&mut buf)? {
        Some(envelope) if buf.is_empty() => Ok(envelope),
        Some(_) => Err(CodecError::TrailingBytes(buf.len())),
        None => Err(CodecError::Incomplete { len: frame.len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::protocol::{AccountId, BatchHandle, BatchType, TunnelMessage};

    fn deposit_response() -> TunnelEnvelope {
        TunnelEnvelope {
            sender: AccountId::new("root-bridge"),
            message: TunnelMessage {
                batch_type: BatchType::Deposit,
                id: 7,
                weight_matrix: vec![vec![1000, 2000], vec![2000, 5000], vec![1000, 3000]],
                amounts: vec![27, 68],
            },
        }
    }

    #[test]
    fn test_frame_carries_length_prefix() {
        let frame = encode_frame(&deposit_response()).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, deposit_response());
    }

    #[test]
    fn test_partial_frame() {
        let frame = encode_frame(&deposit_response()).unwrap();
        let mut codec = TunnelCodec::new();

        let mut buf = BytesMut::from(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]).unwrap_err(),
            CodecError::Incomplete { .. }
        ));
    }

    #[test]
    fn test_stream_of_frames() {
        let fired = TunnelEnvelope {
            sender: AccountId::new("child-batcher"),
            message: TunnelMessage::fired(BatchHandle::sell(0), vec![70, 90]),
        };

        let mut codec = TunnelCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&fired, &mut buf).unwrap();
        codec.encode(&deposit_response(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(fired));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(deposit_response()));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = TunnelCodec::with_max_frame_len(8);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(&deposit_response(), &mut buf).unwrap_err(),
            CodecError::FrameTooLarge { max: 8, .. }
        ));

        let mut oversized = BytesMut::new();
        oversized.put_u32(1024);
        assert!(matches!(
            codec.decode(&mut oversized).unwrap_err(),
            CodecError::FrameTooLarge { len: 1024, max: 8 }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = BytesMut::from(&encode_frame(&deposit_response()).unwrap()[..]);
        frame.put_u8(0);
        assert!(matches!(
            decode_frame(&frame).unwrap_err(),
            CodecError::TrailingBytes(1)
        ));
    }
}
