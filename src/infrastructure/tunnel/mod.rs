/// Message Tunnel
///
/// - `traits`: the `Tunnel` send contract
/// - `codec`: length-delimited bincode framing
/// - `channel`: in-memory transport with per-domain inboxes

pub mod channel;
pub mod codec;
pub mod traits;

pub use channel::{InMemoryTunnel, TunnelReceiver};
pub use codec::{decode_frame, encode_frame, CodecError, TunnelCodec};
pub use traits::{Tunnel, TunnelError};
