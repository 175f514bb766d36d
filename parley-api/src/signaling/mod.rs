//! Peer signaling: wire protocol, request dispatch and notification fan-out

mod dispatcher;
mod hub;
pub mod protocol;

pub use dispatcher::{DispatchError, SignalingDispatcher};
pub use hub::{MessageSender, PeerHub};
pub use protocol::{ClientFrame, ClientRequest, ProtocolError, ServerMessage};
