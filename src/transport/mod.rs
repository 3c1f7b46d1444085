//! Signaling transport
//!
//! WebSocket channels carrying the JSON signaling envelope, the hub server
//! that accepts them, and the reconnecting client endpoint.

pub mod backoff;
pub mod signaling_client;
pub mod signaling_server;
pub mod websocket;

pub use backoff::{Backoff, ReconnectPolicy};
pub use signaling_client::ClientEndpoint;
pub use signaling_server::{HubPhase, HubServer};
pub use websocket::{ChannelId, ChannelReceiver, ChannelSender};
