//! Push and stream channel transports.
//!
//! - `ChannelSink` - Bounded queue between the connection manager and a socket
//! - `push` - WebSocket handler (bidirectional)
//! - `stream` - SSE handler (server-to-client)
//! - `channel_router` - Connect endpoints plus `/health`

mod messages;
mod push;
mod routes;
mod sink;
mod stream;

pub use messages::{
    close_code, ClientMessage, ConnectParams, ConnectedMessage, ControlMessage, ErrorResponse,
};
pub use push::push_handler;
pub use routes::{channel_router, health, ChannelState, ConnectRejection};
pub use sink::{ChannelSink, Frame};
pub use stream::stream_handler;
