// Transport module - THE WIRE
// TCP connections carrying line-framed JSON messages between peers

mod connection;
mod framing;

pub use connection::{
    // Connection state
    ConnectionId, PeerConnection, PeerInfo, PeerSender, PeerStatus, DEFAULT_OUTBOUND_QUEUE,
    // Addressing
    PeerAddress, DEFAULT_PORT,
    // Errors
    TransportError,
};

pub use framing::{
    next_inbound, split, FrameReader, FrameWriter, Inbound, DEFAULT_MAX_FRAME_LENGTH,
};
