pub mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod ice;
pub mod registry;
pub mod session;
pub mod types;

pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEvents, ConnectionFactory, PeerConnection,
    RemoteStream, WebRtcConnectionFactory,
};
pub use registry::Registry;
pub use session::PeerSession;
pub use types::{
    ConnectionState, IceCandidate, NegotiationState, ParticipantId, SdpKind, SessionDescription,
};
