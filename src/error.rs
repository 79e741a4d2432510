//! Error taxonomy for the signaling/media coordination engine: transport,
//! protocol, SDP, forwarding, fan-out and internal faults. None of these
//! are ever serialized back to a remote peer as a structured message —
//! recovery is observed by the client via transport closure or
//! renegotiation timeout.

use thiserror::Error;

/// Errors raised while handling signaling or media-forwarding operations.
#[derive(Debug, Error)]
pub enum SfuError {
    /// The signaling transport failed to read or write a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound message was malformed, missing a required field, or had
    /// the wrong shape for its declared `event`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer connection SDP operation (set remote/local description,
    /// create offer/answer, add ICE candidate) failed.
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// Forwarding a remote track's RTP packets to a local track failed.
    #[error("forwarding error: {0}")]
    Forwarding(String),

    /// Attaching a forwarded track to a peer's connection during fan-out
    /// failed; only that peer is affected.
    #[error("fan-out error: {0}")]
    FanOut(String),

    /// Room lookup failed for a client that expected one to exist.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Client lookup failed within a room that expected one to exist.
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    /// An unexpected internal fault (should never surface to a caller in
    /// practice; recorded so a top-level recovery boundary can log it).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<webrtc::Error> for SfuError {
    fn from(err: webrtc::Error) -> Self {
        Self::Sdp(err.to_string())
    }
}

impl From<serde_json::Error> for SfuError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
