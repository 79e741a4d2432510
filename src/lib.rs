//! vc-sfu
//!
//! Selective forwarding unit for real-time audio, video and screen-share.
//! Terminates one `RTCPeerConnection` per room participant and forwards
//! received RTP packets to every other participant in the same room;
//! it does not decode, transcode, record or adapt media.

pub mod config;
pub mod error;
pub mod message;
pub mod pli;
pub mod registry;
pub mod room;
pub mod session;
pub mod signaling;
pub mod track;
pub mod ws;
