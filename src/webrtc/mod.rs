//! Native peer-connection backend
//!
//! Implements [`crate::platform::PeerConnector`] and
//! [`crate::platform::PeerLink`] on webrtc-rs. Transport, ICE, DTLS and SRTP
//! are entirely the library's; this module only wires its callbacks to the
//! gathering trigger and the remote-track channel.

pub mod peer;
mod tap;
mod tracks;

pub use peer::{RtcPeer, RtcPeerConnector};
