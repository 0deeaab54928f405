//! The transport seam.
//!
//! The coordinator never touches sockets. It talks to a [`Transport`] that
//! sends encoded messages, and receives [`TransportEvent`]s on a channel the
//! transport feeds. Implementations: [`crate::memory::MemoryTransport`] for
//! tests, and the TCP transport in `garden-node`.

use crate::error::Result;

/// Stable peer identifier.
pub type PeerId = String;

/// Where a batch came from. Broadcasts skip the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Authored on this node: send to every connected peer.
    Local,
    /// Received from a peer: send to every connected peer but this one.
    Peer(PeerId),
}

impl Origin {
    /// Whether a broadcast from this origin should skip `peer`.
    pub fn excludes(&self, peer: &str) -> bool {
        matches!(self, Self::Peer(origin) if origin == peer)
    }
}

/// Something that happened at the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connection came up.
    PeerJoined(PeerId),
    /// A peer connection went away.
    PeerLeft(PeerId),
    /// One or more encoded messages arrived.
    Data { from: PeerId, lines: Vec<String> },
}

/// Peer connectivity as seen by the coordinator.
///
/// All methods are non-blocking: implementations queue outgoing data and do
/// their I/O elsewhere. Failures are reported, never retried here.
pub trait Transport {
    /// This node's stable id.
    fn local_id(&self) -> &str;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;

    /// Start accepting and dialing connections.
    fn connect(&mut self) -> Result<()>;

    /// Send encoded messages to every connected peer the origin does not exclude.
    fn broadcast(&mut self, lines: &[String], origin: &Origin) -> Result<()>;

    /// Send encoded messages to one peer.
    fn send_to(&mut self, peer: &str, lines: &[String]) -> Result<()>;

    /// Open a connection to a peer, named by its id.
    ///
    /// Implementations that learn peer addresses may also accept an address
    /// for a peer whose id is not known yet. An id the transport cannot reach
    /// is [`crate::Error::UnknownPeer`].
    fn offer_to(&mut self, peer: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_excludes_only_the_sender() {
        assert!(!Origin::Local.excludes("a"));
        assert!(Origin::Peer("a".into()).excludes("a"));
        assert!(!Origin::Peer("a".into()).excludes("b"));
    }
}
