//! In-process transport: nodes registered on one [`MemoryHub`] exchange
//! batches over tokio channels.
//!
//! Links are explicit, so tests can build any topology (full mesh, chains)
//! and decide exactly when queued events are delivered.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{Origin, PeerId, Transport, TransportEvent};

#[derive(Debug, Default)]
struct HubState {
    nodes: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    /// Undirected links, stored with the smaller id first.
    links: BTreeSet<(PeerId, PeerId)>,
}

impl HubState {
    fn key(a: &str, b: &str) -> (PeerId, PeerId) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    fn linked(&self, a: &str, b: &str) -> bool {
        self.links.contains(&Self::key(a, b))
    }

    fn peers_of(&self, id: &str) -> Vec<PeerId> {
        self.links
            .iter()
            .filter_map(|(a, b)| {
                if a == id {
                    Some(b.clone())
                } else if b == id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn notify(&self, to: &str, event: TransportEvent) {
        if let Some(tx) = self.nodes.get(to) {
            if tx.send(event).is_err() {
                trace!(node = to, "Dropped event for closed node");
            }
        }
    }
}

/// Shared switchboard for [`MemoryTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| Error::Transport("memory hub poisoned".into()))
    }

    /// Register a node and get its transport plus the receiver its events arrive on.
    pub fn join(&self, id: &str) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.lock() {
            state.nodes.insert(id.to_string(), tx);
        }
        debug!(node = id, "Node joined memory hub");
        (
            MemoryTransport {
                id: id.to_string(),
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Link two registered nodes. Returns `false` if they were already linked.
    pub fn link(&self, a: &str, b: &str) -> Result<bool> {
        let mut state = self.lock()?;
        for id in [a, b] {
            if !state.nodes.contains_key(id) {
                return Err(Error::UnknownPeer(id.to_string()));
            }
        }
        if a == b || !state.links.insert(HubState::key(a, b)) {
            return Ok(false);
        }
        state.notify(a, TransportEvent::PeerJoined(b.to_string()));
        state.notify(b, TransportEvent::PeerJoined(a.to_string()));
        Ok(true)
    }

    /// Remove a link. Returns `false` if there was none.
    pub fn unlink(&self, a: &str, b: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.links.remove(&HubState::key(a, b)) {
            return Ok(false);
        }
        state.notify(a, TransportEvent::PeerLeft(b.to_string()));
        state.notify(b, TransportEvent::PeerLeft(a.to_string()));
        Ok(true)
    }

    /// Registered node ids.
    pub fn nodes(&self) -> Vec<PeerId> {
        let mut nodes: Vec<PeerId> = self
            .lock()
            .map(|state| state.nodes.keys().cloned().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes
    }
}

/// One node's handle on a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    id: PeerId,
    hub: MemoryHub,
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> &str {
        &self.id
    }

    fn peers(&self) -> Vec<PeerId> {
        self.hub
            .lock()
            .map(|state| state.peers_of(&self.id))
            .unwrap_or_default()
    }

    /// Link to every node currently on the hub.
    fn connect(&mut self) -> Result<()> {
        for node in self.hub.nodes() {
            if node != self.id {
                self.hub.link(&self.id, &node)?;
            }
        }
        Ok(())
    }

    fn broadcast(&mut self, lines: &[String], origin: &Origin) -> Result<()> {
        let state = self.hub.lock()?;
        for peer in state.peers_of(&self.id) {
            if origin.excludes(&peer) {
                continue;
            }
            state.notify(
                &peer,
                TransportEvent::Data {
                    from: self.id.clone(),
                    lines: lines.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn send_to(&mut self, peer: &str, lines: &[String]) -> Result<()> {
        let state = self.hub.lock()?;
        if !state.linked(&self.id, peer) {
            return Err(Error::UnknownPeer(peer.to_string()));
        }
        state.notify(
            peer,
            TransportEvent::Data {
                from: self.id.clone(),
                lines: lines.to_vec(),
            },
        );
        Ok(())
    }

    fn offer_to(&mut self, peer: &str) -> Result<()> {
        self.hub.link(&self.id, peer).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn link_announces_both_sides() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.join("a");
        let (_b, mut b_rx) = hub.join("b");

        assert!(hub.link("a", "b").unwrap());
        assert!(!hub.link("b", "a").unwrap());

        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerJoined("b".into())]);
        assert_eq!(drain(&mut b_rx), vec![TransportEvent::PeerJoined("a".into())]);
        assert_eq!(a.peers(), vec!["b".to_string()]);
    }

    #[test]
    fn broadcast_skips_origin() {
        let hub = MemoryHub::new();
        let (mut a, _a_rx) = hub.join("a");
        let (_b, mut b_rx) = hub.join("b");
        let (_c, mut c_rx) = hub.join("c");
        a.connect().unwrap();
        drain(&mut b_rx);
        drain(&mut c_rx);

        a.broadcast(&["x".into()], &Origin::Peer("b".into())).unwrap();

        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(
            drain(&mut c_rx),
            vec![TransportEvent::Data {
                from: "a".into(),
                lines: vec!["x".into()]
            }]
        );
    }

    #[test]
    fn send_to_requires_link() {
        let hub = MemoryHub::new();
        let (mut a, _a_rx) = hub.join("a");
        let (_b, _b_rx) = hub.join("b");

        assert!(matches!(a.send_to("b", &[]), Err(Error::UnknownPeer(_))));
        a.offer_to("b").unwrap();
        assert!(a.send_to("b", &[]).is_ok());
        assert!(matches!(a.offer_to("nobody"), Err(Error::UnknownPeer(_))));
    }

    #[test]
    fn unlink_announces_departure() {
        let hub = MemoryHub::new();
        let (_a, mut a_rx) = hub.join("a");
        let (_b, _b_rx) = hub.join("b");
        hub.link("a", "b").unwrap();
        drain(&mut a_rx);

        assert!(hub.unlink("b", "a").unwrap());
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::PeerLeft("b".into())]);
        assert!(!hub.unlink("a", "b").unwrap());
    }
}
