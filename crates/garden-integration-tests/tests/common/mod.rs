//! Multi-node simulation harness.
//!
//! A [`Mesh`] holds several coordinators on one [`MemoryHub`] and delivers
//! their queued transport events in an order chosen by a seeded RNG, so any
//! interleaving that fails can be replayed from its seed.

#![allow(dead_code)]

use garden_protocols::{
    Action, Coordinator, CoordinatorConfig, MemoryHub, MemoryStore, MemoryTransport,
    TransportEvent,
};
use garden_view::View;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedReceiver;

pub type Node = Coordinator<MemoryTransport, MemoryStore>;

struct Member {
    node: Node,
    events: UnboundedReceiver<TransportEvent>,
}

/// Coordinators sharing a hub, driven by hand.
pub struct Mesh {
    pub hub: MemoryHub,
    members: Vec<Member>,
    rng: StdRng,
}

impl Mesh {
    pub fn new(seed: u64) -> Self {
        Self {
            hub: MemoryHub::new(),
            members: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Add a node with its own empty store. Returns its index.
    pub fn add(&mut self, id: &str, config: CoordinatorConfig) -> usize {
        self.add_with_store(id, config, MemoryStore::new())
    }

    pub fn add_with_store(&mut self, id: &str, config: CoordinatorConfig, store: MemoryStore) -> usize {
        let (transport, events) = self.hub.join(id);
        let node = Coordinator::new(transport, store, config).expect("memory store never fails");
        self.members.push(Member { node, events });
        self.members.len() - 1
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.members[index].node
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.members[index].node
    }

    /// Post `text` to `channel` as node `index` at `time`.
    pub fn post(&mut self, index: usize, channel: &str, text: &str, time: u64) {
        let action = Action::Post {
            channel: channel.into(),
            text: text.into(),
        };
        self.node_mut(index)
            .author_at(action, time)
            .expect("valid post");
    }

    /// Deliver queued events in shuffled order until no node has any left.
    /// Returns how many events were delivered.
    pub fn settle(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut pool = Vec::new();
            for (index, member) in self.members.iter_mut().enumerate() {
                while let Ok(event) = member.events.try_recv() {
                    pool.push((index, event));
                }
            }
            if pool.is_empty() {
                return delivered;
            }
            pool.shuffle(&mut self.rng);
            for (index, event) in pool {
                self.members[index].node.handle(event);
                delivered += 1;
            }
        }
    }

    /// Every node's current view.
    pub fn views(&self) -> Vec<View> {
        self.members.iter().map(|m| (*m.node.view()).clone()).collect()
    }

    /// Whether all nodes project the same view.
    pub fn converged(&self) -> bool {
        let views = self.views();
        views.windows(2).all(|pair| pair[0] == pair[1])
    }
}
