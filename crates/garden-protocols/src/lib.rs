//! Garden Protocols - dispatch coordination and gossip replication.
//!
//! This crate connects the log and the view to the outside world:
//!
//! - [`Coordinator`]: the single entry point for local actions and inbound
//!   peer batches. It appends to the log, floods new messages onward
//!   (never back to their sender), persists, and publishes the rebuilt view.
//! - [`Transport`]: what the coordinator needs from the network layer.
//! - [`Store`]: load/save of the log blob ([`FileStore`], [`MemoryStore`]).
//! - [`MemoryHub`]: an in-process transport for tests and simulations.
//!
//! # Example
//!
//! ```rust,ignore
//! use garden_protocols::{Action, Coordinator, CoordinatorConfig, MemoryHub, MemoryStore};
//!
//! let hub = MemoryHub::new();
//! let (transport, events) = hub.join("u1");
//! let mut node = Coordinator::new(transport, MemoryStore::new(), CoordinatorConfig::default())?;
//! node.start()?;
//! node.author(Action::Post { channel: "#garden".into(), text: "hi".into() })?;
//! // drive `events` into `node.handle(..)`, or hand both to `node.run(..)`
//! ```

pub mod coordinator;
pub mod error;
pub mod memory;
pub mod store;
pub mod transport;

pub use coordinator::{
    now_ms, Action, Coordinator, CoordinatorConfig, Dispatched, InboundReport, Input,
};
pub use error::{Error, Result};
pub use memory::{MemoryHub, MemoryTransport};
pub use store::{FileStore, MemoryStore, Store};
pub use transport::{Origin, PeerId, Transport, TransportEvent};
