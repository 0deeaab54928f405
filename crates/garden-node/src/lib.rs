//! Garden Node - a chat peer on a TCP gossip mesh.
//!
//! Wires the replicated log to the network and a terminal:
//!
//! - **Config**: environment-driven [`NodeConfig`] and a persistent node id
//! - **TCP**: [`TcpTransport`], newline-delimited JSON frames between peers
//! - **Commands**: parsing of terminal input into coordinator inputs
//! - **Render**: plain-text channel walls with thread grouping
//!
//! # Example
//!
//! ```no_run
//! use garden_node::{NodeConfig, TcpTransport};
//! use garden_protocols::{Coordinator, CoordinatorConfig, FileStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let id = config.resolve_id()?;
//!     let (transport, events) =
//!         TcpTransport::new(id, config.listen_addr, config.bootstrap_peers.clone());
//!     let mut node = Coordinator::new(
//!         transport,
//!         FileStore::open(&config.data_file)?,
//!         CoordinatorConfig::default(),
//!     )?;
//!     node.start()?;
//!     let (_inputs, input_rx) = tokio::sync::mpsc::channel(16);
//!     node.run(input_rx, events).await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod render;
pub mod tcp;

pub use commands::{parse, Command, Outcome, Session};
pub use config::{load_or_create_id, NodeConfig};
pub use error::{Error, Result};
pub use render::{clock, Renderer};
pub use tcp::{Frame, PeerDirectory, TcpTransport};
