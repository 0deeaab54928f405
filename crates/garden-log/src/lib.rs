//! Garden Log - atomic chat messages and the replicated set that holds them.
//!
//! Every participant keeps a [`ReplicatedLog`]: a grow-only set (G-Set CRDT)
//! of [`Message`]s. Messages are immutable facts with a canonical JSON
//! encoding; two messages are the same message iff their encodings are
//! byte-identical, so retransmissions collapse on [`ReplicatedLog::append`].
//!
//! # Example
//!
//! ```
//! use garden_log::{Message, ReplicatedLog};
//!
//! let mut log = ReplicatedLog::new();
//! let hi = Message::post("#garden", "u1", 1000, "hi").unwrap();
//!
//! assert!(log.append(hi.clone()));
//! assert!(!log.append(hi)); // already present
//!
//! let mut restored = ReplicatedLog::new();
//! let report = restored.hydrate(&log.to_blob());
//! assert_eq!(report.loaded, 1);
//! ```

pub mod codec;
pub mod error;
pub mod log;

pub use codec::{decode, encode, Body, Kind, Message, MessageId, ReplyTo};
pub use error::{DecodeError, HydrationError, Result};
pub use log::{HydrateReport, ReplicatedLog};
