//! Garden View - replaying the log into something a renderer can draw.
//!
//! The [`View`] is a pure function of the log's member set: [`project`]
//! sorts the members by the shared total order and folds them into channel
//! walls, membership and nicknames. Two peers holding the same set always
//! produce the same view, whatever order the messages arrived in.
//!
//! Thread grouping (which posts get an author label or a time-gap marker) is
//! not stored in the view. It is recomputed per render pass by
//! [`Grouping`], which threads an explicit [`GroupState`] accumulator over
//! the ordered wall.

pub mod projector;
pub mod thread;
pub mod view;

pub use projector::{project, project_messages};
pub use thread::{GroupState, Grouping, Line, Mark, DEFAULT_GROUP_GAP_MS};
pub use view::{Channel, Post, View};
