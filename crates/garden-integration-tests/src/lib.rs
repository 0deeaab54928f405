//! Garden integration tests.
//!
//! Everything lives under `tests/`: whole coordinators wired through a
//! `MemoryHub`, checked for convergence under shuffled delivery.
