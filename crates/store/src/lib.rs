//! AgentFlow durable checkpoint store.
//!
//! Implements [`pipeline::CheckpointStore`] on the local file system: one
//! `<run_id>.json` document per run, holding the latest
//! [`pipeline::Checkpoint`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File layout, atomic replacement and JSON encoding live
//! here. The [`pipeline`] crate sees only the `CheckpointStore` port.

mod file;

pub use file::FileCheckpointStore;
