//! conveyor-state — the sweeping output store.
//!
//! Steps publish named artifacts into a scope (step, stage, or pipeline of
//! one execution); later steps resolve them by walking their own ancestry
//! nearest-first.
//!
//! # Architecture
//!
//! Values are JSON-serialized. Keys render as
//! `{execution_id}/{level}/{owner}/{name}` with `%` and `/` percent-escaped
//! inside each component, so every artifact of one execution shares a
//! prefix. `RedbOutputStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod scope;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use scope::{ExecutionScope, OutputScope, ScopeLevel};
pub use store::{MemoryOutputStore, OutputEntry, OutputStoreExt, RedbOutputStore, SweepingOutputStore};
