//! The content-addressed node/edge graph store.
//!
//! Everything durable lives in one embedded SQLite database: nodes and
//! edges (§3), blobs keyed by digest, named refs, slugs, and append-only
//! per-kind logs. [`store::SqliteStore`] is the single entry point; callers
//! open or begin a [`store::Tx`] and pass it to every write.

pub mod canonical;
pub mod error;
pub mod model;
pub mod payloads;
pub mod schema;
pub mod store;

pub use canonical::NodeId;
pub use error::{ErrorKind, Result, StorageError};
pub use model::{Edge, EdgeType, Node, NodeKind};
pub use store::{SqliteStore, Tx};
