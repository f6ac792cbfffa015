//! storage layer for revdb
//!
//! this module provides the content-addressed store every database lives in.
//! The upper layers (sessions, migration, the statement executor) use this API
//! and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   (ref edits with CAS retry, working sets, commits, reads)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    refs     │       │   commit    │       │  manifest   │
//!  │ (branches)  │       │  (history)  │       │  (format)   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │    codec    │
//!                        │  (V1 / V2)  │
//!                        └─────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   chunks    │
//!                        │ (git blobs) │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use revdb::config::EngineConfig;
//! use revdb::storage::{BranchName, Row, RowKey, Store, TableName};
//!
//! let store = Store::in_memory(&EngineConfig::in_memory())?;
//! let main = BranchName::main();
//! let users = TableName::new("users")?;
//!
//! store.edit_working_set(&main, |root| {
//!     root.create_table(&users)?;
//!     root.insert_row(&users, Row::from_value(RowKey::generate(), json!({"name": "Alice"}))?)
//! })?;
//! let head = store.commit(&main, "add alice")?;
//! ```

mod chunks;
mod codec;
mod commit;
mod error;
mod manifest;
mod refs;
mod row;
mod store;
mod types;

// Re-export public API
pub use chunks::{ChunkStore, GitChunkStore, MemoryChunkStore, SwapResult};
pub use codec::{FormatCodec, FormatVersion, LooseJsonCodec, PackedCodec};
pub use commit::{AncestryStep, CommitInfo, CommitMeta, CommitReader, CommitRecord, HistoryIterator, PrefixMatch};
pub use error::{StorageError, StorageResult};
pub use manifest::{Manifest, StoreConfig};
pub use refs::RefTable;
pub use row::{check_columns, RootValue, Row, TableData, RESERVED_COLUMNS};
pub use store::{RefEdit, RootEditor, Snapshot, Store, StoreState};
pub use types::{
    BranchName, ChunkId, CommitId, InvalidNameError, RefName, RootId, RowKey, Signature, TableName, TagName,
};

pub(crate) use types::is_hex;
