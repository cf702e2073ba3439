//! Core document model for Sofa
//!
//! Sofa is an embedded document store with multi-version documents and
//! secondary indexes. This crate holds the pieces every other crate agrees on:
//!
//! - [`DocumentRevision`] and [`DocumentBody`]: a JSON document at one revision
//! - [`Datastore`]: the pull-style interface the index engine consumes
//! - [`Change`]: one entry of the change feed, ordered by sequence
//! - [`MemoryDatastore`]: an in-process datastore with linear revisions
//!
//! The index engine never writes documents. It only asks a [`Datastore`] for
//! the current sequence, the changes since a checkpoint, and revisions by id.

pub mod datastore;
pub mod document;
pub mod error;
pub mod memory;

pub use datastore::{Change, Datastore, Sequence};
pub use document::{DocumentBody, DocumentRevision};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDatastore;
