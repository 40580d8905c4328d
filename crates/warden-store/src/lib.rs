//! Warden Store - Durable JSON documents
//!
//! Four documents back the engine: the vetting role catalog, custom role
//! membership, incarceration records and per-member message statistics.
//! [`Documents`] is the typed entry point; [`DocumentStore`] is the seam for
//! backends ([`JsonFileStore`] in production, [`InMemoryStore`] in tests).

#![deny(unsafe_code)]

pub mod documents;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use documents::{Documents, RetryPolicy};
pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::{Document, DocumentKey, DocumentStore};
