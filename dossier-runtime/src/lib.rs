//! Dossier runtime
//!
//! Wires the core chat engine to a real environment: a sandboxed directory
//! for the file tools and a JSON-file conversation store, driven by a small
//! interactive binary.

pub mod files;
pub mod store;

pub use files::DiskFiles;
pub use store::JsonFileStore;
