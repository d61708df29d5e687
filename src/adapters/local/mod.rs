//! Local adapters for single-node runs against a plain directory tree.

pub mod fs;

pub use fs::FsStore;
