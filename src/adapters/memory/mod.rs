//! In-process adapters for tests and single-node runs.

mod fleet;
mod ledger;
mod queue;
mod store;

pub use fleet::MemoryFleet;
pub use ledger::MemoryLedger;
pub use queue::MemoryQueue;
pub use store::MemoryStore;
