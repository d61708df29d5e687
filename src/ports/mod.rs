//! Ports - trait definitions for every external collaborator.

pub mod clock;
pub mod detector;
pub mod fleet;
pub mod ledger;
pub mod processor;
pub mod queue;
pub mod storage;
