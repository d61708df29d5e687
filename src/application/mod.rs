//! Application layer - Generic services that use ports.

pub mod autoscaler;
pub mod catalog;
pub mod engine;
pub mod health;
pub mod scheduler;
pub mod worker;
