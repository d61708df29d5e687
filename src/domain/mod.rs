//! Domain layer - Pure business logic.

pub mod audio;
pub mod fleet;
pub mod jobs;
pub mod segments;
