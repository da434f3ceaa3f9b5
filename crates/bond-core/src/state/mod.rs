// # Checkpoint Store Implementations
//
// This module provides implementations of the CheckpointStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
