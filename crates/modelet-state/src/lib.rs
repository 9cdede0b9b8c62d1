//! modelet-state: Model residency on a single replica
//!
//! This crate decides which assigned models are held in server memory:
//! - Registry of tracked model versions and their memory
//! - Replica memory budget
//! - Local state manager with LRU eviction and lazy reloads
//! - Tick-ordered handling of scheduler commands

pub mod handler;
pub mod memory;
pub mod registry;
pub mod sequencer;
pub mod state_manager;

#[cfg(test)]
mod testing;

pub use handler::CommandHandler;
pub use memory::MemoryBudget;
pub use registry::ModelState;
pub use sequencer::CommandSequencer;
pub use state_manager::LocalStateManager;
