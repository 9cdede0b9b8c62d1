//! modelet-cache: Residency tracking
//!
//! This crate tracks which models are resident in inference server memory:
//! - A recency-ordered residency cache with two-phase eviction
//! - Lazily created per-model locks
//! - Transactions that keep eviction and reload of one model apart

pub mod cache;
pub mod locks;
pub mod transaction;

pub use cache::ResidencyCache;
pub use locks::LockArena;
pub use transaction::{CacheTransactionManager, ItemLock};
