//! modelet-core: Core types for the modelet agent
//!
//! This crate provides the fundamental types used throughout modelet:
//! - Model version descriptors and replica state reports
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;

pub use config::*;
pub use error::*;
pub use model::*;
