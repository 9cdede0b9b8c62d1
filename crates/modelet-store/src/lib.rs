//! modelet-store: Model artifact staging
//!
//! This crate stages model artifacts where the inference server loads them from:
//! - The `ModelRepository` trait used around load/unload commands
//! - A local filesystem repository

pub mod repository;

pub use repository::{LocalRepository, ModelRepository};
