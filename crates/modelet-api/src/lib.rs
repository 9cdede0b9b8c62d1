//! modelet-api: REST API server for modelet
//!
//! This crate provides the REST API for interacting with a replica:
//! - Scheduler load/unload commands
//! - Ensure-load ahead of inference requests
//! - Model residency, memory and status introspection

pub mod rest;

pub use rest::create_router;
