//! modelet-runtime: Inference server control plane
//!
//! This crate provides clients for the inference server that hosts the models:
//! - The `ModelServer` trait consumed by the state manager
//! - An HTTP client for servers speaking the V2 inference protocol

pub mod traits;
pub mod v2;

pub use traits::ModelServer;
pub use v2::V2Client;
