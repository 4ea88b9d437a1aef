//! Infrastructure adapters and runtime bootstrap.

pub mod client;
pub mod error;
pub mod http;
pub mod prismic;
pub mod telemetry;
