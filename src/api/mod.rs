//! Upstream API: envelope, payload types and the HTTP client.

pub mod client;
pub mod envelope;
pub mod types;

pub use client::{Forwarded, Surface, UpstreamClient};
pub use envelope::Envelope;
