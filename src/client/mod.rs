//! HTTP client for the `/api/v1` surface, with a lazily filled handshake
//! cache.

mod client;
mod error;
mod handshake_cache;

pub use client::*;
pub use error::*;
pub use handshake_cache::*;
