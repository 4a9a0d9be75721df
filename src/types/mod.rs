//! Shared binary encoding primitives.

pub mod encoding;
