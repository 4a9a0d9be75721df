//! VMFC library.
//!
//! Generates, loads and runs images for a small 16-bit stack machine.

pub mod types;
pub mod utils;
pub mod virtual_machine;
