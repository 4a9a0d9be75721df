//! Stack-based 16-bit virtual machine and its VMFC binary container.
//!
//! # Pipeline
//!
//! ```text
//! Program --validate--> Program --generate--> image bytes --load--> VM --run--> u16
//! ```
//!
//! # Architecture
//!
//! - **Memory**: one flat 64 KiB byte-addressed space shared by data, code and stack
//! - **Registers**: `ip`, `sp`, `fp`, `fs`, all 16-bit with wraparound
//! - **Stack**: grows downward from `0xFFFB`, one 16-bit little-endian word per slot
//! - **Calls**: frames record the caller's frame size and return address so a call of
//!   any arity leaves exactly one result on the caller's stack
//!
//! # Modules
//!
//! - [`errors`]: Error type shared by every stage
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`program`]: In-memory program representation (sections, code, arguments)
//! - [`validator`]: Symbol/section checks run before generation
//! - [`generator`]: Two-pass image generator
//! - [`image`]: Container header codec
//! - [`vm`]: Loader and interpreter

pub mod errors;
pub mod generator;
pub mod image;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod program;
pub mod validator;
pub mod vm;

/// Size of the addressable memory, in bytes.
pub const MEMORY_SIZE: usize = 0x10000;
