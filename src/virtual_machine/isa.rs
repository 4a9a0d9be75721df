//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction list and hands it to a callback macro, so the opcode
//! enum here and the dispatch table in [`vm`](super::vm) are generated from the
//! same source and cannot drift apart.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - [`Instruction::from_mnemonic`] / `FromStr` for encoding by name
//!
//! # Bytecode Format
//!
//! - Opcode: 1 byte
//! - Immediate (`PUSH`, `CPS`, `SMV` only): 2 bytes, little-endian
//!
//! Opcodes are assigned densely from `0x01` in table order; `0x00` and
//! everything past the last opcode are unimplemented.

use crate::virtual_machine::errors::VMError;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

/// Size in bytes of an inline immediate operand.
pub const IMMEDIATE_SIZE: usize = 2;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack / register pushes
            // =========================
            /// PUSH imm16 ; push imm16
            Push = 0x01, "PUSH" => [value: Imm16],
            /// PIP ; push ip
            Pip = 0x02, "PIP" => [],
            /// PSP ; push sp
            Psp = 0x03, "PSP" => [],
            /// PMS ; pop address, push the word stored at address
            Pms = 0x04, "PMS" => [],
            /// PMF ; pop address, pop offset, copy the word at address to fp + offset
            Pmf = 0x05, "PMF" => [],
            /// CPS imm16 ; push the word at fp - imm16
            Cps = 0x06, "CPS" => [offset: Imm16],
            // =========================
            // Arithmetic / bitwise
            // =========================
            /// ADD ; pop a, pop b, push a + b
            Add = 0x07, "ADD" => [],
            /// INC ; word at sp += 1 (in place)
            Inc = 0x08, "INC" => [],
            /// DEC ; word at sp -= 1 (in place)
            Dec = 0x09, "DEC" => [],
            /// MUL ; pop a, pop b, push a * b
            Mul = 0x0A, "MUL" => [],
            /// SUB ; pop a, pop b, push a - b
            Sub = 0x0B, "SUB" => [],
            /// LSF ; pop shift, pop value, push value << shift
            Lsf = 0x0C, "LSF" => [],
            /// RSF ; pop shift, pop value, push value >> shift
            Rsf = 0x0D, "RSF" => [],
            /// AND ; pop a, pop b, push a & b
            And = 0x0E, "AND" => [],
            /// OR ; pop a, pop b, push a | b
            Or = 0x0F, "OR" => [],
            /// XOR ; pop a, pop b, push a ^ b
            Xor = 0x10, "XOR" => [],
            /// NOT ; pop a, push !a
            Not = 0x11, "NOT" => [],
            // =========================
            // Calling convention
            // =========================
            /// CALL ; pop target, pop n, pop n args, open a new frame, jump to target
            Call = 0x12, "CALL" => [],
            /// RET ; close the current frame, push the callee's stack top to the caller
            Ret = 0x13, "RET" => [],
            // =========================
            // Register adjustment
            // =========================
            /// ISP ; sp += 2
            Isp = 0x14, "ISP" => [],
            /// DSP ; sp -= 2
            Dsp = 0x15, "DSP" => [],
            /// IIP ; ip += 2
            Iip = 0x16, "IIP" => [],
            /// DIP ; ip -= 2
            Dip = 0x17, "DIP" => [],
            /// SSP ; pop value, sp = value
            Ssp = 0x18, "SSP" => [],
            // =========================
            // Control
            // =========================
            /// HALT ; stop; the word at sp is the program result
            Halt = 0x19, "HALT" => [],
            /// DBG ; dump the stack window to the debug log
            Dbg = 0x1A, "DBG" => [],
            /// NOP ; no operation
            Nop = 0x1B, "NOP" => [],
            // =========================
            // Branching
            // =========================
            /// JNZ ; pop target, pop test, jump if test != 0
            Jnz = 0x1C, "JNZ" => [],
            /// JZ ; pop target, pop test, jump if test == 0
            Jz = 0x1D, "JZ" => [],
            /// JMP ; pop target, jump
            Jmp = 0x1E, "JMP" => [],
            /// JEQ ; pop target, pop cmp, pop test, jump if test == cmp
            Jeq = 0x1F, "JEQ" => [],
            /// JNE ; pop target, pop cmp, pop test, jump if test != cmp
            Jne = 0x20, "JNE" => [],
            /// JGT ; pop target, pop cmp, pop test, jump if test > cmp
            Jgt = 0x21, "JGT" => [],
            /// JLT ; pop target, pop cmp, pop test, jump if test < cmp
            Jlt = 0x22, "JLT" => [],
            /// JGE ; pop target, pop cmp, pop test, jump if test >= cmp
            Jge = 0x23, "JGE" => [],
            /// JLE ; pop target, pop cmp, pop test, jump if test <= cmp
            Jle = 0x24, "JLE" => [],
            // =========================
            // Storing
            // =========================
            /// MSM ; pop address, copy the (new) stack top to address without popping it
            Msm = 0x25, "MSM" => [],
            /// SMV imm16 ; pop value, store it at fp - imm16
            Smv = 0x26, "SMV" => [offset: Imm16],
            /// CPOS ; pop offset, push the word at fp - offset
            Cpos = 0x27, "CPOS" => [],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::UnimplementedOpcode {
                        opcode: value,
                        address: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction, in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name ),* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns true if a 2-byte immediate follows the opcode byte.
            pub const fn has_immediate(&self) -> bool {
                match self {
                    $( Instruction::$name => define_instructions!(@has_imm $( $kind ),*), )*
                }
            }
        }
    };

    (@has_imm) => { false };
    (@has_imm $( $kind:ident ),+) => { true };
}

for_each_instruction!(define_instructions);

/// Static description of one instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InstructionDescriptor {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub has_immediate: bool,
}

impl Instruction {
    /// Returns the raw opcode byte.
    pub const fn opcode(&self) -> u8 {
        *self as u8
    }

    /// Returns the number of bytes this instruction occupies in the code body.
    pub const fn encoded_len(&self) -> usize {
        if self.has_immediate() {
            1 + IMMEDIATE_SIZE
        } else {
            1
        }
    }

    pub const fn descriptor(&self) -> InstructionDescriptor {
        InstructionDescriptor {
            mnemonic: self.mnemonic(),
            opcode: self.opcode(),
            has_immediate: self.has_immediate(),
        }
    }

    /// Looks an instruction up by mnemonic, ignoring ASCII case.
    pub fn from_mnemonic(name: &str) -> Result<Self, VMError> {
        mnemonic_table()
            .get(name.to_ascii_uppercase().as_str())
            .copied()
            .ok_or_else(|| VMError::UnknownMnemonic {
                mnemonic: name.to_string(),
            })
    }
}

/// Uppercase mnemonic -> instruction, built once on first use.
fn mnemonic_table() -> &'static HashMap<&'static str, Instruction> {
    static TABLE: OnceLock<HashMap<&'static str, Instruction>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Instruction::ALL
            .iter()
            .map(|instr| (instr.mnemonic(), *instr))
            .collect()
    })
}

impl FromStr for Instruction {
    type Err = VMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Instruction::from_mnemonic(s)
    }
}
