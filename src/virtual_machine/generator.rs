//! Two-pass generator turning a [`Program`] into a VMFC image.
//!
//! Pass one lays out sections and encodes the code stream, leaving a 2-byte
//! placeholder for every immediate and recording it in a patch table. Pass two
//! resolves each recorded [`Argument`] once every label and data offset is
//! known, so forward references need no special handling.
//!
//! Input is expected to have passed [`validate`](super::validator::validate);
//! the generator still reports unresolved symbols and oversized images rather
//! than producing a corrupt image.

use crate::types::encoding::Encode;
use crate::virtual_machine::MEMORY_SIZE;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::{Header, SectionDescriptor};
use crate::virtual_machine::program::{ArithOp, Argument, CodeElement, Program};
use std::collections::HashMap;

/// Placeholder awaiting its resolved immediate.
struct Patch<'a> {
    /// Byte offset of the placeholder inside the code body.
    offset: usize,
    argument: &'a Argument,
}

/// Symbol addresses known after layout.
struct Symbols<'a> {
    base_code_address: usize,
    labels: HashMap<&'a str, usize>,
    data: HashMap<&'a str, usize>,
}

impl Symbols<'_> {
    fn resolve(&self, arg: &Argument) -> Result<u16, VMError> {
        match arg {
            Argument::Literal(v) => Ok(*v),
            Argument::LabelRef(name) => self
                .labels
                .get(name.as_str())
                .map(|offset| (self.base_code_address + offset) as u16)
                .ok_or_else(|| unresolved(name)),
            Argument::DataRef(name) => self
                .data
                .get(name.as_str())
                .map(|addr| *addr as u16)
                .ok_or_else(|| unresolved(name)),
            Argument::Arithmetic { op, left, right } => {
                let l = self.resolve(left)?;
                let r = self.resolve(right)?;
                Ok(match op {
                    ArithOp::Add => l.wrapping_add(r),
                    ArithOp::Sub => l.wrapping_sub(r),
                })
            }
        }
    }
}

fn unresolved(name: &str) -> VMError {
    VMError::UnresolvedSymbol {
        symbol: name.to_string(),
    }
}

fn fit_u16(value: usize) -> Result<u16, VMError> {
    u16::try_from(value).map_err(|_| VMError::ImageTooLarge { size: value })
}

/// Produces the complete image for `program`.
pub fn generate(program: &Program) -> Result<Vec<u8>, VMError> {
    let header_len = Header::len_for(program.sections.len());

    // Section layout: file order is declaration order.
    let mut descriptors = Vec::with_capacity(program.sections.len());
    let mut bodies = Vec::new();
    let mut data = HashMap::new();
    for section in &program.sections {
        let base = section.base_address as usize;
        let start = bodies.len();
        for entry in &section.entries {
            if !entry.item.is_encodable() {
                return Err(VMError::NonAsciiText {
                    symbol: entry.name.clone(),
                });
            }
            data.insert(entry.name.as_str(), base + (bodies.len() - start));
            entry.item.encode(&mut bodies);
        }
        let byte_length = bodies.len() - start;
        if base + byte_length > MEMORY_SIZE {
            return Err(VMError::ImageTooLarge {
                size: base + byte_length,
            });
        }
        let descriptor = SectionDescriptor {
            file_pointer: fit_u16(header_len + start)?,
            load_offset: section.base_address,
            byte_length: fit_u16(byte_length)?,
        };
        if descriptor.collides_with_terminator() {
            return Err(VMError::AmbiguousDescriptor {
                section: section.name.clone(),
            });
        }
        crate::debug!(
            "section {} -> file {:#06x}, load {:#06x}, {} bytes",
            section.name,
            descriptor.file_pointer,
            descriptor.load_offset,
            descriptor.byte_length
        );
        descriptors.push(descriptor);
    }

    // Code body with placeholders.
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    let mut patches = Vec::new();
    for element in &program.code {
        match element {
            CodeElement::Label(name) => {
                labels.insert(name.as_str(), code.len());
            }
            CodeElement::Instruction {
                instruction,
                argument,
            } => {
                code.push(instruction.opcode());
                if instruction.has_immediate() {
                    let argument = argument.as_ref().ok_or(VMError::MissingArgument {
                        mnemonic: instruction.mnemonic(),
                    })?;
                    patches.push(Patch {
                        offset: code.len(),
                        argument,
                    });
                    code.extend_from_slice(&[0, 0]);
                }
            }
        }
    }

    let base_code_address = program.base_code_address();
    if base_code_address + code.len() > MEMORY_SIZE {
        return Err(VMError::ImageTooLarge {
            size: base_code_address + code.len(),
        });
    }

    let symbols = Symbols {
        base_code_address,
        labels,
        data,
    };
    for patch in &patches {
        let value = symbols.resolve(patch.argument)?;
        code[patch.offset..patch.offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    let header = Header {
        sections: descriptors,
        code_pointer: fit_u16(header_len + bodies.len())?,
        code_length: fit_u16(code.len())?,
    };

    let mut image = Vec::with_capacity(header_len + bodies.len() + code.len());
    header.encode(&mut image);
    image.extend_from_slice(&bodies);
    image.extend_from_slice(&code);
    crate::debug!(
        "generated {} byte image, code at {:#06x} ({} bytes, {} patches)",
        image.len(),
        base_code_address,
        code.len(),
        patches.len()
    );
    Ok(image)
}
