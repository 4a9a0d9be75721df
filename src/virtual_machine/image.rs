//! VMFC container header.
//!
//! ```text
//! "VMFC"
//! { u16 file_pointer, u16 load_offset, u16 byte_length }   one per section
//! "ENDS"
//! u16 code_pointer, u16 code_length
//! section bodies, code body
//! ```
//!
//! The descriptor table has no count; readers peek 4 bytes before each
//! descriptor and stop at `ENDS`.

use crate::types::encoding::{Decode, DecodeError, Encode, read_bytes};
use crate::virtual_machine::MEMORY_SIZE;
use crate::virtual_machine::errors::VMError;
use vmfc_derive::BinaryCodec;

/// Leading tag of every image.
pub const MAGIC: [u8; 4] = *b"VMFC";
/// Terminator of the section descriptor table.
pub const SECTION_END: [u8; 4] = *b"ENDS";

const DESCRIPTOR_SIZE: usize = 6;

/// Where one section's body sits in the file and where it lands in memory.
#[derive(BinaryCodec, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub file_pointer: u16,
    pub load_offset: u16,
    pub byte_length: u16,
}

impl SectionDescriptor {
    /// True when the descriptor's first bytes read as the table terminator.
    pub fn collides_with_terminator(&self) -> bool {
        self.to_bytes()[..SECTION_END.len()] == SECTION_END
    }
}

/// Decoded image header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub sections: Vec<SectionDescriptor>,
    pub code_pointer: u16,
    pub code_length: u16,
}

impl Header {
    /// Header size in bytes for `sections` descriptors.
    pub const fn len_for(sections: usize) -> usize {
        MAGIC.len() + DESCRIPTOR_SIZE * sections + SECTION_END.len() + 2 + 2
    }

    /// Load address right after the last described section, or 0.
    pub fn base_code_address(&self) -> usize {
        self.sections
            .last()
            .map(|s| s.load_offset as usize + s.byte_length as usize)
            .unwrap_or(0)
    }

    /// Parses the header and checks that every body it points at lies inside `image`.
    pub fn parse(image: &[u8]) -> Result<Header, VMError> {
        let mut input = image;
        let magic = <[u8; 4]>::decode(&mut input).map_err(|e| truncated("magic", e))?;
        if magic != MAGIC {
            return Err(invalid(format!("bad magic {magic:02x?}")));
        }

        let mut sections = Vec::new();
        loop {
            let tag = input
                .get(..SECTION_END.len())
                .ok_or_else(|| invalid("descriptor table is not terminated".into()))?;
            if tag == SECTION_END.as_slice() {
                read_bytes(&mut input, SECTION_END.len())
                    .map_err(|e| truncated("terminator", e))?;
                break;
            }
            let descriptor =
                SectionDescriptor::decode(&mut input).map_err(|e| truncated("descriptor", e))?;
            sections.push(descriptor);
        }

        let code_pointer = u16::decode(&mut input).map_err(|e| truncated("code pointer", e))?;
        let code_length = u16::decode(&mut input).map_err(|e| truncated("code length", e))?;

        let header = Header {
            sections,
            code_pointer,
            code_length,
        };
        header.check_bounds(image.len())?;
        Ok(header)
    }

    fn check_bounds(&self, image_len: usize) -> Result<(), VMError> {
        for (i, s) in self.sections.iter().enumerate() {
            if s.file_pointer as usize + s.byte_length as usize > image_len {
                return Err(invalid(format!(
                    "section {i} body {:#06x}+{} runs past end of image ({image_len} bytes)",
                    s.file_pointer, s.byte_length
                )));
            }
            if s.load_offset as usize + s.byte_length as usize > MEMORY_SIZE {
                return Err(invalid(format!(
                    "section {i} at {:#06x}+{} does not fit in memory",
                    s.load_offset, s.byte_length
                )));
            }
        }
        if self.code_pointer as usize + self.code_length as usize > image_len {
            return Err(invalid(format!(
                "code body {:#06x}+{} runs past end of image ({image_len} bytes)",
                self.code_pointer, self.code_length
            )));
        }
        if self.base_code_address() + self.code_length as usize > MEMORY_SIZE {
            return Err(invalid(format!(
                "code of {} bytes at {:#06x} does not fit in memory",
                self.code_length,
                self.base_code_address()
            )));
        }
        Ok(())
    }
}

impl Encode for Header {
    fn encode(&self, out: &mut Vec<u8>) {
        MAGIC.encode(out);
        for s in &self.sections {
            s.encode(out);
        }
        SECTION_END.encode(out);
        self.code_pointer.encode(out);
        self.code_length.encode(out);
    }
}

fn invalid(reason: String) -> VMError {
    VMError::InvalidFormat { reason }
}

fn truncated(what: &str, err: DecodeError) -> VMError {
    invalid(format!("{what}: {}", err.as_str()))
}
