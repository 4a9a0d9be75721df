//! Validated program representation handed to the generator.
//!
//! A [`Program`] is a list of named data [`Section`]s, each placed at a fixed
//! load address, plus a flat code stream of [`CodeElement`]s. Text parsing is
//! not done here: front ends build these values directly.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;

/// Word size of the machine, in bytes.
pub const WORD_SIZE: usize = 2;

/// One initial-data item inside a section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataItem {
    /// Raw bytes, copied as is.
    Bytes(Vec<u8>),
    /// 16-bit words, 2 bytes each.
    Words(Vec<u16>),
    /// Text packed two characters per word; odd lengths get a trailing zero byte.
    /// Only 7-bit ASCII is accepted, one byte per character.
    Ascii(String),
    /// Zero-filled space of the given byte count.
    Reserve(u16),
}

impl DataItem {
    /// True unless this is `Ascii` text containing non-ASCII characters.
    pub fn is_encodable(&self) -> bool {
        match self {
            DataItem::Ascii(text) => text.is_ascii(),
            _ => true,
        }
    }

    /// Returns the number of bytes this item occupies once encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            DataItem::Bytes(values) => values.len(),
            DataItem::Words(values) => values.len() * WORD_SIZE,
            DataItem::Ascii(text) => text.len().div_ceil(WORD_SIZE) * WORD_SIZE,
            DataItem::Reserve(count) => *count as usize,
        }
    }

    /// Appends the encoded bytes of this item to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DataItem::Bytes(values) => out.extend_from_slice(values),
            DataItem::Words(values) => {
                for w in values {
                    out.extend_from_slice(&w.to_le_bytes());
                }
            }
            DataItem::Ascii(text) => {
                out.extend_from_slice(text.as_bytes());
                if text.len() % WORD_SIZE != 0 {
                    out.push(0);
                }
            }
            DataItem::Reserve(count) => out.resize(out.len() + *count as usize, 0),
        }
    }
}

/// A named data item; the name is the symbol `DataRef` arguments resolve to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataEntry {
    pub name: String,
    pub item: DataItem,
}

/// A named block of initial data copied to `base_address` before execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub base_address: u16,
    pub entries: Vec<DataEntry>,
}

impl Section {
    pub fn new(name: impl Into<String>, base_address: u16) -> Self {
        Self {
            name: name.into(),
            base_address,
            entries: Vec::new(),
        }
    }

    /// Appends a named entry, builder style.
    pub fn with(mut self, name: impl Into<String>, item: DataItem) -> Self {
        self.entries.push(DataEntry {
            name: name.into(),
            item,
        });
        self
    }

    /// Total encoded size of the section body, in bytes.
    pub fn byte_len(&self) -> usize {
        self.entries.iter().map(|e| e.item.encoded_len()).sum()
    }
}

/// Binary operator of an [`Argument::Arithmetic`] expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
}

/// Operand of an instruction that carries an immediate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Argument {
    /// A literal 16-bit value.
    Literal(u16),
    /// Absolute runtime address of a data entry.
    DataRef(String),
    /// Absolute runtime address of a code label.
    LabelRef(String),
    /// `left op right`, evaluated left first, with 16-bit wraparound.
    Arithmetic {
        op: ArithOp,
        left: Box<Argument>,
        right: Box<Argument>,
    },
}

impl Argument {
    pub fn data(name: impl Into<String>) -> Self {
        Argument::DataRef(name.into())
    }

    pub fn label(name: impl Into<String>) -> Self {
        Argument::LabelRef(name.into())
    }

    pub fn add(left: Argument, right: Argument) -> Self {
        Argument::Arithmetic {
            op: ArithOp::Add,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn sub(left: Argument, right: Argument) -> Self {
        Argument::Arithmetic {
            op: ArithOp::Sub,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl From<u16> for Argument {
    fn from(value: u16) -> Self {
        Argument::Literal(value)
    }
}

/// One element of the code stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeElement {
    /// Marks the current code offset; emits no bytes.
    Label(String),
    /// An instruction and, for immediate-carrying opcodes, its argument.
    Instruction {
        instruction: Instruction,
        argument: Option<Argument>,
    },
}

impl CodeElement {
    pub fn label(name: impl Into<String>) -> Self {
        CodeElement::Label(name.into())
    }

    /// An instruction without an argument.
    pub fn op(instruction: Instruction) -> Self {
        CodeElement::Instruction {
            instruction,
            argument: None,
        }
    }

    /// An instruction with an argument.
    pub fn op_arg(instruction: Instruction, argument: impl Into<Argument>) -> Self {
        CodeElement::Instruction {
            instruction,
            argument: Some(argument.into()),
        }
    }

    /// Builds an instruction element from its mnemonic.
    pub fn parse_op(mnemonic: &str, argument: Option<Argument>) -> Result<Self, VMError> {
        Ok(CodeElement::Instruction {
            instruction: Instruction::from_mnemonic(mnemonic)?,
            argument,
        })
    }
}

/// Complete input to the generator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub sections: Vec<Section>,
    pub code: Vec<CodeElement>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_code(mut self, code: impl IntoIterator<Item = CodeElement>) -> Self {
        self.code.extend(code);
        self
    }

    /// Load address of the first code byte: right after the last declared section.
    pub fn base_code_address(&self) -> usize {
        self.sections
            .last()
            .map(|s| s.base_address as usize + s.byte_len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(item: &DataItem) -> Vec<u8> {
        let mut out = Vec::new();
        item.encode(&mut out);
        assert_eq!(out.len(), item.encoded_len());
        out
    }

    #[test]
    fn bytes_are_copied_verbatim() {
        assert_eq!(encode(&DataItem::Bytes(vec![1, 2, 3])), vec![1, 2, 3]);
    }

    #[test]
    fn words_are_little_endian() {
        assert_eq!(
            encode(&DataItem::Words(vec![0x1234, 0xABCD])),
            vec![0x34, 0x12, 0xCD, 0xAB]
        );
    }

    #[test]
    fn ascii_even_length_has_no_padding() {
        assert_eq!(encode(&DataItem::Ascii("Hi".into())), b"Hi".to_vec());
    }

    #[test]
    fn ascii_odd_length_is_zero_padded() {
        let bytes = encode(&DataItem::Ascii("abc".into()));
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes, vec![b'a', b'b', b'c', 0]);
    }

    #[test]
    fn only_ascii_text_is_encodable() {
        assert!(DataItem::Ascii("Hi!".into()).is_encodable());
        assert!(!DataItem::Ascii("é".into()).is_encodable());
        assert!(DataItem::Bytes(vec![0xC3, 0xA9]).is_encodable());
    }

    #[test]
    fn reserve_is_zero_filled() {
        assert_eq!(encode(&DataItem::Reserve(5)), vec![0; 5]);
        assert_eq!(encode(&DataItem::Reserve(0)), Vec::<u8>::new());
    }

    #[test]
    fn section_len_sums_entries() {
        let section = Section::new("data", 0x100)
            .with("a", DataItem::Bytes(vec![1]))
            .with("b", DataItem::Words(vec![1, 2]))
            .with("c", DataItem::Ascii("xyz".into()));
        assert_eq!(section.byte_len(), 1 + 4 + 4);
    }

    #[test]
    fn base_code_address_follows_last_section() {
        assert_eq!(Program::new().base_code_address(), 0);
        let program = Program::new()
            .with_section(Section::new("a", 0x10).with("x", DataItem::Reserve(4)))
            .with_section(Section::new("b", 0x40).with("y", DataItem::Words(vec![7])));
        assert_eq!(program.base_code_address(), 0x42);
    }

    #[test]
    fn parse_op_uses_mnemonic_table() {
        let el = CodeElement::parse_op("push", Some(Argument::Literal(1))).unwrap();
        assert_eq!(el, CodeElement::op_arg(Instruction::Push, 1u16));
        assert!(matches!(
            CodeElement::parse_op("BOGUS", None),
            Err(VMError::UnknownMnemonic { .. })
        ));
    }
}
