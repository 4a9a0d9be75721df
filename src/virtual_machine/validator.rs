//! Pre-generation checks on a [`Program`].
//!
//! The generator trusts its input: it never re-checks symbol uniqueness or
//! section placement. [`validate`] is the gate that establishes those
//! properties, and [`assemble`] runs it before [`generate`].

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::generator::generate;
use crate::virtual_machine::program::{Argument, CodeElement, Program};
use std::collections::HashSet;

/// Checks that `program` is safe to hand to the generator.
///
/// - section names, data symbols and labels are each unique
/// - `Ascii` data items hold only ASCII characters
/// - sections, ordered by base address, do not overlap
/// - every `DataRef`/`LabelRef` names a defined symbol
/// - an argument is present exactly when the instruction takes an immediate
pub fn validate(program: &Program) -> Result<(), VMError> {
    let mut section_names = HashSet::new();
    let mut data_names = HashSet::new();
    for section in &program.sections {
        if !section_names.insert(section.name.as_str()) {
            return Err(VMError::DuplicateSymbol {
                symbol: section.name.clone(),
            });
        }
        for entry in &section.entries {
            if !data_names.insert(entry.name.as_str()) {
                return Err(VMError::DuplicateSymbol {
                    symbol: entry.name.clone(),
                });
            }
            if !entry.item.is_encodable() {
                return Err(VMError::NonAsciiText {
                    symbol: entry.name.clone(),
                });
            }
        }
    }

    check_overlaps(program)?;

    let mut labels = HashSet::new();
    for element in &program.code {
        if let CodeElement::Label(name) = element
            && !labels.insert(name.as_str())
        {
            return Err(VMError::DuplicateSymbol {
                symbol: name.clone(),
            });
        }
    }

    for element in &program.code {
        let CodeElement::Instruction {
            instruction,
            argument,
        } = element
        else {
            continue;
        };
        match (instruction.has_immediate(), argument) {
            (true, None) => {
                return Err(VMError::MissingArgument {
                    mnemonic: instruction.mnemonic(),
                });
            }
            (false, Some(_)) => {
                return Err(VMError::UnexpectedArgument {
                    mnemonic: instruction.mnemonic(),
                });
            }
            (true, Some(arg)) => check_references(arg, &data_names, &labels)?,
            (false, None) => {}
        }
    }

    Ok(())
}

/// Validates then generates the binary image.
pub fn assemble(program: &Program) -> Result<Vec<u8>, VMError> {
    validate(program)?;
    generate(program)
}

fn check_overlaps(program: &Program) -> Result<(), VMError> {
    let mut placed: Vec<(usize, usize, &str)> = program
        .sections
        .iter()
        .map(|s| (s.base_address as usize, s.byte_len(), s.name.as_str()))
        .collect();
    placed.sort_by_key(|(base, _, _)| *base);

    for pair in placed.windows(2) {
        let (base, len, name) = pair[0];
        let (next_base, _, next_name) = pair[1];
        if base + len > next_base {
            return Err(VMError::OverlappingSection {
                first: name.to_string(),
                second: next_name.to_string(),
            });
        }
    }
    Ok(())
}

fn check_references(
    arg: &Argument,
    data_names: &HashSet<&str>,
    labels: &HashSet<&str>,
) -> Result<(), VMError> {
    match arg {
        Argument::Literal(_) => Ok(()),
        Argument::DataRef(name) if data_names.contains(name.as_str()) => Ok(()),
        Argument::LabelRef(name) if labels.contains(name.as_str()) => Ok(()),
        Argument::DataRef(name) | Argument::LabelRef(name) => Err(VMError::UnresolvedSymbol {
            symbol: name.clone(),
        }),
        Argument::Arithmetic { left, right, .. } => {
            check_references(left, data_names, labels)?;
            check_references(right, data_names, labels)
        }
    }
}
