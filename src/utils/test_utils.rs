//! Builders shared by unit tests.

pub mod utils {
    use crate::virtual_machine::isa::Instruction;
    use crate::virtual_machine::program::{Argument, CodeElement, Program};
    use crate::virtual_machine::validator::assemble;
    use crate::virtual_machine::vm::{VM, VmConfig};

    pub fn push(value: u16) -> CodeElement {
        CodeElement::op_arg(Instruction::Push, Argument::Literal(value))
    }

    pub fn push_label(name: &str) -> CodeElement {
        CodeElement::op_arg(Instruction::Push, Argument::label(name))
    }

    pub fn push_data(name: &str) -> CodeElement {
        CodeElement::op_arg(Instruction::Push, Argument::data(name))
    }

    pub fn op(instruction: Instruction) -> CodeElement {
        CodeElement::op(instruction)
    }

    pub fn label(name: &str) -> CodeElement {
        CodeElement::label(name)
    }

    /// Program with no sections and the given code.
    pub fn code_only(code: impl IntoIterator<Item = CodeElement>) -> Program {
        Program::new().with_code(code)
    }

    /// Assembles and loads `program` with the default configuration.
    pub fn load(program: &Program) -> VM {
        load_with(program, VmConfig::default())
    }

    pub fn load_with(program: &Program, config: VmConfig) -> VM {
        let image = assemble(program).expect("program assembles");
        VM::load_with_config(&image, config).expect("image loads")
    }

    /// Assembles, loads and runs `program`, returning the halted stack top.
    pub fn run(program: &Program) -> u16 {
        load(program).run().expect("program halts")
    }
}
