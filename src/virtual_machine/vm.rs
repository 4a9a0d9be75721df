//! Stack-machine interpreter.
//!
//! One [`VM`] owns one 64 KiB memory and four 16-bit registers. Loading an
//! image copies its sections and code into memory; [`VM::step`] executes one
//! instruction and [`VM::run`] loops until `HALT`.

mod memory;
mod registers;
#[cfg(test)]
mod tests;

pub use memory::MemoryGuard;
pub use registers::{Registers, STACK_TOP};

use crate::virtual_machine::MEMORY_SIZE;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::image::Header;
use crate::virtual_machine::isa::Instruction;
use crate::{debug, info};
use memory::Memory;

/// Bytes shown on either side of `sp` by [`VM::stack_dump`].
const STACK_WINDOW: u16 = 10;

macro_rules! exec_vm {
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    let instr_name = $instr.mnemonic();
                    $( let $field = exec_vm!(@read $vm, $kind)?; )*
                    $vm.$handler(instr_name, $( $field ),*)
                }
            ),*
        }
    }};

    // Decode a u16 immediate (little-endian, 2 bytes)
    (@read $vm:ident, Imm16) => {{
        $vm.fetch_u16()
    }};
}

/// Runtime options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VmConfig {
    pub guard: MemoryGuard,
    /// Upper bound on executed instructions for [`VM::run`]; `None` runs until `HALT`.
    pub max_steps: Option<u64>,
}

/// Stack-machine virtual machine.
pub struct VM {
    memory: Memory,
    regs: Registers,
    entry_point: u16,
    halted: bool,
    steps: u64,
    config: VmConfig,
}

impl VM {
    /// Creates a machine with zeroed memory and nothing loaded.
    pub fn new(config: VmConfig) -> Self {
        Self {
            memory: Memory::new(config.guard),
            regs: Registers::at_entry(0),
            entry_point: 0,
            halted: false,
            steps: 0,
            config,
        }
    }

    /// Loads `image` into a fresh machine with the default configuration.
    pub fn load(image: &[u8]) -> Result<Self, VMError> {
        Self::load_with_config(image, VmConfig::default())
    }

    /// Loads `image` into a fresh machine.
    pub fn load_with_config(image: &[u8], config: VmConfig) -> Result<Self, VMError> {
        let mut vm = Self::new(config);
        vm.load_image(image)?;
        Ok(vm)
    }

    /// Copies `image` into memory and resets the registers to its entry point.
    ///
    /// The whole header is parsed and bounds-checked first; a malformed image
    /// leaves memory and registers untouched.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), VMError> {
        let header = Header::parse(image)?;
        debug!(
            "loading {} sections, code {:#06x}+{}",
            header.sections.len(),
            header.code_pointer,
            header.code_length
        );

        for s in header.sections.iter().filter(|s| s.byte_length > 0) {
            let body = &image[s.file_pointer as usize..][..s.byte_length as usize];
            self.memory.load(s.load_offset as usize, body);
        }

        let base = header.base_code_address();
        let code = &image[header.code_pointer as usize..][..header.code_length as usize];
        self.memory.load(base, code);
        self.memory.set_code_region(base..base + code.len());

        // `base` is MEMORY_SIZE only when there is no code to run.
        self.entry_point = (base % MEMORY_SIZE) as u16;
        self.regs = Registers::at_entry(self.entry_point);
        self.halted = false;
        self.steps = 0;
        debug!("entry point {:#06x}, {}", self.entry_point, self.regs);
        Ok(())
    }

    /// Executes one instruction. Returns true once `HALT` has executed.
    ///
    /// After `HALT` further calls do nothing and keep returning true.
    pub fn step(&mut self) -> Result<bool, VMError> {
        if self.halted {
            return Ok(true);
        }
        let address = self.regs.ip;
        let opcode = self.fetch_u8()?;
        let instruction = Instruction::try_from(opcode)
            .map_err(|_| VMError::UnimplementedOpcode { opcode, address })?;
        self.steps += 1;
        self.exec(instruction)?;
        Ok(self.halted)
    }

    /// Steps until `HALT` and returns the word on top of the stack.
    pub fn run(&mut self) -> Result<u16, VMError> {
        while !self.halted {
            if let Some(limit) = self.config.max_steps
                && self.steps >= limit
            {
                return Err(VMError::StepLimitExceeded { limit });
            }
            self.step()?;
        }
        Ok(self.top())
    }

    /// Current register values.
    pub fn registers(&self) -> Registers {
        self.regs
    }

    /// Address execution started from.
    pub fn entry_point(&self) -> u16 {
        self.entry_point
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Instructions executed since the image was loaded.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Word at `address`, read without guard checks.
    pub fn read_u16(&self, address: u16) -> u16 {
        self.memory.peek_u16(address)
    }

    /// Word at `sp`.
    pub fn top(&self) -> u16 {
        self.memory.peek_u16(self.regs.sp)
    }

    /// Words within 10 bytes of `sp`, one per line, with `SP`/`FP` markers.
    pub fn stack_dump(&self) -> String {
        let sp = self.regs.sp as usize;
        let low = sp.saturating_sub(STACK_WINDOW as usize);
        let high = (sp + STACK_WINDOW as usize).min(MEMORY_SIZE - 2);

        (low..=high)
            .step_by(2)
            .map(|addr| {
                let marker = if addr == sp {
                    "  <- SP"
                } else if addr == self.regs.fp as usize {
                    "  <- FP"
                } else {
                    ""
                };
                format!(
                    "{addr:#06x}: {:#06x}{marker}\n",
                    self.memory.peek_u16(addr as u16)
                )
            })
            .collect()
    }

    /// Logs [`stack_dump`](Self::stack_dump) at debug level.
    pub fn debug_stack(&self) {
        debug!("{}", self.regs);
        for line in self.stack_dump().lines() {
            debug!("{line}");
        }
    }

    /// Hex view of `len` bytes from `start`, 16 bytes per row.
    pub fn memory_dump(&self, start: u16, len: usize) -> String {
        self.memory
            .slice(start, len)
            .chunks(16)
            .enumerate()
            .map(|(row, chunk)| {
                let bytes: String = chunk.iter().map(|b| format!(" {b:02x}")).collect();
                format!("{:04x}:{bytes}\n", start as usize + row * 16)
            })
            .collect()
    }

    fn fetch_u8(&mut self) -> Result<u8, VMError> {
        let byte = self.memory.fetch_u8(self.regs.ip)?;
        self.regs.ip = self.regs.ip.wrapping_add(1);
        Ok(byte)
    }

    fn fetch_u16(&mut self) -> Result<u16, VMError> {
        let lo = self.fetch_u8()?;
        let hi = self.fetch_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn push(&mut self, value: u16) -> Result<(), VMError> {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        self.memory.write_u16(self.regs.sp, value)?;
        self.regs.fs = self.regs.fs.wrapping_add(2);
        Ok(())
    }

    fn pop(&mut self) -> Result<u16, VMError> {
        let value = self.memory.read_u16(self.regs.sp)?;
        self.regs.sp = self.regs.sp.wrapping_add(2);
        self.regs.fs = self.regs.fs.wrapping_sub(2);
        Ok(value)
    }

    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                Push => op_push(value: Imm16),
                Pip => op_pip(),
                Psp => op_psp(),
                Pms => op_pms(),
                Pmf => op_pmf(),
                Cps => op_cps(offset: Imm16),

                Add => op_add(),
                Inc => op_inc(),
                Dec => op_dec(),
                Mul => op_mul(),
                Sub => op_sub(),
                Lsf => op_lsf(),
                Rsf => op_rsf(),
                And => op_and(),
                Or => op_or(),
                Xor => op_xor(),
                Not => op_not(),

                Call => op_call(),
                Ret => op_ret(),

                Isp => op_isp(),
                Dsp => op_dsp(),
                Iip => op_iip(),
                Dip => op_dip(),
                Ssp => op_ssp(),

                Halt => op_halt(),
                Dbg => op_dbg(),
                Nop => op_nop(),

                Jnz => op_jnz(),
                Jz => op_jz(),
                Jmp => op_jmp(),
                Jeq => op_jeq(),
                Jne => op_jne(),
                Jgt => op_jgt(),
                Jlt => op_jlt(),
                Jge => op_jge(),
                Jle => op_jle(),

                Msm => op_msm(),
                Smv => op_smv(offset: Imm16),
                Cpos => op_cpos(),
            }
        }
    }
}

// ==========================
// Stack / register pushes
// ==========================
impl VM {
    fn op_push(&mut self, _instr: &'static str, value: u16) -> Result<(), VMError> {
        self.push(value)
    }

    fn op_pip(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.push(self.regs.ip)
    }

    fn op_psp(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.push(self.regs.sp)
    }

    fn op_pms(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let address = self.pop()?;
        let value = self.memory.read_u16(address)?;
        self.push(value)
    }

    fn op_pmf(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let address = self.pop()?;
        let offset = self.pop()?;
        let value = self.memory.read_u16(address)?;
        self.memory
            .write_u16(self.regs.fp.wrapping_add(offset), value)
    }

    fn op_cps(&mut self, _instr: &'static str, offset: u16) -> Result<(), VMError> {
        let value = self.memory.read_u16(self.regs.fp.wrapping_sub(offset))?;
        self.push(value)
    }

    fn op_cpos(&mut self, instr: &'static str) -> Result<(), VMError> {
        let offset = self.pop()?;
        self.op_cps(instr, offset)
    }
}

// ==========================
// Arithmetic / bitwise
// ==========================
impl VM {
    /// Pops `a` then `b` and pushes `f(a, b)`.
    fn binary_op(&mut self, f: impl FnOnce(u16, u16) -> u16) -> Result<(), VMError> {
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(f(a, b))
    }

    /// Pops the shift amount, then the value, and pushes `f(value, shift)`.
    fn shift_op(&mut self, f: impl FnOnce(u16, u32) -> Option<u16>) -> Result<(), VMError> {
        let shift = self.pop()?;
        let value = self.pop()?;
        self.push(f(value, shift as u32).unwrap_or(0))
    }

    fn update_top(&mut self, f: impl FnOnce(u16) -> u16) -> Result<(), VMError> {
        let value = self.memory.read_u16(self.regs.sp)?;
        self.memory.write_u16(self.regs.sp, f(value))
    }

    fn op_add(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(u16::wrapping_add)
    }

    fn op_sub(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(u16::wrapping_sub)
    }

    fn op_mul(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(u16::wrapping_mul)
    }

    fn op_lsf(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.shift_op(u16::checked_shl)
    }

    fn op_rsf(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.shift_op(u16::checked_shr)
    }

    fn op_and(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(|a, b| a & b)
    }

    fn op_or(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(|a, b| a | b)
    }

    fn op_xor(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.binary_op(|a, b| a ^ b)
    }

    fn op_not(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let a = self.pop()?;
        self.push(!a)
    }

    fn op_inc(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.update_top(|v| v.wrapping_add(1))
    }

    fn op_dec(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.update_top(|v| v.wrapping_sub(1))
    }
}

// ==========================
// Calling convention
// ==========================
impl VM {
    /// Stack before, addresses decreasing downward:
    ///
    /// ```text
    /// | caller values |
    /// | arg0 .. argN  |
    /// | n args        |
    /// | target        | < sp
    /// ```
    ///
    /// and after:
    ///
    /// ```text
    /// | caller values |
    /// | saved fs      |
    /// | return addr   | < fp
    /// | arg0 .. argN  | < sp at argN
    /// ```
    fn op_call(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let return_address = self.regs.ip;
        let target = self.pop()?;
        let n_args = self.pop()?;
        let mut args = Vec::with_capacity(n_args as usize);
        for _ in 0..n_args {
            args.push(self.pop()?);
        }

        self.push(self.regs.fs)?;
        self.push(return_address)?;
        self.regs.fp = self.regs.sp;
        self.regs.fs = 0;

        for arg in args.into_iter().rev() {
            self.push(arg)?;
        }
        self.regs.ip = target;
        Ok(())
    }

    fn op_ret(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let return_value = self.memory.read_u16(self.regs.sp)?;
        let return_address = self.memory.read_u16(self.regs.fp)?;
        let saved_fs = self.memory.read_u16(self.regs.fp.wrapping_add(2))?;

        self.regs.sp = self.regs.fp.wrapping_add(4);
        self.regs.fp = self.regs.sp.wrapping_add(saved_fs);
        self.regs.fs = saved_fs;
        self.regs.ip = return_address;

        self.push(return_value)
    }
}

// ==========================
// Register adjustment
// ==========================
impl VM {
    fn op_isp(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.sp = self.regs.sp.wrapping_add(2);
        Ok(())
    }

    fn op_dsp(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        Ok(())
    }

    fn op_iip(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.ip = self.regs.ip.wrapping_add(2);
        Ok(())
    }

    fn op_dip(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.ip = self.regs.ip.wrapping_sub(2);
        Ok(())
    }

    fn op_ssp(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.sp = self.pop()?;
        Ok(())
    }
}

// ==========================
// Control
// ==========================
impl VM {
    fn op_halt(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.halted = true;
        info!(
            "halted after {} steps, result {:#06x}",
            self.steps,
            self.top()
        );
        Ok(())
    }

    fn op_dbg(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.debug_stack();
        Ok(())
    }

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        Ok(())
    }
}

// ==========================
// Branching
// ==========================
impl VM {
    /// Pops the target, then the test value, and jumps if `cond(test)`.
    fn branch_unary(&mut self, cond: impl FnOnce(u16) -> bool) -> Result<(), VMError> {
        let target = self.pop()?;
        let test = self.pop()?;
        if cond(test) {
            self.regs.ip = target;
        }
        Ok(())
    }

    /// Pops the target, the comparison value, then the test value, and jumps
    /// if `cond(test, cmp)`. Comparisons are unsigned.
    fn branch_compare(&mut self, cond: impl FnOnce(u16, u16) -> bool) -> Result<(), VMError> {
        let target = self.pop()?;
        let cmp = self.pop()?;
        let test = self.pop()?;
        if cond(test, cmp) {
            self.regs.ip = target;
        }
        Ok(())
    }

    fn op_jmp(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.regs.ip = self.pop()?;
        Ok(())
    }

    fn op_jnz(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_unary(|test| test != 0)
    }

    fn op_jz(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_unary(|test| test == 0)
    }

    fn op_jeq(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test == cmp)
    }

    fn op_jne(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test != cmp)
    }

    fn op_jgt(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test > cmp)
    }

    fn op_jlt(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test < cmp)
    }

    fn op_jge(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test >= cmp)
    }

    fn op_jle(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.branch_compare(|test, cmp| test <= cmp)
    }
}

// ==========================
// Storing
// ==========================
impl VM {
    fn op_msm(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let address = self.pop()?;
        let value = self.memory.read_u16(self.regs.sp)?;
        self.memory.write_u16(address, value)
    }

    fn op_smv(&mut self, _instr: &'static str, offset: u16) -> Result<(), VMError> {
        let value = self.pop()?;
        self.memory
            .write_u16(self.regs.fp.wrapping_sub(offset), value)
    }
}
