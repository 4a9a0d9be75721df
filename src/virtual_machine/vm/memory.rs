use crate::virtual_machine::MEMORY_SIZE;
use crate::virtual_machine::errors::VMError;
use std::ops::Range;

/// How strictly memory accesses are checked.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MemoryGuard {
    /// Flat, unchecked memory: every address is readable and writable,
    /// including the loaded code, and word accesses wrap at 0xFFFF.
    #[default]
    Off,
    /// Faults on word accesses straddling the end of memory, on writes into the
    /// loaded code region, and on instruction fetches outside it.
    Strict,
}

/// The machine's single flat 64 KiB address space.
pub(super) struct Memory {
    bytes: Box<[u8]>,
    guard: MemoryGuard,
    code: Range<usize>,
}

impl Memory {
    pub(super) fn new(guard: MemoryGuard) -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE].into_boxed_slice(),
            guard,
            code: 0..0,
        }
    }

    /// Copies loader data into memory. The caller has already bounds-checked `data`.
    pub(super) fn load(&mut self, at: usize, data: &[u8]) {
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }

    pub(super) fn set_code_region(&mut self, code: Range<usize>) {
        self.code = code;
    }

    fn fault(address: u16, access: &'static str) -> VMError {
        VMError::MemoryFault { address, access }
    }

    /// Reads the opcode or immediate byte at `address`.
    pub(super) fn fetch_u8(&self, address: u16) -> Result<u8, VMError> {
        if self.guard == MemoryGuard::Strict && !self.code.contains(&(address as usize)) {
            return Err(Self::fault(address, "fetch outside code"));
        }
        Ok(self.bytes[address as usize])
    }

    pub(super) fn read_u16(&self, address: u16) -> Result<u16, VMError> {
        if self.guard == MemoryGuard::Strict && address == u16::MAX {
            return Err(Self::fault(address, "read past end of memory"));
        }
        Ok(self.peek_u16(address))
    }

    pub(super) fn write_u16(&mut self, address: u16, value: u16) -> Result<(), VMError> {
        if self.guard == MemoryGuard::Strict {
            if address == u16::MAX {
                return Err(Self::fault(address, "write past end of memory"));
            }
            let start = address as usize;
            if self.code.start < start + 2 && start < self.code.end {
                return Err(Self::fault(address, "write into code"));
            }
        }
        let [lo, hi] = value.to_le_bytes();
        self.bytes[address as usize] = lo;
        self.bytes[address.wrapping_add(1) as usize] = hi;
        Ok(())
    }

    /// Unchecked little-endian word read, wrapping at the end of memory.
    pub(super) fn peek_u16(&self, address: u16) -> u16 {
        u16::from_le_bytes([
            self.bytes[address as usize],
            self.bytes[address.wrapping_add(1) as usize],
        ])
    }

    /// Bytes in `start..start + len`, clamped to the end of memory.
    pub(super) fn slice(&self, start: u16, len: usize) -> &[u8] {
        let start = start as usize;
        let end = (start + len).min(MEMORY_SIZE);
        &self.bytes[start..end]
    }
}
