use std::fmt;

/// Initial value of `sp` and `fp` before the outermost frame is seeded.
///
/// Two bytes below the top of memory so the first push never touches the
/// last addressable byte.
pub const STACK_TOP: u16 = 0xFFFD;

/// The four 16-bit machine registers.
///
/// Outside the middle of a `CALL`/`RET`, `sp + fs == fp` holds for the
/// current frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    /// Instruction pointer: address of the next byte to fetch.
    pub ip: u16,
    /// Stack pointer: address of the current top-of-stack word.
    pub sp: u16,
    /// Frame pointer: address of the current frame's return-address slot.
    pub fp: u16,
    /// Frame size: bytes pushed in the current frame.
    pub fs: u16,
}

impl Registers {
    /// Registers of a freshly loaded machine: an empty outermost frame below
    /// [`STACK_TOP`] and `ip` at the entry point.
    pub fn at_entry(entry_point: u16) -> Self {
        let top = STACK_TOP.wrapping_sub(2);
        Self {
            ip: entry_point,
            sp: top,
            fp: top,
            fs: 0,
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ip={:#06x} sp={:#06x} fp={:#06x} fs={}",
            self.ip, self.sp, self.fp, self.fs
        )
    }
}
