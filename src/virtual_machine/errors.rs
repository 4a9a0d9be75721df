use vmfc_derive::Error;

/// Errors raised while validating, generating, loading or executing a program.
///
/// All of them are fatal for the current run: nothing is retried and no
/// partial image or partial result is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Image does not start with the `VMFC` tag, or its header/bodies are malformed.
    #[error("invalid VMFC image: {reason}")]
    InvalidFormat { reason: String },
    /// A label or data reference names nothing defined in the program.
    #[error("unresolved symbol: {symbol}")]
    UnresolvedSymbol { symbol: String },
    /// Fetched byte has no entry in the instruction table.
    #[error("unimplemented opcode {opcode:#04x} at address {address:#06x}")]
    UnimplementedOpcode { opcode: u8, address: u16 },
    /// Two sections, data symbols or labels share a name.
    #[error("duplicate symbol: {symbol}")]
    DuplicateSymbol { symbol: String },
    /// Two sections claim the same load addresses.
    #[error("section {first} overlaps section {second}")]
    OverlappingSection { first: String, second: String },
    /// Mnemonic does not name an instruction.
    #[error("unknown mnemonic: {mnemonic}")]
    UnknownMnemonic { mnemonic: String },
    /// Instruction takes an immediate but none was given.
    #[error("{mnemonic} requires an argument")]
    MissingArgument { mnemonic: &'static str },
    /// Instruction takes no immediate but one was given.
    #[error("{mnemonic} does not take an argument")]
    UnexpectedArgument { mnemonic: &'static str },
    /// Image or one of its parts does not fit the 16-bit address space.
    #[error("image too large: {size} bytes")]
    ImageTooLarge { size: usize },
    /// A section descriptor would serialize to the `ENDS` terminator bytes.
    #[error("descriptor for section {section} collides with the ENDS terminator")]
    AmbiguousDescriptor { section: String },
    /// An ASCII data item holds characters outside 7-bit ASCII.
    #[error("data item {symbol} is not ASCII text")]
    NonAsciiText { symbol: String },
    /// Guarded memory access rejected (only raised under `MemoryGuard::Strict`).
    #[error("memory fault: {access} at {address:#06x}")]
    MemoryFault { address: u16, access: &'static str },
    /// `run` executed its configured number of steps without halting.
    #[error("step limit of {limit} reached before HALT")]
    StepLimitExceeded { limit: u64 },
}
