#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("class read error")]
    ClassRead(#[source] ClassReadError),
    #[error("class write error")]
    ClassWrite(#[source] ClassWriteError),
}

impl From<ClassReadError> for Error {
    fn from(value: ClassReadError) -> Self {
        Error::ClassRead(value)
    }
}

impl From<ClassWriteError> for Error {
    fn from(value: ClassWriteError) -> Self {
        Error::ClassWrite(value)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ClassReadError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid magic 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool tag {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("invalid attribute {0}")]
    InvalidAttribute(String),
    #[error("invalid opcode 0x{opcode:02x} at {offset}")]
    InvalidOpcode {
        /// The opcode that caused the error.
        opcode: u8,
        /// Offset into the byte sequence where the error occurred.
        offset: usize,
    },
    #[error("branch target {target} is not an instruction boundary")]
    InvalidBranchTarget { target: i64 },
    #[error("switch at {offset} lists {entries} entries but only {remaining} bytes remain")]
    SwitchTooLarge {
        offset: usize,
        entries: u64,
        remaining: usize,
    },
    #[error("modified utf8 error: {0}")]
    Utf8Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassWriteError {
    #[error("constant pool overflow ({0} entries)")]
    ConstantPoolOverflow(usize),
    #[error("invalid constant pool")]
    InvalidConstantPool,
    #[error("label {0} is referenced but not present in {1}")]
    MissingLabel(usize, String),
    #[error("jump offset {offset} out of range in {method}")]
    JumpOverflow { offset: i64, method: String },
    #[error("method {0} is too large")]
    CodeTooLarge(String),
    #[error("subroutines are not supported ({0})")]
    UnsupportedSubroutine(String),
    #[error("frame computation error: {0}")]
    FrameComputation(String),
    #[error("type resolution failed")]
    TypeResolution(#[from] TypeResolveError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeResolveError {
    #[error("class {0} cannot be resolved")]
    ClassNotFound(String),
    #[error("cyclic class hierarchy at {0}")]
    CyclicHierarchy(String),
}
