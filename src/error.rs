use std::fmt;

/// Everything that can go wrong while setting up or using a [`crate::Heap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The memory source could not provide `size` bytes for the arena.
    ArenaAcquisition { size: usize },
    /// The requested arena cannot hold even one usable block.
    ArenaTooSmall { size: usize, minimum: usize },
    /// A request for zero bytes.
    ZeroSizedRequest,
    /// No free block can hold `requested` bytes.
    OutOfMemory { requested: usize },
    /// The block directory is corrupted at the header found at `offset`.
    InvariantViolation { offset: usize, reason: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ArenaAcquisition { size } => {
                write!(f, "could not acquire an arena of {size:#x} bytes")
            }
            Error::ArenaTooSmall { size, minimum } => {
                write!(f, "arena of {size:#x} bytes is smaller than the minimum of {minimum:#x}")
            }
            Error::ZeroSizedRequest => f.write_str("zero sized allocation request"),
            Error::OutOfMemory { requested } => {
                write!(f, "no free block can hold {requested:#x} bytes")
            }
            Error::InvariantViolation { offset, reason } => {
                write!(f, "corrupted block directory at offset {offset:#x}: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
