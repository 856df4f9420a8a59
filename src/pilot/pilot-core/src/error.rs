use core::fmt;

use crate::control::MicroKind;

/// Host-visible failures of the core model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// A microcode entry point exists but has no implementation
    NotImplemented(MicroKind),
    /// A control word asked the datapath for something it cannot do
    MicrocodeFault(&'static str),
    /// The core did not halt within the given number of cycles
    CycleLimit(u64),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotImplemented(kind) => {
                write!(f, "microcode {:?} is not implemented", kind)
            }
            CoreError::MicrocodeFault(reason) => write!(f, "microcode fault: {}", reason),
            CoreError::CycleLimit(cycles) => write!(f, "no halt after {} cycles", cycles),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}
