//! Unified error types for waylay

use core::fmt;

/// all errors that can occur while installing or removing hooks
#[derive(Debug)]
pub enum HookError {
    // === resolution ===
    /// target function absent from the host symbol directory
    SymbolNotFound { name: String },

    // === shadow mapping ===
    /// writable alias could not be created for a code range
    MappingFailed { address: usize, len: usize },

    /// stub pool allocation failed
    AllocationFailed { size: usize },

    /// stub pool has no free slot left
    StubPoolExhausted,

    // === analysis ===
    /// target already contains a jump or trap before the patch boundary
    UnsafeTarget { name: String },

    /// target ended (or became undecodable) before a safe boundary was found
    AnalysisIncomplete { name: String },

    // === patching ===
    /// relative displacement between two addresses exceeds the i32 range
    DisplacementOutOfRange { from: usize, to: usize },

    // === lifecycle ===
    /// activate() called while hooks are already installed
    AlreadyActive,

    /// deactivate() called before activate()
    NotActive,

    /// the host barrier primitive reported failure
    BarrierFailed { reason: &'static str },

    /// drain loop exceeded the configured timeout with calls still in flight
    DrainTimedOut { name: String, in_flight: usize },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SymbolNotFound { name } => {
                write!(f, "symbol not found: {name}")
            }
            Self::MappingFailed { address, len } => {
                write!(f, "failed to map {len} bytes at {address:#x} writable")
            }
            Self::AllocationFailed { size } => {
                write!(f, "failed to allocate {size} bytes of stub memory")
            }
            Self::StubPoolExhausted => {
                write!(f, "no free origin stub slot left")
            }
            Self::UnsafeTarget { name } => {
                write!(f, "\"{name}\" is not a hooking virgin")
            }
            Self::AnalysisIncomplete { name } => {
                write!(f, "no safe patch boundary in \"{name}\"")
            }
            Self::DisplacementOutOfRange { from, to } => {
                write!(f, "redirect {from:#x} -> {to:#x} exceeds rel32 range")
            }
            Self::AlreadyActive => {
                write!(f, "hooks are already installed")
            }
            Self::NotActive => {
                write!(f, "hooks are not installed")
            }
            Self::BarrierFailed { reason } => {
                write!(f, "execution barrier failed: {reason}")
            }
            Self::DrainTimedOut { name, in_flight } => {
                write!(f, "drain of \"{name}\" timed out with {in_flight} calls in flight")
            }
        }
    }
}

impl std::error::Error for HookError {}

/// result type alias using HookError
pub type Result<T> = std::result::Result<T, HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unsafe_target() {
        let err = HookError::UnsafeTarget {
            name: "inode_permission".into(),
        };
        assert_eq!(err.to_string(), "\"inode_permission\" is not a hooking virgin");
    }

    #[test]
    fn test_display_displacement() {
        let err = HookError::DisplacementOutOfRange {
            from: 0x1000,
            to: 0x2000,
        };
        assert!(err.to_string().contains("0x1000"));
        assert!(err.to_string().contains("rel32"));
    }
}
