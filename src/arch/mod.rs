//! Architecture abstraction for patching
//!
//! The controller only needs two capabilities from an instruction set:
//! walking instruction lengths with a {jump, trap, return, other}
//! classification, and encoding the redirect that gets written at a patch
//! point. Both live behind the [`Architecture`] trait so another backend
//! could be substituted without touching the lifecycle controller.

mod x64;
mod x86;

pub use x64::X64;
pub use x86::X86;

use crate::decode::BoundaryScan;
use crate::error::{HookError, Result};

/// native architecture type alias based on target
#[cfg(target_arch = "x86_64")]
pub type NativeArch = X64;

#[cfg(target_arch = "x86")]
pub type NativeArch = X86;

/// size of the relative redirect instruction (E9 rel32)
pub const REDIRECT_SIZE: usize = 5;

/// architecture capability trait
pub trait Architecture: Sized + 'static {
    /// minimum bytes a patch must cover - the redirect size
    const REDIRECT_SIZE: usize = REDIRECT_SIZE;

    /// scan `bytes` (read from `address`) for a safe patch boundary
    /// covering at least `required` bytes
    fn scan_patch_region(address: usize, bytes: &[u8], required: usize) -> BoundaryScan;
}

/// a 5-byte unconditional relative jump, validated at construction
///
/// isolates every displacement computation behind one constructor so the
/// byte-level writes elsewhere only ever copy a pre-validated encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeRedirect {
    bytes: [u8; REDIRECT_SIZE],
}

impl RelativeRedirect {
    /// encode a jump placed at `from` that lands on `to`
    ///
    /// the displacement is relative to the end of the redirect itself,
    /// `to - (from + 5)`, and must fit a signed 32-bit value.
    pub fn new(from: usize, to: usize) -> Result<Self> {
        let disp = (to as i64)
            .wrapping_sub(from as i64)
            .wrapping_sub(REDIRECT_SIZE as i64);

        if disp < i64::from(i32::MIN) || disp > i64::from(i32::MAX) {
            return Err(HookError::DisplacementOutOfRange { from, to });
        }

        let mut bytes = [0u8; REDIRECT_SIZE];
        bytes[0] = 0xE9;
        bytes[1..].copy_from_slice(&(disp as i32).to_le_bytes());
        Ok(Self { bytes })
    }

    /// the encoded instruction bytes
    pub fn bytes(&self) -> &[u8; REDIRECT_SIZE] {
        &self.bytes
    }

    /// write the redirect through a writable alias
    ///
    /// # Safety
    /// `dst` must be valid for `REDIRECT_SIZE` writable bytes, and no other
    /// thread may be fetching instructions from the aliased region (the
    /// caller runs this inside the host execution barrier).
    pub unsafe fn write_to(&self, dst: *mut u8) {
        // SAFETY: caller guarantees dst validity and exclusion
        unsafe {
            core::ptr::copy_nonoverlapping(self.bytes.as_ptr(), dst, REDIRECT_SIZE);
        }
    }
}
