//! Host collaborator interfaces
//!
//! The engine never touches the host image directly. Three services are
//! supplied by the embedding host: a symbol directory covering every loaded
//! function, a global execution barrier that freezes all other threads while
//! a callback runs, and a memory subsystem that can produce a writable view
//! over otherwise immutable code pages.
//!
//! [`ProcessHost`] is the stock in-process implementation for userland unix
//! targets; embedding hosts with stronger primitives (a kernel's
//! stop_machine, a VMM's vCPU pause) implement the traits themselves.

mod process;

#[cfg(unix)]
pub use process::ProcessHost;

use crate::error::Result;

/// maps a textual name to a live address for every function in the image
pub trait SymbolDirectory {
    /// exact-string lookup; `None` if the symbol is not loaded
    fn lookup(&self, name: &str) -> Option<usize>;
}

/// suspends every other thread of control while the callback runs
///
/// all instruction-stream mutation happens inside [`ExecutionBarrier::run`];
/// this is the sole mechanism that makes patching a live instruction stream
/// defined behavior.
pub trait ExecutionBarrier {
    fn run(&self, f: &mut dyn FnMut()) -> Result<()>;
}

/// produces writable aliases over code ranges
pub trait ShadowMapper {
    /// map `[address, address + len)` writable
    ///
    /// the returned alias points at the same bytes, offset to match the
    /// original intra-page offset. A failing call must not leave a partial
    /// mapping behind.
    fn map_writable(&self, address: usize, len: usize) -> Result<ShadowMapping>;

    /// release an alias previously returned by [`ShadowMapper::map_writable`]
    ///
    /// called exactly once per mapping, only after the hook that used it is
    /// quiescent.
    fn release(&self, mapping: ShadowMapping);
}

/// everything the lifecycle controller needs from the embedding host
pub trait Host: SymbolDirectory + ExecutionBarrier + ShadowMapper {}

impl<T: SymbolDirectory + ExecutionBarrier + ShadowMapper> Host for T {}

/// a writable view over a range of code bytes
///
/// plain token with no drop glue: release timing is owned by the lifecycle
/// controller, which hands the token back to [`ShadowMapper::release`] once
/// the hook it belongs to has drained.
#[derive(Debug)]
pub struct ShadowMapping {
    writable: *mut u8,
    len: usize,
}

impl ShadowMapping {
    /// build a mapping token; used by [`ShadowMapper`] implementations
    pub fn new(writable: *mut u8, len: usize) -> Self {
        Self { writable, len }
    }

    /// the writable alias pointer
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.writable
    }

    /// length of the aliased range
    pub fn len(&self) -> usize {
        self.len
    }

    /// whether the aliased range is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: the alias is only dereferenced inside the execution barrier, which
// excludes every other thread; the token itself is just an address + length.
unsafe impl Send for ShadowMapping {}
unsafe impl Sync for ShadowMapping {}
