//! Origin stub slots
//!
//! Each hook needs a physical home for its origin stub: the copied prologue
//! plus a tail redirect back into the target. Slots are fixed-size,
//! NOP-filled executable regions carved from one mmap'd pool, assembled at
//! startup instead of relying on compile-time placeholder functions.

use crate::error::{HookError, Result};

/// bytes per origin stub slot
///
/// must hold the longest accepted prologue (the analysis window) plus the
/// tail redirect; 64 leaves headroom over the 32-byte window and keeps
/// slots cache-line aligned.
pub const STUB_SLOT_SIZE: usize = 64;

/// executable pool carved into fixed-size stub slots
pub struct StubPool {
    base: *mut u8,
    size: usize,
    next: usize,
    slots: usize,
}

impl StubPool {
    /// allocate a pool with room for `slots` stubs, anywhere
    pub fn with_capacity(slots: usize) -> Result<Self> {
        Self::map_pool(core::ptr::null_mut(), slots)
    }

    /// allocate a pool within rel32 range of `anchor`
    ///
    /// the tail redirect of every stub must reach back into its target, so
    /// the pool has to sit within +/-2GB of the code being hooked. Walks
    /// mmap hints outward from the anchor; falls back to an unconstrained
    /// mapping if nothing nearby is free.
    pub fn near(anchor: usize, slots: usize) -> Result<Self> {
        const STRIDE: usize = 0x400_0000; // 64MB

        for step in 1..=24usize {
            for candidate in [anchor.wrapping_add(step * STRIDE), anchor.wrapping_sub(step * STRIDE)] {
                let candidate = candidate & !0xFFFF;
                if candidate == 0 {
                    continue;
                }
                let pool = match Self::map_pool(candidate as *mut libc::c_void, slots) {
                    Ok(pool) => pool,
                    Err(_) => continue,
                };
                let distance = (pool.base as i64).wrapping_sub(anchor as i64).abs();
                if distance <= i32::MAX as i64 {
                    return Ok(pool);
                }
                // the kernel ignored the hint; drop and keep probing
            }
        }

        Self::with_capacity(slots)
    }

    #[cfg(unix)]
    fn map_pool(hint: *mut libc::c_void, slots: usize) -> Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let size = (slots * STUB_SLOT_SIZE + page - 1) & !(page - 1);

        // SAFETY: anonymous private mapping, unobservable until returned
        let base = unsafe {
            libc::mmap(
                hint,
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(HookError::AllocationFailed { size });
        }

        // inert placeholder content until a stub is built over it
        // SAFETY: base is valid for size bytes
        unsafe {
            core::ptr::write_bytes(base as *mut u8, 0x90, size);
        }

        Ok(Self {
            base: base as *mut u8,
            size,
            next: 0,
            slots,
        })
    }

    /// hand out the next free slot's address
    pub fn take_slot(&mut self) -> Result<usize> {
        if self.next >= self.slots {
            return Err(HookError::StubPoolExhausted);
        }
        let addr = self.base as usize + self.next * STUB_SLOT_SIZE;
        self.next += 1;
        Ok(addr)
    }

    /// pool base address
    pub fn base(&self) -> usize {
        self.base as usize
    }

    /// total pool size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// number of slots handed out so far
    pub fn used(&self) -> usize {
        self.next
    }

    /// whether an address falls inside the pool
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base as usize && addr < self.base as usize + self.size
    }
}

impl Drop for StubPool {
    fn drop(&mut self) {
        // SAFETY: base/size came from mmap in with_capacity
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

// SAFETY: the pool owns its mapping; slot addresses are only written through
// shadow mappings inside the execution barrier
unsafe impl Send for StubPool {}
unsafe impl Sync for StubPool {}
