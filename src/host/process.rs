//! Stock in-process host services for userland unix targets

#![cfg(unix)]

use std::ffi::CString;
use std::sync::Mutex;

use tracing::debug;

use super::{ExecutionBarrier, ShadowMapper, ShadowMapping, SymbolDirectory};
use crate::error::{HookError, Result};

/// in-process host: dlsym directory, serializing barrier, mprotect mapper
///
/// the barrier here serializes patch operations against each other; userland
/// has no true stop-the-world primitive, and on x86 a single aligned 5-byte
/// store servicing the redirect is the accepted compromise. Hosts that do
/// own such a primitive implement [`ExecutionBarrier`] over it instead.
pub struct ProcessHost {
    barrier: Mutex<()>,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self {
            barrier: Mutex::new(()),
        }
    }

    fn page_size() -> usize {
        // SAFETY: sysconf is always safe to call
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    /// page-aligned span covering `[address, address + len)`
    fn page_span(address: usize, len: usize) -> (usize, usize) {
        let page = Self::page_size();
        let start = address & !(page - 1);
        let end = (address + len + page - 1) & !(page - 1);
        (start, end - start)
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolDirectory for ProcessHost {
    fn lookup(&self, name: &str) -> Option<usize> {
        let cname = CString::new(name).ok()?;

        // SAFETY: cname is a valid NUL-terminated string; RTLD_DEFAULT
        // searches the whole image in load order
        let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
        if address.is_null() {
            None
        } else {
            Some(address as usize)
        }
    }
}

impl ExecutionBarrier for ProcessHost {
    fn run(&self, f: &mut dyn FnMut()) -> Result<()> {
        let _guard = self
            .barrier
            .lock()
            .map_err(|_| HookError::BarrierFailed {
                reason: "barrier lock poisoned",
            })?;
        f();
        Ok(())
    }
}

impl ShadowMapper for ProcessHost {
    fn map_writable(&self, address: usize, len: usize) -> Result<ShadowMapping> {
        let (start, span) = Self::page_span(address, len);

        // RWX rather than RW so code sharing the page keeps executing
        let rc = unsafe {
            libc::mprotect(
                start as *mut libc::c_void,
                span,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(HookError::MappingFailed { address, len });
        }

        debug!(address = format_args!("{address:#x}"), len, "mapped writable");
        Ok(ShadowMapping::new(address as *mut u8, len))
    }

    fn release(&self, mapping: ShadowMapping) {
        let (start, span) = Self::page_span(mapping.as_mut_ptr() as usize, mapping.len());

        // best effort; the span was writable a moment ago
        unsafe {
            libc::mprotect(
                start as *mut libc::c_void,
                span,
                libc::PROT_READ | libc::PROT_EXEC,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_span_intra_page() {
        let page = ProcessHost::page_size();
        let (start, span) = ProcessHost::page_span(page + 16, 8);
        assert_eq!(start, page);
        assert_eq!(span, page);
    }

    #[test]
    fn test_page_span_straddling() {
        let page = ProcessHost::page_size();
        let (start, span) = ProcessHost::page_span(page - 2, 8);
        assert_eq!(start, 0);
        assert_eq!(span, 2 * page);
    }

    #[test]
    fn test_lookup_known_libc_symbol() {
        let host = ProcessHost::new();
        assert!(host.lookup("malloc").is_some());
        assert!(host.lookup("definitely_not_a_symbol_9f2d").is_none());
    }

    #[test]
    fn test_barrier_runs_callback() {
        let host = ProcessHost::new();
        let mut ran = false;
        host.run(&mut || ran = true).unwrap();
        assert!(ran);
    }
}
