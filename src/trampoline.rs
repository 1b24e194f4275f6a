//! Origin stub construction
//!
//! The origin stub is this engine's "call the original" path: the first
//! `patch_len` pristine bytes of the target copied into a stub slot,
//! followed by a redirect back into the untouched remainder of the target.
//! Once built, calling the stub is behaviorally identical to calling the
//! unpatched function.

use crate::arch::{RelativeRedirect, REDIRECT_SIZE};
use crate::error::Result;
use crate::host::ShadowMapping;
use crate::stub::STUB_SLOT_SIZE;

/// copy the target's prologue into the stub and append the tail redirect
///
/// must run before the target itself is patched, since it reads pristine
/// bytes. The stub is not yet reachable by any thread, so no barrier is
/// needed for these writes.
pub(crate) fn build_origin_stub(
    target: usize,
    origin: usize,
    origin_map: &ShadowMapping,
    patch_len: usize,
) -> Result<()> {
    debug_assert!(patch_len >= REDIRECT_SIZE);
    debug_assert!(patch_len + REDIRECT_SIZE <= STUB_SLOT_SIZE);

    // tail redirect: stub + L jumps to target + L, validated before any write
    let tail = RelativeRedirect::new(origin + patch_len, target + patch_len)?;

    // SAFETY: target is a resolved live function readable for patch_len
    // bytes; the stub slot behind origin_map is writable and at least
    // patch_len + REDIRECT_SIZE long
    unsafe {
        core::ptr::copy_nonoverlapping(target as *const u8, origin_map.as_mut_ptr(), patch_len);
        tail.write_to(origin_map.as_mut_ptr().add(patch_len));
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::stub::StubPool;

    #[test]
    fn test_stub_holds_prologue_and_tail() {
        // fake "target" lives in the same pool so the tail redirect is
        // trivially within rel32 range
        let target_bytes: [u8; 8] = [0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x28];

        let mut pool = StubPool::with_capacity(2).unwrap();
        let target = pool.take_slot().unwrap();
        // SAFETY: the slot is inside our own fresh RWX mapping
        unsafe {
            core::ptr::copy_nonoverlapping(
                target_bytes.as_ptr(),
                target as *mut u8,
                target_bytes.len(),
            );
        }

        let origin = pool.take_slot().unwrap();
        let origin_map = ShadowMapping::new(origin as *mut u8, STUB_SLOT_SIZE);

        build_origin_stub(target, origin, &origin_map, 8).unwrap();

        // SAFETY: origin is inside our own pool
        let stub = unsafe { core::slice::from_raw_parts(origin as *const u8, 13) };
        assert_eq!(&stub[..8], &target_bytes[..]);
        assert_eq!(stub[8], 0xE9);

        // tail must land on target + 8
        let disp = i32::from_le_bytes(stub[9..13].try_into().unwrap());
        let landing = (origin + 8)
            .wrapping_add(REDIRECT_SIZE)
            .wrapping_add(disp as usize);
        assert_eq!(landing, target + 8);
    }
}
