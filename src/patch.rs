//! Patch application and removal
//!
//! Both entry points run exclusively inside the host execution barrier:
//! mutating a live instruction stream while other threads may be fetching
//! from it is undefined behavior, and the barrier is the only thing that
//! rules it out. Neither path can fail - everything fallible (displacement
//! validation, mapping) happened during analysis.

use crate::descriptor::HookDescriptor;

/// write the redirect at the target entry, sending callers to the handler
///
/// skips descriptors that are not eligible (resolution or analysis failed).
pub(crate) fn install(descriptor: &HookDescriptor) {
    // eligibility was marked by the 0 -> 1 usage transition pre-barrier
    if descriptor.usage() != 1 {
        return;
    }

    let state = descriptor.patch_state();
    if let (Some(target_map), Some(redirect)) = (state.target_map.as_ref(), state.redirect) {
        // SAFETY: inside the barrier, no other thread executes; target_map
        // is a writable alias of the target entry
        unsafe {
            redirect.write_to(target_map.as_mut_ptr());
        }
    }
}

/// copy the saved original bytes back over the redirect
///
/// the origin stub's head is a verbatim copy of the pristine prologue, so
/// restoring from it is bit-for-bit.
pub(crate) fn remove(descriptor: &HookDescriptor) {
    if descriptor.usage() == 0 {
        return;
    }

    let patch_len = descriptor.patch_len();
    let origin = match descriptor.origin() {
        Some(origin) => origin,
        None => return,
    };

    let state = descriptor.patch_state();
    if let Some(target_map) = state.target_map.as_ref() {
        // SAFETY: inside the barrier; origin holds patch_len pristine bytes,
        // target_map is a writable alias of the patched entry
        unsafe {
            core::ptr::copy_nonoverlapping(origin as *const u8, target_map.as_mut_ptr(), patch_len);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::arch::RelativeRedirect;
    use crate::descriptor::{HookRegistration, PatchState};
    use crate::host::ShadowMapping;

    #[test]
    fn test_install_skips_ineligible_descriptor() {
        // never prepared: usage stays 0, install must be a no-op
        let descriptor = HookDescriptor::new(HookRegistration::new("skipped", 0x1000));
        install(&descriptor);
        remove(&descriptor);
    }

    #[test]
    fn test_install_and_remove_round_trip() {
        let mut target: [u8; 8] = [0x89, 0xF8, 0x83, 0xC0, 0x01, 0xC3, 0x90, 0x90];
        let mut origin: [u8; 16] = [0x90; 16];
        origin[..5].copy_from_slice(&[0x89, 0xF8, 0x83, 0xC0, 0x01]);

        let target_addr = target.as_mut_ptr() as usize;
        let handler_addr = target_addr + 0x100;

        let descriptor = HookDescriptor::new(HookRegistration::new("round_trip", handler_addr));
        descriptor.set_prepared(
            target_addr,
            origin.as_ptr() as usize,
            5,
            PatchState {
                target_map: Some(ShadowMapping::new(target.as_mut_ptr(), 8)),
                origin_map: None,
                redirect: Some(RelativeRedirect::new(target_addr, handler_addr).unwrap()),
            },
        );

        install(&descriptor);
        assert_eq!(target[0], 0xE9);
        assert_eq!(target[5], 0xC3);

        remove(&descriptor);
        assert_eq!(target, [0x89, 0xF8, 0x83, 0xC0, 0x01, 0xC3, 0x90, 0x90]);
    }
}
