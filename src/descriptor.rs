//! Hook descriptors and the per-call handler API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::arch::RelativeRedirect;
use crate::host::ShadowMapping;

/// declarative registration record: one per function to intercept
///
/// the registry is assembled from these once, at engine construction; there
/// is no runtime registration surface.
#[derive(Debug, Clone, Copy)]
pub struct HookRegistration {
    /// symbol name of the target function
    pub name: &'static str,
    /// address of the replacement function
    pub handler: usize,
}

impl HookRegistration {
    pub fn new(name: &'static str, handler: usize) -> Self {
        Self { name, handler }
    }
}

/// per-hook mutable state, touched only by lifecycle operations
///
/// the writable aliases exist from analysis until post-drain release; the
/// redirect is precomputed during analysis so nothing inside the execution
/// barrier can fail.
#[derive(Default)]
pub(crate) struct PatchState {
    pub target_map: Option<ShadowMapping>,
    pub origin_map: Option<ShadowMapping>,
    pub redirect: Option<RelativeRedirect>,
}

/// one intercepted function
///
/// usage counter protocol: 0 = unresolved or torn down, 1 = patched and
/// quiescent, >1 = patched with in-flight invocations. The counter moves
/// 0 -> 1 only before the install barrier and 1 <-> N only through
/// [`UsageGuard`].
pub struct HookDescriptor {
    name: &'static str,
    handler: usize,
    target: AtomicUsize,
    origin: AtomicUsize,
    patch_len: AtomicUsize,
    usage: AtomicUsize,
    state: Mutex<PatchState>,
}

impl HookDescriptor {
    pub(crate) fn new(registration: HookRegistration) -> Self {
        Self {
            name: registration.name,
            handler: registration.handler,
            target: AtomicUsize::new(0),
            origin: AtomicUsize::new(0),
            patch_len: AtomicUsize::new(0),
            usage: AtomicUsize::new(0),
            state: Mutex::new(PatchState::default()),
        }
    }

    /// symbol name used for resolution
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// replacement function address
    pub fn handler(&self) -> usize {
        self.handler
    }

    /// resolved target address, if resolution succeeded
    pub fn target(&self) -> Option<usize> {
        match self.target.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    /// origin stub address, if analysis succeeded
    pub fn origin(&self) -> Option<usize> {
        match self.origin.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    /// number of original bytes covered by the patch (0 until analyzed)
    pub fn patch_len(&self) -> usize {
        self.patch_len.load(Ordering::Acquire)
    }

    /// current usage counter value
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    /// whether the redirect is (or is eligible to be) installed
    pub fn is_installed(&self) -> bool {
        self.usage() >= 1
    }

    /// mark one more concurrent invocation; the guard marks one fewer on drop
    ///
    /// only meaningful from inside a handler body, while the hook is
    /// installed; entering an uninstalled hook would fake the 0 -> 1
    /// eligibility transition that belongs to activation alone.
    pub fn enter(&self) -> UsageGuard<'_> {
        debug_assert!(
            self.usage.load(Ordering::Acquire) >= 1,
            "enter() before install"
        );
        self.usage.fetch_add(1, Ordering::AcqRel);
        UsageGuard { usage: &self.usage }
    }

    pub(crate) fn set_prepared(
        &self,
        target: usize,
        origin: usize,
        patch_len: usize,
        state: PatchState,
    ) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        self.target.store(target, Ordering::Release);
        self.origin.store(origin, Ordering::Release);
        self.patch_len.store(patch_len, Ordering::Release);
        // marks eligibility for the install barrier
        self.usage.store(1, Ordering::Release);
    }

    pub(crate) fn patch_state(&self) -> MutexGuard<'_, PatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// clear addresses and drop back to the unresolved state
    ///
    /// only called after removal and drain, or on a hook that never made it
    /// past analysis.
    pub(crate) fn reset(&self) -> PatchState {
        let drained = core::mem::take(&mut *self.patch_state());
        self.target.store(0, Ordering::Release);
        self.origin.store(0, Ordering::Release);
        self.patch_len.store(0, Ordering::Release);
        self.usage.store(0, Ordering::Release);
        drained
    }
}

/// cloneable reference to a descriptor, for use inside handler bodies
#[derive(Clone)]
pub struct HookHandle {
    inner: Arc<HookDescriptor>,
}

impl HookHandle {
    pub(crate) fn new(inner: Arc<HookDescriptor>) -> Self {
        Self { inner }
    }

    /// symbol name of the hooked function
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// origin stub entry: call this (transmuted to the target's fn type) to
    /// invoke the original behavior
    pub fn origin(&self) -> Option<usize> {
        self.inner.origin()
    }

    /// resolved target address
    pub fn target(&self) -> Option<usize> {
        self.inner.target()
    }

    /// whether the hook is currently installed
    pub fn is_installed(&self) -> bool {
        self.inner.is_installed()
    }

    /// mark one more concurrent invocation for the duration of the guard
    ///
    /// call only from inside the handler body of an installed hook
    pub fn enter(&self) -> UsageGuard<'_> {
        self.inner.enter()
    }
}

/// marks an in-flight invocation of a replaced function
///
/// increment on entry, decrement on exit; two atomic ops is the entire
/// hot-path cost. Teardown's drain loop waits for all guards to drop.
pub struct UsageGuard<'a> {
    usage: &'a AtomicUsize,
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.usage.fetch_sub(1, Ordering::AcqRel);
    }
}
