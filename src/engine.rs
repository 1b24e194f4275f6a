//! Lifecycle controller
//!
//! Owns the registry, the stub pool, and the host services, and drives every
//! hook through `Uninitialized -> Resolving -> Analyzed -> Installed ->
//! Draining -> Removed`. Data flows strictly downward at setup (resolve,
//! map, analyze, build stub, patch) and upward at teardown (unpatch, drain,
//! unmap).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::arch::{Architecture, NativeArch, RelativeRedirect, REDIRECT_SIZE};
use crate::decode::BoundaryScan;
use crate::descriptor::{HookDescriptor, HookHandle, HookRegistration, PatchState};
use crate::error::{HookError, Result};
use crate::host::Host;
use crate::patch;
use crate::registry::HookRegistry;
use crate::stub::{StubPool, STUB_SLOT_SIZE};
use crate::trampoline;

/// bytes read from a target for boundary analysis
pub const MAX_PATCH_REGION: usize = 32;

/// lifecycle position of the engine as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Resolving,
    Analyzed,
    Installed,
    Draining,
    Removed,
}

/// tunables for the lifecycle controller
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// sleep between quiescence polls during teardown
    pub drain_interval: Duration,
    /// upper bound on the whole drain of one hook; `None` waits forever,
    /// matching the behavior hosts historically relied on
    pub drain_timeout: Option<Duration>,
    /// bytes read from each target for boundary analysis
    pub max_scan: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(500),
            drain_timeout: None,
            max_scan: MAX_PATCH_REGION,
        }
    }
}

/// the hook engine: registry + stub pool + host services
pub struct HookEngine<H: Host, A: Architecture = NativeArch> {
    host: H,
    registry: HookRegistry,
    pool: StubPool,
    config: EngineConfig,
    state: EngineState,
    _arch: PhantomData<A>,
}

impl<H: Host, A: Architecture> HookEngine<H, A> {
    /// build an engine over a fixed set of registrations
    pub fn new(registrations: &[HookRegistration], host: H) -> Result<Self> {
        Self::with_config(registrations, host, EngineConfig::default())
    }

    /// build an engine with explicit tunables
    pub fn with_config(
        registrations: &[HookRegistration],
        host: H,
        config: EngineConfig,
    ) -> Result<Self> {
        // stub tail redirects are rel32, so the pool must sit within reach
        // of the code being hooked; the handlers are the best anchor we have
        // before resolution
        let anchor = registrations
            .first()
            .map(|r| r.handler)
            .unwrap_or(StubPool::near as usize);
        let pool = StubPool::near(anchor, registrations.len().max(1))?;
        Ok(Self {
            host,
            registry: HookRegistry::from_registrations(registrations),
            pool,
            config,
            state: EngineState::Uninitialized,
            _arch: PhantomData,
        })
    }

    /// current lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// the registry this engine walks
    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// handle for use inside a handler body
    pub fn handle(&self, name: &str) -> Option<HookHandle> {
        self.registry.handle(name)
    }

    /// resolve, analyze, and install every registered hook
    ///
    /// per-hook failures are local: the failing hook is skipped with a
    /// warning and the rest proceed. All eligible redirects are installed in
    /// one barrier invocation.
    ///
    /// the engine is single-shot: only a freshly built engine activates.
    /// An engine that was already activated reports [`HookError::AlreadyActive`],
    /// including after a full teardown, since its stub slots are spent.
    pub fn activate(&mut self) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(HookError::AlreadyActive);
        }
        self.state = EngineState::Resolving;

        let descriptors: Vec<Arc<HookDescriptor>> = self.registry.iter().cloned().collect();
        for descriptor in &descriptors {
            if let Err(error) = self.prepare(descriptor) {
                warn!(hook = descriptor.name(), %error, "failed to initialize hook");
            }
        }
        self.state = EngineState::Analyzed;

        // one atomic barrier call batches every descriptor; installing in
        // separate calls would race a hook's own not-yet-quiescent counter
        self.host.run(&mut || {
            for descriptor in &descriptors {
                patch::install(descriptor);
            }
        })?;
        self.state = EngineState::Installed;

        Ok(())
    }

    /// remove every installed redirect, drain in-flight calls, release maps
    ///
    /// removal happens in one barrier invocation; the writable aliases are
    /// released only once the owning hook's usage counter has returned to
    /// exactly 1, since a caller may still be mid-flight through the
    /// handler/origin-stub pair when the barrier fires. Retryable after a
    /// drain timeout: already-released hooks are skipped.
    pub fn deactivate(&mut self) -> Result<()> {
        if !matches!(self.state, EngineState::Installed | EngineState::Draining) {
            return Err(HookError::NotActive);
        }

        let descriptors: Vec<Arc<HookDescriptor>> = self.registry.iter().cloned().collect();
        self.host.run(&mut || {
            for descriptor in &descriptors {
                patch::remove(descriptor);
            }
        })?;
        self.state = EngineState::Draining;

        for descriptor in &descriptors {
            // unresolved hooks (and hooks already torn down by a previous
            // attempt) have nothing to drain or release
            if descriptor.target().is_none() {
                continue;
            }

            self.drain(descriptor)?;

            let state = descriptor.reset();
            if let Some(mapping) = state.target_map {
                self.host.release(mapping);
            }
            if let Some(mapping) = state.origin_map {
                self.host.release(mapping);
            }
        }
        self.state = EngineState::Removed;

        Ok(())
    }

    /// resolve -> map -> analyze -> build stub for one descriptor
    fn prepare(&mut self, descriptor: &HookDescriptor) -> Result<()> {
        let name = descriptor.name();
        let target = self
            .host
            .lookup(name)
            .ok_or_else(|| HookError::SymbolNotFound { name: name.into() })?;
        debug!(symbol = name, address = format_args!("{target:#x}"), "symbol resolved");

        let origin = self.pool.take_slot()?;

        let target_map = self.host.map_writable(target, self.config.max_scan)?;
        let origin_map = match self.host.map_writable(origin, STUB_SLOT_SIZE) {
            Ok(mapping) => mapping,
            Err(error) => {
                self.host.release(target_map);
                return Err(error);
            }
        };

        let max_scan = self.config.max_scan;
        let handler = descriptor.handler();
        let analyzed = (|| {
            // SAFETY: target is a resolved live function; the analysis
            // window never leaves the code mapped for it
            let bytes = unsafe { core::slice::from_raw_parts(target as *const u8, max_scan) };

            let patch_len = match A::scan_patch_region(target, bytes, REDIRECT_SIZE) {
                BoundaryScan::Boundary(len) => len,
                BoundaryScan::Unsafe => return Err(HookError::UnsafeTarget { name: name.into() }),
                BoundaryScan::Incomplete => {
                    return Err(HookError::AnalysisIncomplete { name: name.into() })
                }
            };
            if patch_len + REDIRECT_SIZE > STUB_SLOT_SIZE {
                return Err(HookError::AnalysisIncomplete { name: name.into() });
            }

            // pristine bytes into the stub, before the target is touched
            trampoline::build_origin_stub(target, origin, &origin_map, patch_len)?;

            // precomputed so nothing inside the barrier can fail
            let redirect = RelativeRedirect::new(target, handler)?;

            Ok((patch_len, redirect))
        })();

        match analyzed {
            Ok((patch_len, redirect)) => {
                descriptor.set_prepared(
                    target,
                    origin,
                    patch_len,
                    PatchState {
                        target_map: Some(target_map),
                        origin_map: Some(origin_map),
                        redirect: Some(redirect),
                    },
                );
                Ok(())
            }
            Err(error) => {
                self.host.release(target_map);
                self.host.release(origin_map);
                Err(error)
            }
        }
    }

    /// poll until no caller is still executing through this hook
    fn drain(&self, descriptor: &HookDescriptor) -> Result<()> {
        let deadline = self.config.drain_timeout.map(|t| Instant::now() + t);

        loop {
            let usage = descriptor.usage();
            if usage == 1 {
                return Ok(());
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(HookError::DrainTimedOut {
                        name: descriptor.name().into(),
                        in_flight: usage.saturating_sub(1),
                    });
                }
            }

            debug!(
                hook = descriptor.name(),
                in_flight = usage.saturating_sub(1),
                "waiting for quiescence"
            );
            std::thread::sleep(self.config.drain_interval);
        }
    }
}
