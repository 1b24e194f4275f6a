#![cfg(all(unix, any(target_arch = "x86_64", target_arch = "x86")))]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)] // we document safety in SAFETY comments

//! waylay: live function interception for running x86/x86_64 processes
//!
//! This library redirects calls to named functions into replacement
//! handlers while the process keeps running, and lets the handlers call
//! the unmodified original through an origin stub. It provides:
//!
//! - symbol resolution through a pluggable directory (dlsym by default)
//! - instruction-boundary analysis of the target prologue (iced-x86)
//! - origin-stub construction so handlers can invoke the pristine function
//! - barrier-synchronized install and removal of 5-byte relative redirects
//! - reference-counted teardown that waits for in-flight handlers to drain
//!
//! The host process supplies three collaborators (symbol lookup, an
//! execution barrier, and a shadow mapper for writing into executable
//! pages); [`ProcessHost`] is a stock implementation for unix userspace.
//!
//! # Example
//!
//! ```no_run
//! use waylay::{HookEngine, HookRegistration, ProcessHost};
//!
//! extern "C" fn my_handler() {}
//!
//! let regs = [HookRegistration::new("some_symbol", my_handler as usize)];
//! let mut engine: HookEngine<ProcessHost> =
//!     HookEngine::new(&regs, ProcessHost::new()).unwrap();
//! engine.activate().unwrap();
//! // ... handlers now intercept calls to some_symbol ...
//! engine.deactivate().unwrap();
//! ```

pub mod arch;
pub mod decode;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod host;
pub mod registry;
pub mod stub;

mod patch;
mod trampoline;

// re-exports for convenience
pub use arch::{Architecture, NativeArch, RelativeRedirect, REDIRECT_SIZE};
pub use descriptor::{HookDescriptor, HookHandle, HookRegistration, UsageGuard};
pub use engine::{EngineConfig, EngineState, HookEngine, MAX_PATCH_REGION};
pub use error::{HookError, Result};
pub use host::{ExecutionBarrier, Host, ShadowMapper, ShadowMapping, SymbolDirectory};
pub use host::ProcessHost;
pub use registry::HookRegistry;

/// library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
