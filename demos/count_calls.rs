//! hook a function in the running process and count how many times it
//! gets called, then tear the hook back down and show the counter
//! staying frozen.
//!
//! the target is a small machine-code function placed on an executable
//! page near this binary, because the 5-byte redirect is rel32: handler,
//! target, and origin stub all have to sit within +/-2GB of each other.
//! hooking a far-away shared library (glibc under ASLR, say) needs an
//! indirection the engine deliberately does not provide.
//!
//! run with `cargo run --example count_calls` (unix, x86_64 only).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use waylay::{
    ExecutionBarrier, HookEngine, HookRegistration, ProcessHost, Result, ShadowMapper,
    ShadowMapping, SymbolDirectory,
};

/// mov eax, edi; add eax, 1; ret - f(x) = x + 1
const ADD_ONE: [u8; 6] = [0x89, 0xF8, 0x83, 0xC0, 0x01, 0xC3];

static CALLS: AtomicUsize = AtomicUsize::new(0);
static ORIGIN: AtomicUsize = AtomicUsize::new(0);

type TargetFn = extern "C" fn(i32) -> i32;

fn as_fn(address: usize) -> TargetFn {
    // SAFETY: every address fed here points at ADD_ONE-shaped code
    unsafe { std::mem::transmute(address) }
}

/// replacement: count the call, then forward to the unmodified original
/// through the origin stub.
extern "C" fn counting_handler(x: i32) -> i32 {
    CALLS.fetch_add(1, Ordering::SeqCst);
    as_fn(ORIGIN.load(Ordering::SeqCst))(x)
}

/// host with one synthetic symbol, delegating barrier and mapping to the
/// stock process host
struct DemoHost {
    symbols: HashMap<&'static str, usize>,
    inner: ProcessHost,
}

impl SymbolDirectory for DemoHost {
    fn lookup(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }
}

impl ExecutionBarrier for DemoHost {
    fn run(&self, f: &mut dyn FnMut()) -> Result<()> {
        self.inner.run(f)
    }
}

impl ShadowMapper for DemoHost {
    fn map_writable(&self, address: usize, len: usize) -> Result<ShadowMapping> {
        self.inner.map_writable(address, len)
    }

    fn release(&self, mapping: ShadowMapping) {
        self.inner.release(mapping)
    }
}

/// copy the function bytes onto a fresh executable page within rel32
/// range of this binary
fn make_callable(code: &[u8]) -> usize {
    let anchor = make_callable as usize;
    let page_sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };

    for step in 1..=512usize {
        let hint = anchor.wrapping_add(step * 0x100_0000) & !0xFFFF;
        let page = unsafe {
            libc::mmap(
                hint as *mut libc::c_void,
                page_sz,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(page, libc::MAP_FAILED, "mmap failed");

        let distance = (page as i64).wrapping_sub(anchor as i64).abs();
        if distance <= i32::MAX as i64 {
            unsafe {
                core::ptr::write_bytes(page as *mut u8, 0x90, page_sz);
                core::ptr::copy_nonoverlapping(code.as_ptr(), page as *mut u8, code.len());
            }
            return page as usize;
        }

        unsafe {
            libc::munmap(page, page_sz);
        }
    }

    panic!("no executable page reachable from this binary");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let target = make_callable(&ADD_ONE);
    let f = as_fn(target);
    println!("before hooking: add_one(41) = {}", f(41));

    let host = DemoHost {
        symbols: [("add_one", target)].into_iter().collect(),
        inner: ProcessHost::new(),
    };
    let regs = [HookRegistration::new("add_one", counting_handler as usize)];
    let mut engine: HookEngine<DemoHost> = HookEngine::new(&regs, host)?;

    engine.activate()?;
    let handle = engine.handle("add_one").ok_or(waylay::HookError::NotActive)?;
    let origin = handle.origin().ok_or(waylay::HookError::NotActive)?;
    ORIGIN.store(origin, Ordering::SeqCst);

    for i in 0..10 {
        assert_eq!(f(i), i + 1);
    }
    println!("while hooked: observed {} calls", CALLS.load(Ordering::SeqCst));

    engine.deactivate()?;
    let frozen = CALLS.load(Ordering::SeqCst);
    assert_eq!(f(41), 42);
    assert_eq!(CALLS.load(Ordering::SeqCst), frozen);
    println!("hook removed, counter frozen at {frozen}");

    Ok(())
}
