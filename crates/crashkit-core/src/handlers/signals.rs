//! # Fatal Signal Handlers (Unix)
//!
//! One `SA_SIGINFO` handler serves every configured signal. It runs on an
//! alternate stack so a stack overflow can still be reported, and with
//! `SA_NODEFER` so a fault inside the handler is delivered (and chained)
//! instead of hanging the thread.
//!
//! ## Chaining
//!
//! After reporting, the previous action is restored and invoked:
//!
//! | previous          | what happens                               |
//! |-------------------|--------------------------------------------|
//! | `SIG_DFL`/`SIG_IGN` | default action set, signal re-raised     |
//! | plain handler     | called with the signal number              |
//! | `SA_SIGINFO`      | called with the original info and context  |
//!
//! An ignored fatal signal would re-fault forever, so it gets the default
//! action too. For a hardware fault the faulting instruction runs again once
//! the handler returns and the restored action takes it.

use std::ptr;

use libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::{Episode, HandlerRegistry};
use crate::config::CrashConfig;
use crate::context::CpuContext;
use crate::dump::FaultContext;
use crate::error::{CrashError, CrashResult};
use crate::report::Reporter;
use crate::types::{Address, FailureEvent, SignalEvent, SignalKind};

/// Highest signal number tracked.
const MAX_SIGNAL: usize = 65;

/// Actions that were in place before ours, by signal number.
static PREVIOUS: [OnceCell<SigAction>; MAX_SIGNAL] = [const { OnceCell::new() }; MAX_SIGNAL];

pub(super) fn install(config: &'static CrashConfig) -> CrashResult<()>
{
    if config.alt_stack_size > 0 {
        // SAFETY: called once, before any of our handlers can run.
        unsafe { install_alt_stack(config.alt_stack_size)? };
    }
    for kind in &config.signals {
        let signal = Signal::try_from(kind.signo()).map_err(|source| CrashError::SignalRegistration {
            signal: kind.name(),
            source,
        })?;
        register(signal, config.alt_stack_size > 0)?;
        debug!(signal = kind.name(), "signal handler registered");
    }
    Ok(())
}

fn register(signal: Signal, on_alt_stack: bool) -> CrashResult<()>
{
    let index = signal as usize;
    if index >= MAX_SIGNAL {
        return Err(CrashError::SignalRegistration {
            signal: signal.as_str(),
            source: nix::Error::EINVAL,
        });
    }
    let mut flags = SaFlags::SA_SIGINFO | SaFlags::SA_NODEFER;
    if on_alt_stack {
        flags |= SaFlags::SA_ONSTACK;
    }
    let action = SigAction::new(SigHandler::SigAction(handle_signal), flags, SigSet::empty());
    // SAFETY: handle_signal only touches the registry through atomics and
    // OnceCell reads, and writes through raw descriptors.
    let previous = unsafe { signal::sigaction(signal, &action) }.map_err(|source| CrashError::SignalRegistration {
        signal: signal.as_str(),
        source,
    })?;
    // A second registration of the same signal keeps the first previous
    // action, which is the one that predates us.
    let _ = PREVIOUS[index].set(previous);
    Ok(())
}

/// Map an alternate signal stack with a guard page below it.
///
/// # Safety
///
/// Replaces the calling thread's alternate stack; must not run while a
/// handler is executing on it.
unsafe fn install_alt_stack(size: usize) -> CrashResult<()>
{
    let page = page_size::get();
    let size = size.max(libc::SIGSTKSZ).next_multiple_of(page);
    let registration_error = |source| CrashError::SignalRegistration {
        signal: "sigaltstack",
        source,
    };

    // SAFETY: anonymous private mapping, no address hint.
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size + page,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(registration_error(nix::Error::last()));
    }
    // SAFETY: the first page belongs to the mapping we just created.
    if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
        warn!("could not protect the alternate stack guard page");
    }
    let stack = libc::stack_t {
        // SAFETY: base + page is inside the mapping.
        ss_sp: unsafe { base.cast::<u8>().add(page) }.cast(),
        ss_flags: 0,
        ss_size: size,
    };
    // SAFETY: stack describes a live mapping that is never unmapped.
    if unsafe { libc::sigaltstack(&stack, ptr::null_mut()) } != 0 {
        let source = nix::Error::last();
        // SAFETY: the mapping is ours and nothing points into it.
        unsafe { libc::munmap(base, size + page) };
        return Err(registration_error(source));
    }
    debug!(bytes = size, "alternate signal stack installed");
    Ok(())
}

extern "C" fn handle_signal(signo: c_int, info: *mut siginfo_t, ucontext: *mut c_void)
{
    let registry = HandlerRegistry::global();
    let thread_id = crate::platform::current_thread_id();
    match registry.episode().begin(thread_id) {
        Episode::Owner => {
            // SAFETY: info and ucontext come straight from the kernel.
            unsafe { report_signal(registry, signo, info, ucontext, thread_id) };
        }
        Episode::Reentrant => {}
        Episode::Busy => registry.episode().wait(),
    }
    // SAFETY: same arguments we were invoked with.
    unsafe { chain(signo, info, ucontext) };
}

/// # Safety
///
/// `info` and `ucontext` must be null or the arguments of a running handler.
unsafe fn report_signal(registry: &HandlerRegistry, signo: c_int, info: *const siginfo_t, ucontext: *const c_void, thread_id: u64)
{
    let kind = SignalKind::from_signo(signo);
    // SAFETY: forwarded from the caller.
    let (code, fault_address) = unsafe { signal_details(kind, info) };
    let signal = SignalEvent {
        kind,
        code,
        fault_address,
        thread_id,
    };
    // SAFETY: forwarded from the caller.
    let context = unsafe { CpuContext::from_ucontext(ucontext) };

    if registry.is_reporting() {
        let options = registry.config().map(|config| config.report_options()).unwrap_or_default();
        Reporter::stderr(options).report(&FailureEvent::RuntimeSignal(signal), context.as_ref());
    }
    if dumps_for(kind) {
        registry.dump_on_failure(FaultContext {
            cpu: context.as_ref(),
            signal: Some(&signal),
            thread_id,
        });
    }
}

/// Dumps are written for hardware faults only. An abort already carries its
/// reason in the report, and a panic that ends in one has been dumped by the
/// panic hook.
fn dumps_for(kind: SignalKind) -> bool
{
    kind.is_synchronous_fault()
}

/// `si_code` and, for hardware faults, `si_addr`.
unsafe fn signal_details(kind: SignalKind, info: *const siginfo_t) -> (i32, Option<Address>)
{
    if info.is_null() {
        return (0, None);
    }
    // SAFETY: non-null info from the kernel.
    let info = unsafe { &*info };
    if !kind.is_synchronous_fault() {
        return (info.si_code, None);
    }
    #[cfg(any(target_os = "linux", target_os = "android"))]
    // SAFETY: si_addr is valid for SIGSEGV, SIGBUS, SIGFPE and SIGILL.
    let address = unsafe { info.si_addr() } as u64;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let address = info.si_addr as u64;
    (info.si_code, Some(Address::new(address)))
}

/// Hand the signal to whatever was installed before us.
///
/// # Safety
///
/// Must be called from the signal handler with its own arguments.
unsafe fn chain(signo: c_int, info: *mut siginfo_t, ucontext: *mut c_void)
{
    let previous = usize::try_from(signo).ok().and_then(|index| PREVIOUS.get(index)).and_then(OnceCell::get);
    let Ok(signal) = Signal::try_from(signo) else {
        return;
    };
    let Some(previous) = previous else {
        // SAFETY: restoring the default action has no preconditions.
        unsafe { reraise_default(signal) };
        return;
    };

    // SAFETY: reinstalling the action we replaced.
    if unsafe { signal::sigaction(signal, previous) }.is_err() {
        // SAFETY: as above.
        unsafe { reraise_default(signal) };
        return;
    }
    match previous.handler() {
        // SAFETY: as above.
        SigHandler::SigDfl | SigHandler::SigIgn => unsafe { reraise_default(signal) },
        SigHandler::Handler(handler) => handler(signo),
        SigHandler::SigAction(handler) => handler(signo, info, ucontext),
    }
}

/// Set `SIG_DFL` and raise the signal again.
unsafe fn reraise_default(signal: Signal)
{
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL is always a valid action.
    let _ = unsafe { signal::sigaction(signal, &default) };
    let _ = signal::raise(signal);
}
