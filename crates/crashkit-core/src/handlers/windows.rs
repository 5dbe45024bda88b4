//! # Windows Failure Handlers
//!
//! - CRT `signal()` handlers for `SIGABRT`, `SIGSEGV`, `SIGFPE` and `SIGILL`,
//!   which catch `abort()` and `raise()`.
//! - A top-level unhandled exception filter for structured exceptions
//!   (access violations, stack overflows, `__fastfail`...).
//!
//! The filter calls the filter it replaced and then always returns
//! `EXCEPTION_CONTINUE_SEARCH`, so Windows Error Reporting and attached
//! debuggers still see the exception.

use std::sync::atomic::{AtomicUsize, Ordering};

use libc::c_int;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};
use windows_sys::Win32::System::Diagnostics::Debug::{
    SetUnhandledExceptionFilter, EXCEPTION_POINTERS, LPTOP_LEVEL_EXCEPTION_FILTER,
};

use super::{Episode, HandlerRegistry};
use crate::config::CrashConfig;
use crate::context::CpuContext;
use crate::dump::FaultContext;
use crate::error::CrashResult;
use crate::report::Reporter;
use crate::types::event::exception_codes;
use crate::types::{AccessKind, Address, FailureEvent, FaultRecord, SignalEvent, SignalKind};

const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

/// CRT signals that exist on Windows.
const CRT_SIGNALS: [c_int; 4] = [libc::SIGABRT, libc::SIGSEGV, libc::SIGFPE, libc::SIGILL];

/// Previous CRT handlers, indexed like [`CRT_SIGNALS`].
static PREVIOUS_CRT: [AtomicUsize; 4] = [const { AtomicUsize::new(libc::SIG_DFL) }; 4];

/// The filter we replaced.
static PREVIOUS_FILTER: OnceCell<LPTOP_LEVEL_EXCEPTION_FILTER> = OnceCell::new();

pub(super) fn install(config: &'static CrashConfig) -> CrashResult<()>
{
    for (slot, signo) in CRT_SIGNALS.iter().enumerate() {
        if !config.signals.iter().any(|kind| kind.signo() == *signo) {
            continue;
        }
        // SAFETY: crt_handler has the signature the CRT expects.
        let previous = unsafe { libc::signal(*signo, crt_handler as extern "C" fn(c_int) as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            warn!(signal = SignalKind::from_signo(*signo).name(), "CRT signal registration failed");
            continue;
        }
        PREVIOUS_CRT[slot].store(previous, Ordering::Release);
    }

    // SAFETY: unhandled_filter matches PTOP_LEVEL_EXCEPTION_FILTER.
    let previous = unsafe { SetUnhandledExceptionFilter(Some(unhandled_filter)) };
    let _ = PREVIOUS_FILTER.set(previous);
    debug!(chained = previous.is_some(), "unhandled exception filter installed");
    Ok(())
}

extern "C" fn crt_handler(signo: c_int)
{
    let registry = HandlerRegistry::global();
    let thread_id = crate::platform::current_thread_id();
    match registry.episode().begin(thread_id) {
        Episode::Owner => {
            let signal = SignalEvent {
                kind: SignalKind::from_signo(signo),
                code: 0,
                fault_address: None,
                thread_id,
            };
            let context = CpuContext::current();
            if registry.is_reporting() {
                let options = registry.config().map(|config| config.report_options()).unwrap_or_default();
                Reporter::stderr(options).report(&FailureEvent::RuntimeSignal(signal), context.as_ref());
            }
            // Same rule as on Unix: abort() is reported, not dumped.
            if signal.kind.is_synchronous_fault() {
                registry.dump_on_failure(FaultContext {
                    cpu: context.as_ref(),
                    signal: Some(&signal),
                    exception_pointers: std::ptr::null(),
                    thread_id,
                });
            }
        }
        Episode::Reentrant => {}
        Episode::Busy => registry.episode().wait(),
    }

    let previous = CRT_SIGNALS
        .iter()
        .position(|candidate| *candidate == signo)
        .map_or(libc::SIG_DFL, |slot| PREVIOUS_CRT[slot].load(Ordering::Acquire));
    // SAFETY: restoring the handler that was in place before ours, then
    // raising so it (or the CRT default) runs.
    unsafe {
        libc::signal(signo, previous);
        libc::raise(signo);
    }
}

unsafe extern "system" fn unhandled_filter(pointers: *const EXCEPTION_POINTERS) -> i32
{
    let registry = HandlerRegistry::global();
    let thread_id = crate::platform::current_thread_id();
    match registry.episode().begin(thread_id) {
        // SAFETY: the system passes valid exception pointers.
        Episode::Owner => unsafe { report_exception(registry, pointers, thread_id) },
        Episode::Reentrant => {}
        Episode::Busy => registry.episode().wait(),
    }

    if let Some(Some(previous)) = PREVIOUS_FILTER.get() {
        // SAFETY: forwarding the same pointers to the filter we replaced.
        let _ = unsafe { previous(pointers) };
    }
    EXCEPTION_CONTINUE_SEARCH
}

/// # Safety
///
/// `pointers` must be null or the argument of a running exception filter.
unsafe fn report_exception(registry: &HandlerRegistry, pointers: *const EXCEPTION_POINTERS, thread_id: u64)
{
    // SAFETY: forwarded from the caller.
    let (record, native) = unsafe {
        match pointers.as_ref() {
            Some(pointers) => (pointers.ExceptionRecord.as_ref(), pointers.ContextRecord.as_ref()),
            None => (None, None),
        }
    };
    let context = native.map(|native| CpuContext::from_native(Box::new(*native)));

    let fault = match record {
        Some(record) => {
            let code = record.ExceptionCode as u32;
            let access = (code == exception_codes::ACCESS_VIOLATION && record.NumberParameters >= 2).then(|| {
                (
                    AccessKind::from_raw(record.ExceptionInformation[0]),
                    Address::new(record.ExceptionInformation[1] as u64),
                )
            });
            FaultRecord {
                code,
                address: Address::new(record.ExceptionAddress as usize as u64),
                thread_id,
                access,
            }
        }
        None => FaultRecord {
            code: 0,
            address: Address::ZERO,
            thread_id,
            access: None,
        },
    };

    if registry.is_reporting() {
        let options = registry.config().map(|config| config.report_options()).unwrap_or_default();
        Reporter::stderr(options).report(&FailureEvent::UnhandledFault(fault), context.as_ref());
    }
    registry.dump_on_failure(FaultContext {
        cpu: context.as_ref(),
        signal: None,
        exception_pointers: pointers,
        thread_id,
    });
}
