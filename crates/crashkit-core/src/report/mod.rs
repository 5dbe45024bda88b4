//! # Diagnostic Reporter
//!
//! Turns one [`FailureEvent`] into a human-readable report on the
//! diagnostic sink.
//!
//! ## Stages
//!
//! 1. **Classify**: panics are classified from their payload by the panic
//!    hook ([`classify_panic`]) before the event reaches the reporter.
//! 2. **Header**: banner, event details and the static [`hint_for`] text.
//! 3. **Snapshot**: memory, thread count and loaded modules.
//! 4. **Trace**: the Stack Walker from the fault context, annotated by the
//!    Symbolicator. A panic's trace starts at the code that panicked: the
//!    hook and the standard library's panic entry points are cut off.
//!
//! Each stage is written as soon as it is ready, line by line, so a second
//! fault halfway through still leaves the earlier stages on the terminal.
//! Write errors are ignored: there is nowhere left to report them.
//!
//! ## Example
//!
//! ```text
//! !!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!
//! !!! FATAL SIGNAL: SIGSEGV (Segmentation fault)
//! !!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!
//! Signal code: SEGV_MAPERR (1)
//! Fault address: 0x0000000000000008
//! Hint: This means invalid memory access.
//! ```

pub mod classify;
pub mod hints;
pub mod sink;
pub mod snapshot;

use std::io::{self, Write};

pub use classify::{classify_message, classify_panic};
pub use hints::{hint_for, HintKey};
pub use sink::DiagnosticSink;
pub use snapshot::ProcessSnapshot;

use crate::context::CpuContext;
use crate::symbols::Symbolicator;
use crate::types::{FailureEvent, ModuleInfo, StackFrame, StackTrace, MAX_FRAMES};
use crate::unwind::capture_trace_in;

/// Function name prefixes between a `panic!` and the panic hook.
const PANIC_MACHINERY: &[&str] = &[
    "crashkit_core::handlers::",
    "std::panicking::",
    "std::panic::panic_any",
    "core::panicking::",
    "std::sys::backtrace::",
    "std::sys_common::backtrace::",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "<alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call",
    "core::result::unwrap_failed",
    "core::option::unwrap_failed",
    "core::option::expect_failed",
];

/// Frame belongs to the panic path rather than the code that panicked.
pub fn is_panic_machinery(frame: &StackFrame) -> bool
{
    frame
        .symbol
        .as_ref()
        .is_some_and(|symbol| PANIC_MACHINERY.iter().any(|prefix| symbol.display_name().starts_with(prefix)))
}

/// Banner delimiter line.
pub const BANNER: &str = "!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!";

/// A fault this close to the stack pointer is reported as a likely overflow.
const STACK_OVERFLOW_WINDOW: u64 = 64 * 1024;

/// What the reporter includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions
{
    /// Resolve frames to function names and lines.
    pub symbolicate: bool,
    /// Frame cap, at most [`MAX_FRAMES`].
    pub max_frames: usize,
    /// Modules listed before the "... and K more" line.
    pub max_modules: usize,
}

impl Default for ReportOptions
{
    fn default() -> Self
    {
        Self {
            symbolicate: true,
            max_frames: MAX_FRAMES,
            max_modules: 20,
        }
    }
}

/// Writes crash reports to a sink.
pub struct Reporter<W>
{
    sink: W,
    options: ReportOptions,
}

impl Reporter<DiagnosticSink>
{
    /// Reporter on standard error.
    pub fn stderr(options: ReportOptions) -> Self
    {
        Self::new(DiagnosticSink::stderr(), options)
    }
}

impl<W: Write> Reporter<W>
{
    pub fn new(sink: W, options: ReportOptions) -> Self
    {
        Self { sink, options }
    }

    /// Write the full report for `event`, walking the stack from `context`.
    ///
    /// Returns the symbolicated trace so the caller can reuse it.
    pub fn report(&mut self, event: &FailureEvent<'_>, context: Option<&CpuContext>) -> StackTrace
    {
        let _ = self.write_header(event, context);

        let modules = crate::platform::loaded_modules();
        let _ = ProcessSnapshot::capture().write_to(&mut self.sink, &modules, self.options.max_modules);

        let mut trace = self.collect_trace(context, modules);
        if matches!(event, FailureEvent::UncaughtException(_)) {
            trace.skip_leading(is_panic_machinery);
        }
        let _ = self.write_trace(&trace);
        let _ = writeln!(self.sink, "{BANNER}");
        trace
    }

    fn collect_trace(&self, context: Option<&CpuContext>, modules: Vec<ModuleInfo>) -> StackTrace
    {
        let symbolicator = if self.options.symbolicate {
            Symbolicator::new(modules)
        } else {
            Symbolicator::without_debug_info(modules)
        };
        let mut trace = capture_trace_in(context, symbolicator.modules(), self.options.max_frames);
        symbolicator.symbolicate(&mut trace);
        trace
    }

    /// Banner, event details and hint.
    pub fn write_header(&mut self, event: &FailureEvent<'_>, context: Option<&CpuContext>) -> io::Result<()>
    {
        let out = &mut self.sink;
        writeln!(out)?;
        writeln!(out, "{BANNER}")?;
        writeln!(out, "!!! {}", event.headline())?;
        writeln!(out, "{BANNER}")?;

        match event {
            FailureEvent::UncaughtException(info) => {
                writeln!(out, "Exception type: {}", info.kind)?;
                match &info.message {
                    Some(message) => writeln!(out, "Exception message: {message}")?,
                    None => writeln!(out, "Exception message: <non-string payload>")?,
                }
                if let Some(location) = &info.location {
                    writeln!(out, "Location: {location}")?;
                }
                if let Some(name) = info.thread_name {
                    writeln!(out, "Thread: {name}")?;
                }
            }
            FailureEvent::RuntimeSignal(signal) => {
                writeln!(out, "Signal: {} ({})", signal.kind.signo(), signal.kind.name())?;
                match signal.code_name() {
                    Some(name) => writeln!(out, "Signal code: {name} ({})", signal.code)?,
                    None => writeln!(out, "Signal code: {}", signal.code)?,
                }
                if let Some(address) = signal.fault_address.filter(|_| !signal.is_user_sent()) {
                    writeln!(out, "Fault address: {address}")?;
                    let sp = context.map(CpuContext::sp);
                    if sp.is_some_and(|sp| sp.value().abs_diff(address.value()) < STACK_OVERFLOW_WINDOW) {
                        writeln!(out, "Fault address is next to the stack pointer: this is most likely a stack overflow.")?;
                    }
                }
                writeln!(out, "Thread id: {}", signal.thread_id)?;
            }
            FailureEvent::UnhandledFault(fault) => {
                writeln!(out, "Exception code: 0x{:08X}", fault.code)?;
                writeln!(out, "Exception address: {}", fault.address)?;
                if let Some((access, target)) = fault.access {
                    writeln!(out, "Access: {access} at {target}")?;
                }
                writeln!(out, "Thread id: {}", fault.thread_id)?;
            }
        }

        if let Some(hint) = hint_for(HintKey::from(event)) {
            let mut lines = hint.lines();
            if let Some(first) = lines.next() {
                writeln!(out, "Hint: {first}")?;
            }
            for line in lines {
                writeln!(out, "      {line}")?;
            }
        }
        writeln!(out)
    }

    /// The stack trace section.
    pub fn write_trace(&mut self, trace: &StackTrace) -> io::Result<()>
    {
        let out = &mut self.sink;
        writeln!(out)?;
        if trace.is_empty() {
            writeln!(out, "=== STACK TRACE ===")?;
            writeln!(out, "no stack trace available")?;
        } else {
            writeln!(out, "=== STACK TRACE ({} frames) ===", trace.len())?;
            for frame in trace.frames() {
                writeln!(out, "{frame}")?;
            }
            if trace.is_full() {
                writeln!(out, "... (truncated at {MAX_FRAMES} frames)")?;
            }
        }
        writeln!(out, "=== END STACK TRACE ===")
    }

    /// Give back the sink.
    pub fn into_inner(self) -> W
    {
        self.sink
    }
}
