//! Failure events: the seam between platform handlers and the reporter.
//!
//! A platform adapter (panic hook, signal handler, unhandled exception
//! filter) builds exactly one [`FailureEvent`] per fault and hands it to the
//! Diagnostic Reporter. Events borrow from the handler's arguments where
//! possible so that building one does not allocate.

use std::borrow::Cow;
use std::fmt;

use super::symbols::SourceLocation;
use super::Address;

/// What kind of uncaught panic terminated the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind
{
    /// An allocation could not be satisfied (`TryReserveError`, capacity overflow).
    AllocationFailure,
    /// A generic runtime failure with a message.
    RuntimeFailure,
    /// An index or range was outside its bounds.
    OutOfRange,
    /// Input could not be parsed or converted.
    InvalidArgument,
    /// Payload of a type the classifier does not know.
    Unknown,
}

impl ExceptionKind
{
    /// Human-readable label used in the report header.
    pub const fn label(self) -> &'static str
    {
        match self {
            ExceptionKind::AllocationFailure => "allocation failure",
            ExceptionKind::RuntimeFailure => "runtime failure",
            ExceptionKind::OutOfRange => "out of range",
            ExceptionKind::InvalidArgument => "invalid argument",
            ExceptionKind::Unknown => "unknown exception",
        }
    }
}

impl fmt::Display for ExceptionKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.label())
    }
}

/// An uncaught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo<'a>
{
    /// Classification of the payload.
    pub kind: ExceptionKind,
    /// Payload message, absent for non-string payloads.
    pub message: Option<Cow<'a, str>>,
    /// Where the panic was raised.
    pub location: Option<SourceLocation>,
    /// Name of the panicking thread.
    pub thread_name: Option<&'a str>,
}

/// Termination signals the toolkit knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind
{
    /// `SIGABRT`
    Abort,
    /// `SIGSEGV`
    SegFault,
    /// `SIGFPE`
    FloatingPointError,
    /// `SIGILL`
    IllegalInstruction,
    /// `SIGBUS`
    BusError,
    /// Any other signal number.
    Other(i32),
}

impl SignalKind
{
    /// Map a raw signal number.
    pub fn from_signo(signo: i32) -> Self
    {
        match signo {
            libc::SIGABRT => SignalKind::Abort,
            libc::SIGSEGV => SignalKind::SegFault,
            libc::SIGFPE => SignalKind::FloatingPointError,
            libc::SIGILL => SignalKind::IllegalInstruction,
            #[cfg(unix)]
            libc::SIGBUS => SignalKind::BusError,
            other => SignalKind::Other(other),
        }
    }

    /// Raw signal number.
    pub fn signo(self) -> i32
    {
        match self {
            SignalKind::Abort => libc::SIGABRT,
            SignalKind::SegFault => libc::SIGSEGV,
            SignalKind::FloatingPointError => libc::SIGFPE,
            SignalKind::IllegalInstruction => libc::SIGILL,
            #[cfg(unix)]
            SignalKind::BusError => libc::SIGBUS,
            #[cfg(not(unix))]
            SignalKind::BusError => 10,
            SignalKind::Other(signo) => signo,
        }
    }

    /// Conventional `SIG*` name.
    pub const fn name(self) -> &'static str
    {
        match self {
            SignalKind::Abort => "SIGABRT",
            SignalKind::SegFault => "SIGSEGV",
            SignalKind::FloatingPointError => "SIGFPE",
            SignalKind::IllegalInstruction => "SIGILL",
            SignalKind::BusError => "SIGBUS",
            SignalKind::Other(_) => "SIG?",
        }
    }

    /// Short description, as `strsignal` would give it.
    pub const fn description(self) -> &'static str
    {
        match self {
            SignalKind::Abort => "Aborted",
            SignalKind::SegFault => "Segmentation fault",
            SignalKind::FloatingPointError => "Floating point exception",
            SignalKind::IllegalInstruction => "Illegal instruction",
            SignalKind::BusError => "Bus error",
            SignalKind::Other(_) => "Unrecognised signal",
        }
    }

    /// `true` for faults raised by the executing instruction itself.
    ///
    /// Only these carry a meaningful fault address in `siginfo`.
    pub const fn is_synchronous_fault(self) -> bool
    {
        matches!(
            self,
            SignalKind::SegFault | SignalKind::FloatingPointError | SignalKind::IllegalInstruction | SignalKind::BusError
        )
    }
}

/// A fatal signal delivered to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent
{
    /// Signal classification.
    pub kind: SignalKind,
    /// `si_code` from the signal info (0 when unavailable).
    pub code: i32,
    /// Faulting address for kernel-generated memory and arithmetic faults.
    pub fault_address: Option<Address>,
    /// OS thread id of the receiving thread.
    pub thread_id: u64,
}

impl SignalEvent
{
    /// Symbolic name of `si_code` for this signal, where one exists.
    pub fn code_name(&self) -> Option<&'static str>
    {
        let name = match (self.kind, self.code) {
            (_, 0) => "SI_USER",
            (_, -1) => "SI_QUEUE",
            (_, -6) => "SI_TKILL",
            (SignalKind::SegFault, 1) => "SEGV_MAPERR",
            (SignalKind::SegFault, 2) => "SEGV_ACCERR",
            (SignalKind::FloatingPointError, 1) => "FPE_INTDIV",
            (SignalKind::FloatingPointError, 2) => "FPE_INTOVF",
            (SignalKind::FloatingPointError, 3) => "FPE_FLTDIV",
            (SignalKind::FloatingPointError, 4) => "FPE_FLTOVF",
            (SignalKind::FloatingPointError, 5) => "FPE_FLTUND",
            (SignalKind::FloatingPointError, 6) => "FPE_FLTRES",
            (SignalKind::FloatingPointError, 7) => "FPE_FLTINV",
            (SignalKind::IllegalInstruction, 1) => "ILL_ILLOPC",
            (SignalKind::IllegalInstruction, 2) => "ILL_ILLOPN",
            (SignalKind::IllegalInstruction, 3) => "ILL_ILLADR",
            (SignalKind::IllegalInstruction, 4) => "ILL_ILLTRP",
            (SignalKind::IllegalInstruction, 5) => "ILL_PRVOPC",
            (SignalKind::BusError, 1) => "BUS_ADRALN",
            (SignalKind::BusError, 2) => "BUS_ADRERR",
            (SignalKind::BusError, 3) => "BUS_OBJERR",
            _ => return None,
        };
        Some(name)
    }

    /// `true` if the signal was sent (kill, raise, abort) rather than caused
    /// by the current instruction.
    pub fn is_user_sent(&self) -> bool
    {
        self.code <= 0
    }
}

/// An unhandled structured exception (Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord
{
    /// `ExceptionCode` of the record (e.g. `0xC0000005`).
    pub code: u32,
    /// Instruction address where the exception was raised.
    pub address: Address,
    /// OS thread id of the faulting thread.
    pub thread_id: u64,
    /// For access violations: the access type and the address touched.
    pub access: Option<(AccessKind, Address)>,
}

/// Kind of memory access that caused an access violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind
{
    /// Read of an inaccessible address.
    Read,
    /// Write to an inaccessible address.
    Write,
    /// Data execution prevention violation.
    Execute,
}

impl AccessKind
{
    /// Decode `ExceptionInformation[0]` of an access violation record.
    pub const fn from_raw(raw: usize) -> Self
    {
        match raw {
            1 => AccessKind::Write,
            8 => AccessKind::Execute,
            _ => AccessKind::Read,
        }
    }
}

impl fmt::Display for AccessKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::Execute => "execute",
        })
    }
}

/// Well-known Windows exception codes.
pub mod exception_codes
{
    /// Invalid memory access.
    pub const ACCESS_VIOLATION: u32 = 0xC000_0005;
    /// The thread used up its stack.
    pub const STACK_OVERFLOW: u32 = 0xC000_00FD;
    /// `__fastfail` / `/GS` cookie check, also raised by aborting runtimes.
    pub const STACK_BUFFER_OVERRUN: u32 = 0xC000_0409;
    /// Integer division by zero.
    pub const INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
    /// Invalid opcode.
    pub const ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
    /// Breakpoint instruction reached without a debugger.
    pub const BREAKPOINT: u32 = 0x8000_0003;
    /// Guard page touched.
    pub const GUARD_PAGE: u32 = 0x8000_0001;
    /// Misaligned data access.
    pub const DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
    /// Page could not be brought in (I/O error on a mapped file).
    pub const IN_PAGE_ERROR: u32 = 0xC000_0006;
    /// Heap corruption detected by the heap manager.
    pub const HEAP_CORRUPTION: u32 = 0xC000_0374;

    /// `EXCEPTION_*` name of a code, if it is one of the above.
    pub fn name(code: u32) -> Option<&'static str>
    {
        Some(match code {
            ACCESS_VIOLATION => "EXCEPTION_ACCESS_VIOLATION",
            STACK_OVERFLOW => "EXCEPTION_STACK_OVERFLOW",
            STACK_BUFFER_OVERRUN => "STATUS_STACK_BUFFER_OVERRUN",
            INT_DIVIDE_BY_ZERO => "EXCEPTION_INT_DIVIDE_BY_ZERO",
            ILLEGAL_INSTRUCTION => "EXCEPTION_ILLEGAL_INSTRUCTION",
            BREAKPOINT => "EXCEPTION_BREAKPOINT",
            GUARD_PAGE => "EXCEPTION_GUARD_PAGE",
            DATATYPE_MISALIGNMENT => "EXCEPTION_DATATYPE_MISALIGNMENT",
            IN_PAGE_ERROR => "EXCEPTION_IN_PAGE_ERROR",
            HEAP_CORRUPTION => "STATUS_HEAP_CORRUPTION",
            _ => return None,
        })
    }
}

/// A fatal failure observed by one of the installed handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureEvent<'a>
{
    /// A panic reached the panic hook.
    UncaughtException(ExceptionInfo<'a>),
    /// A fatal signal reached the signal handler.
    RuntimeSignal(SignalEvent),
    /// A structured exception reached the top-level filter.
    UnhandledFault(FaultRecord),
}

impl FailureEvent<'_>
{
    /// One-line title for the report banner.
    pub fn headline(&self) -> String
    {
        match self {
            FailureEvent::UncaughtException(info) => format!("FATAL: uncaught panic ({})", info.kind),
            FailureEvent::RuntimeSignal(signal) => {
                format!("FATAL SIGNAL: {} ({})", signal.kind.name(), signal.kind.description())
            }
            FailureEvent::UnhandledFault(fault) => match exception_codes::name(fault.code) {
                Some(name) => format!("FATAL EXCEPTION: 0x{:08X} ({name})", fault.code),
                None => format!("FATAL EXCEPTION: 0x{:08X}", fault.code),
            },
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_signal_kind_round_trips_known_signals()
    {
        for kind in [SignalKind::Abort, SignalKind::SegFault, SignalKind::FloatingPointError, SignalKind::IllegalInstruction] {
            assert_eq!(SignalKind::from_signo(kind.signo()), kind);
        }
        assert_eq!(SignalKind::from_signo(1), SignalKind::Other(1));
    }

    #[test]
    fn test_only_instruction_faults_are_synchronous()
    {
        assert!(SignalKind::SegFault.is_synchronous_fault());
        assert!(SignalKind::BusError.is_synchronous_fault());
        assert!(!SignalKind::Abort.is_synchronous_fault());
        assert!(!SignalKind::Other(15).is_synchronous_fault());
    }

    #[test]
    fn test_code_names()
    {
        let segv = SignalEvent {
            kind: SignalKind::SegFault,
            code: 1,
            fault_address: Some(Address::ZERO),
            thread_id: 1,
        };
        assert_eq!(segv.code_name(), Some("SEGV_MAPERR"));
        assert!(!segv.is_user_sent());

        let raised = SignalEvent {
            code: -6,
            ..segv
        };
        assert_eq!(raised.code_name(), Some("SI_TKILL"));
        assert!(raised.is_user_sent());
    }

    #[test]
    fn test_headlines()
    {
        let signal = FailureEvent::RuntimeSignal(SignalEvent {
            kind: SignalKind::SegFault,
            code: 1,
            fault_address: None,
            thread_id: 7,
        });
        assert_eq!(signal.headline(), "FATAL SIGNAL: SIGSEGV (Segmentation fault)");

        let fault = FailureEvent::UnhandledFault(FaultRecord {
            code: exception_codes::ACCESS_VIOLATION,
            address: Address::new(0x1000),
            thread_id: 7,
            access: Some((AccessKind::Write, Address::ZERO)),
        });
        assert_eq!(fault.headline(), "FATAL EXCEPTION: 0xC0000005 (EXCEPTION_ACCESS_VIOLATION)");
    }
}
