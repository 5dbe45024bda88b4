//! Static hints printed under the report banner.

use crate::types::event::exception_codes;
use crate::types::{ExceptionKind, FailureEvent, SignalKind};

/// What a hint is looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKey
{
    /// Classified panic.
    Exception(ExceptionKind),
    /// Fatal signal.
    Signal(SignalKind),
    /// Windows exception code.
    Fault(u32),
}

impl From<&FailureEvent<'_>> for HintKey
{
    fn from(event: &FailureEvent<'_>) -> Self
    {
        match event {
            FailureEvent::UncaughtException(info) => HintKey::Exception(info.kind),
            FailureEvent::RuntimeSignal(signal) => HintKey::Signal(signal.kind),
            FailureEvent::UnhandledFault(fault) => HintKey::Fault(fault.code),
        }
    }
}

const ALLOCATION_FAILURE: &str = "*** MEMORY ALLOCATION FAILURE ***
This often appears as STATUS_STACK_BUFFER_OVERRUN but is actually
a memory allocation failure. Check system memory and allocation sizes.";

const INVALID_MEMORY: &str = "This means invalid memory access.";

const ILLEGAL_INSTRUCTION: &str =
    "The CPU reached an invalid instruction: an explicit trap (ud2/udf) or a jump through a corrupt pointer.";

/// Hint text for `key`, possibly spanning several lines.
pub const fn hint_for(key: HintKey) -> Option<&'static str>
{
    match key {
        HintKey::Exception(kind) => match kind {
            ExceptionKind::AllocationFailure => Some(ALLOCATION_FAILURE),
            ExceptionKind::OutOfRange => Some("An index or range was outside the bounds of a collection."),
            ExceptionKind::InvalidArgument => Some("A value could not be parsed or converted to the expected type."),
            ExceptionKind::Unknown => Some("The panic payload is not a string; it was raised with panic_any."),
            ExceptionKind::RuntimeFailure => None,
        },
        HintKey::Signal(kind) => match kind {
            SignalKind::Abort => Some("This usually means a panic or a failed runtime check called abort()."),
            SignalKind::SegFault => Some(INVALID_MEMORY),
            SignalKind::FloatingPointError => Some("This usually means an integer division by zero or overflow."),
            SignalKind::IllegalInstruction => Some(ILLEGAL_INSTRUCTION),
            SignalKind::BusError => Some("This means a misaligned access or a mapped file that was truncated."),
            SignalKind::Other(_) => None,
        },
        HintKey::Fault(code) => match code {
            exception_codes::ACCESS_VIOLATION | exception_codes::IN_PAGE_ERROR => Some(INVALID_MEMORY),
            exception_codes::STACK_OVERFLOW => Some("The thread exhausted its stack. Look for unbounded recursion."),
            exception_codes::STACK_BUFFER_OVERRUN => Some(
                "Raised by __fastfail, which aborting runtimes use. This is often a memory
allocation failure or an aborting panic rather than a real buffer overrun.",
            ),
            exception_codes::INT_DIVIDE_BY_ZERO => Some("Integer division by zero."),
            exception_codes::ILLEGAL_INSTRUCTION => Some(ILLEGAL_INSTRUCTION),
            exception_codes::HEAP_CORRUPTION => Some("The heap manager detected corruption: a double free or a write past an allocation."),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_original_wording_is_kept()
    {
        assert_eq!(hint_for(HintKey::Signal(SignalKind::SegFault)), Some("This means invalid memory access."));
        let alloc = hint_for(HintKey::Exception(ExceptionKind::AllocationFailure)).unwrap();
        assert!(alloc.starts_with("*** MEMORY ALLOCATION FAILURE ***"));
        assert!(alloc.contains("STATUS_STACK_BUFFER_OVERRUN"));
    }

    #[test]
    fn test_unmapped_keys_have_no_hint()
    {
        assert_eq!(hint_for(HintKey::Signal(SignalKind::Other(15))), None);
        assert_eq!(hint_for(HintKey::Fault(0xE06D_7363)), None);
        assert_eq!(hint_for(HintKey::Exception(ExceptionKind::RuntimeFailure)), None);
    }

    #[test]
    fn test_fault_codes_share_texts_with_signals()
    {
        assert_eq!(
            hint_for(HintKey::Fault(exception_codes::ACCESS_VIOLATION)),
            hint_for(HintKey::Signal(SignalKind::SegFault))
        );
        assert_eq!(
            hint_for(HintKey::Fault(exception_codes::ILLEGAL_INSTRUCTION)),
            hint_for(HintKey::Signal(SignalKind::IllegalInstruction))
        );
    }
}
