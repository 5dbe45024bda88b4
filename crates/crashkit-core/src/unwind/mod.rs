//! # Stack Walker
//!
//! Turns a [`CpuContext`] into an ordered [`StackTrace`] of return
//! addresses, innermost frame first.
//!
//! ## Strategy
//!
//! On Unix every step first tries call frame information from the module's
//! in-memory `.eh_frame` (see [`cfi`]); if the module has none, or the FDE
//! lookup fails, the saved frame-pointer chain is followed instead. On
//! AArch64 a leaf function may not have pushed its frame record yet, so the
//! innermost frame can also fall back to the link register.
//!
//! On Windows the walk is delegated to DbgHelp's `StackWalk64`.
//!
//! ## Termination
//!
//! The walk stops at the first of:
//! - the unwinder has no rule for the caller (outermost frame)
//! - a program counter of zero
//! - a step that does not move the stack pointer upwards (a leaf frame
//!   returning through the link register is the one exception)
//! - [`MAX_FRAMES`] frames
//!
//! Frames are collected into inline storage and the stack is read through
//! [`MemoryAccess`], so a corrupt stack produces a short trace rather than a
//! second fault.

#[cfg(unix)]
pub mod cfi;
#[cfg(windows)]
pub mod windows;

use crate::context::{Architecture, CpuContext};
use crate::error::CrashResult;
use crate::types::{Address, FrameStatus, ModuleInfo, StackTrace, MAX_FRAMES};

/// Read access to the memory of the crashing process.
///
/// Implementations must return an error, not fault, when the range is not
/// readable.
pub trait MemoryAccess
{
    /// Fill `buf` with the bytes at `address`.
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>;

    /// Read one native-endian word of `size` bytes (4 or 8).
    fn read_word(&self, address: Address, size: u64) -> CrashResult<u64>
    {
        if size == 4 {
            let mut buf = [0u8; 4];
            self.read_bytes(address, &mut buf)?;
            Ok(u64::from(u32::from_ne_bytes(buf)))
        } else {
            let mut buf = [0u8; 8];
            self.read_bytes(address, &mut buf)?;
            Ok(u64::from_ne_bytes(buf))
        }
    }
}

/// Capture the trace of the thread described by `context`.
///
/// `None` stands for a failed context capture and yields an empty trace.
/// Loaded modules are enumerated for the CFI lookup; use
/// [`StackUnwinder`] directly to reuse an existing module list.
pub fn capture_trace(context: Option<&CpuContext>, max_frames: usize) -> StackTrace
{
    if context.is_none() {
        return StackTrace::empty();
    }
    capture_trace_in(context, &crate::platform::loaded_modules(), max_frames)
}

/// Like [`capture_trace`], over a module list the caller already holds.
pub fn capture_trace_in(context: Option<&CpuContext>, modules: &[ModuleInfo], max_frames: usize) -> StackTrace
{
    let Some(context) = context else {
        return StackTrace::empty();
    };

    #[cfg(windows)]
    {
        let _ = modules;
        windows::walk(context, max_frames)
    }

    #[cfg(not(windows))]
    {
        let memory = crate::platform::SelfMemory::new();
        StackUnwinder::new(modules, &memory).unwind(context, max_frames)
    }
}

/// CFI-driven stack unwinder with a frame-pointer fallback.
pub struct StackUnwinder<'a, M>
{
    architecture: Architecture,
    modules: &'a [ModuleInfo],
    memory: &'a M,
}

impl<'a, M: MemoryAccess> StackUnwinder<'a, M>
{
    /// Unwinder over the given modules and memory.
    pub fn new(modules: &'a [ModuleInfo], memory: &'a M) -> Self
    {
        Self {
            architecture: Architecture::current(),
            modules,
            memory,
        }
    }

    /// Walk from `context` outwards, collecting at most `max_frames`
    /// (and never more than [`MAX_FRAMES`]) frames.
    pub fn unwind(&self, context: &CpuContext, max_frames: usize) -> StackTrace
    {
        let limit = max_frames.min(MAX_FRAMES);
        let mut trace = StackTrace::empty();
        if limit == 0 || context.pc().is_null() {
            return trace;
        }

        let mut cursor = context.clone();
        let mut status = FrameStatus::Context;
        trace.push(cursor.pc(), cursor.sp(), status);

        while trace.len() < limit {
            let innermost = status == FrameStatus::Context;
            let Some(step) = self.unwind_once(&cursor, innermost) else {
                break;
            };

            if step.next.pc().is_null() {
                break;
            }
            // The stack grows down, so every caller's frame lives higher up.
            // Only a leaf (innermost, no frame yet) may return with sp unchanged.
            let progressed = step.next.sp() > cursor.sp()
                || (innermost && step.next.sp() == cursor.sp() && step.next.pc() != cursor.pc());
            if !progressed {
                break;
            }

            cursor = step.next;
            status = step.status;
            trace.push(cursor.pc(), cursor.sp(), status);
        }

        trace
    }

    fn unwind_once(&self, cursor: &CpuContext, innermost: bool) -> Option<UnwindStep>
    {
        #[cfg(unix)]
        {
            match cfi::step(self.modules, self.memory, cursor, innermost) {
                cfi::CfiStep::Unwound(next) => {
                    return Some(UnwindStep {
                        next,
                        status: FrameStatus::Cfi,
                    })
                }
                // The unwind info says this is the outermost frame.
                cfi::CfiStep::Outermost => return None,
                cfi::CfiStep::NoInfo => {}
            }
        }
        #[cfg(not(unix))]
        let _ = self.modules;

        self.frame_pointer_fallback(cursor)
            .or_else(|| self.link_register_fallback(cursor, innermost))
    }

    fn frame_pointer_fallback(&self, cursor: &CpuContext) -> Option<UnwindStep>
    {
        if self.architecture == Architecture::Unknown {
            return None;
        }
        let word = self.architecture.pointer_size();
        let fp = cursor.fp();
        if fp.is_null() || !fp.is_aligned(word) {
            return None;
        }

        // Frame record layout on all three targets: [fp] = caller's fp,
        // [fp + word] = return address.
        let saved_fp = self.memory.read_word(fp, word).ok()?;
        let return_address = self.memory.read_word(fp + word, word).ok()?;
        if saved_fp != 0 && saved_fp <= fp.value() {
            return None;
        }

        let mut next = cursor.clone();
        next.set_pc(Address::new(return_address));
        next.set_register(self.architecture.sp_register(), fp.value() + 2 * word);
        next.set_register(self.architecture.fp_register(), saved_fp);
        Some(UnwindStep {
            next,
            status: FrameStatus::FramePointer,
        })
    }

    fn link_register_fallback(&self, cursor: &CpuContext, innermost: bool) -> Option<UnwindStep>
    {
        if !innermost || self.architecture != Architecture::Aarch64 {
            return None;
        }
        let lr = cursor.lr()?;
        if lr.is_null() || lr == cursor.pc() {
            return None;
        }

        // A leaf has not moved sp or fp, so only the pc changes.
        let mut next = cursor.clone();
        next.set_pc(lr);
        next.clear_register(30);
        Some(UnwindStep {
            next,
            status: FrameStatus::FramePointer,
        })
    }
}

struct UnwindStep
{
    next: CpuContext,
    status: FrameStatus,
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;
    use crate::error::CrashError;

    /// Sparse fake memory for exercising the frame-pointer walk.
    #[derive(Default)]
    struct FakeStack
    {
        words: HashMap<u64, u64>,
    }

    impl FakeStack
    {
        fn with_record(mut self, fp: u64, saved_fp: u64, return_address: u64) -> Self
        {
            self.words.insert(fp, saved_fp);
            self.words.insert(fp + 8, return_address);
            self
        }
    }

    impl MemoryAccess for FakeStack
    {
        fn read_bytes(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>
        {
            let word = self
                .words
                .get(&address.value())
                .ok_or(CrashError::MemoryRead { address })?;
            let bytes = word.to_ne_bytes();
            buf.copy_from_slice(&bytes[..buf.len()]);
            Ok(())
        }
    }

    fn context(pc: u64, sp: u64, fp: u64) -> CpuContext
    {
        CpuContext::from_parts(Architecture::current(), Address::new(pc), Address::new(sp), Address::new(fp))
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn test_frame_pointer_chain()
    {
        let memory = FakeStack::default()
            .with_record(0x7000, 0x7100, 0x4000_1000)
            .with_record(0x7100, 0x7200, 0x4000_2000)
            .with_record(0x7200, 0, 0x4000_3000);
        let trace = StackUnwinder::new(&[], &memory).unwind(&context(0x4000_0000, 0x6f00, 0x7000), MAX_FRAMES);

        let addresses: Vec<u64> = trace.addresses().map(Address::value).collect();
        assert_eq!(addresses, vec![0x4000_0000, 0x4000_1000, 0x4000_2000, 0x4000_3000]);
        assert_eq!(trace.frames()[0].status, FrameStatus::Context);
        assert_eq!(trace.frames()[1].status, FrameStatus::FramePointer);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn test_walk_stops_on_cycle()
    {
        // A record pointing back at itself must not loop.
        let memory = FakeStack::default()
            .with_record(0x7000, 0x7100, 0x4000_1000)
            .with_record(0x7100, 0x7000, 0x4000_2000);
        let trace = StackUnwinder::new(&[], &memory).unwind(&context(0x4000_0000, 0x6f00, 0x7000), MAX_FRAMES);
        assert!(trace.len() <= 3);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn test_walk_respects_requested_limit()
    {
        let mut memory = FakeStack::default();
        for i in 0..100u64 {
            let fp = 0x10_0000 + i * 0x100;
            memory = memory.with_record(fp, fp + 0x100, 0x4000_0000 + i);
        }
        let start = context(0x4000_0000, 0xf_0000, 0x10_0000);
        assert_eq!(StackUnwinder::new(&[], &memory).unwind(&start, 5).len(), 5);
        assert_eq!(StackUnwinder::new(&[], &memory).unwind(&start, 500).len(), MAX_FRAMES);
    }

    #[test]
    fn test_missing_context_gives_empty_trace()
    {
        assert!(capture_trace(None, MAX_FRAMES).is_empty());
    }

    #[test]
    fn test_unreadable_frame_ends_walk()
    {
        let memory = FakeStack::default();
        let trace = StackUnwinder::new(&[], &memory).unwind(&context(0x4000_0000, 0x6f00, 0x7000), MAX_FRAMES);
        assert_eq!(trace.len(), 1);
    }
}
