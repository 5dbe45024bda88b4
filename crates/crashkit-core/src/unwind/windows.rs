//! `StackWalk64` over the current process.
//!
//! DbgHelp walks x64 and ARM64 stacks with the unwind tables in each PE
//! image (`.pdata`); on x86 it follows frame pointers and FPO data. The
//! symbol engine must be initialized first so that
//! `SymFunctionTableAccess64` can find those tables.

use std::ffi::c_void;
use std::mem;

use windows_sys::Win32::System::Diagnostics::Debug::{
    AddrModeFlat, StackWalk64, SymFunctionTableAccess64, SymGetModuleBase64, CONTEXT, STACKFRAME64,
};
use windows_sys::Win32::System::SystemInformation::IMAGE_FILE_MACHINE;
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentThread};

use crate::context::CpuContext;
use crate::symbols::dbghelp;
use crate::types::{Address, FrameStatus, StackTrace, MAX_FRAMES};

#[cfg(target_arch = "x86_64")]
const MACHINE: IMAGE_FILE_MACHINE = windows_sys::Win32::System::SystemInformation::IMAGE_FILE_MACHINE_AMD64;
#[cfg(target_arch = "aarch64")]
const MACHINE: IMAGE_FILE_MACHINE = windows_sys::Win32::System::SystemInformation::IMAGE_FILE_MACHINE_ARM64;
#[cfg(target_arch = "x86")]
const MACHINE: IMAGE_FILE_MACHINE = windows_sys::Win32::System::SystemInformation::IMAGE_FILE_MACHINE_I386;

/// Walk the stack described by `context` with DbgHelp.
pub fn walk(context: &CpuContext, max_frames: usize) -> StackTrace
{
    let limit = max_frames.min(MAX_FRAMES);
    let mut trace = StackTrace::empty();
    if limit == 0 {
        return trace;
    }
    // Without a native record there is nothing for StackWalk64 to start from.
    let Some(native) = context.native() else {
        trace.push(context.pc(), context.sp(), FrameStatus::Context);
        return trace;
    };
    if !dbghelp::ensure_initialized() {
        trace.push(context.pc(), context.sp(), FrameStatus::Context);
        return trace;
    }

    // StackWalk64 updates the record in place, so walk a copy.
    let mut record: CONTEXT = *native;
    // SAFETY: STACKFRAME64 is plain data.
    let mut frame: STACKFRAME64 = unsafe { mem::zeroed() };
    frame.AddrPC.Offset = context.pc().value();
    frame.AddrPC.Mode = AddrModeFlat;
    frame.AddrStack.Offset = context.sp().value();
    frame.AddrStack.Mode = AddrModeFlat;
    frame.AddrFrame.Offset = context.fp().value();
    frame.AddrFrame.Mode = AddrModeFlat;

    let _guard = dbghelp::lock();
    // SAFETY: pseudo handles of the current process and thread; record and
    // frame outlive the loop.
    let (process, thread) = unsafe { (GetCurrentProcess(), GetCurrentThread()) };
    let mut last_sp = 0u64;
    while trace.len() < limit {
        let ok = unsafe {
            StackWalk64(
                u32::from(MACHINE),
                process,
                thread,
                &mut frame,
                std::ptr::addr_of_mut!(record).cast::<c_void>(),
                None,
                Some(SymFunctionTableAccess64),
                Some(SymGetModuleBase64),
                None,
            )
        };
        if ok == 0 {
            break;
        }
        let pc = frame.AddrPC.Offset;
        let sp = frame.AddrStack.Offset;
        if pc == 0 || (!trace.is_empty() && sp < last_sp) {
            break;
        }
        let status = if trace.is_empty() {
            FrameStatus::Context
        } else {
            FrameStatus::Platform
        };
        trace.push(Address::new(pc), Address::new(sp), status);
        last_sp = sp;
    }
    trace
}
