//! # Windows Process Introspection
//!
//! Module, memory and thread information for the current process, gathered
//! with Toolhelp32 snapshots and `GetProcessMemoryInfo`. Memory reads go
//! through `ReadProcessMemory` on our own process handle, which fails cleanly
//! on unmapped pages.

use std::ffi::c_void;
use std::mem;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Thread32First, Thread32Next, MODULEENTRY32W,
    TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows_sys::Win32::System::ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentProcessId, GetCurrentThreadId};

use super::MemoryUsage;
use crate::error::{CrashError, CrashResult};
use crate::types::{Address, ModuleInfo};
use crate::unwind::MemoryAccess;

/// Closes a Win32 handle on drop.
pub(crate) struct OwnedHandle(HANDLE);

impl OwnedHandle
{
    /// Take ownership of a handle, rejecting null and `INVALID_HANDLE_VALUE`.
    pub(crate) fn new(handle: HANDLE, operation: &'static str) -> CrashResult<Self>
    {
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return Err(last_error(operation));
        }
        Ok(Self(handle))
    }

    pub(crate) fn raw(&self) -> HANDLE
    {
        self.0
    }
}

impl Drop for OwnedHandle
{
    fn drop(&mut self)
    {
        // SAFETY: the handle is owned and still open.
        unsafe { CloseHandle(self.0) };
    }
}

/// Wrap `GetLastError()` for a failed API call.
pub(crate) fn last_error(operation: &'static str) -> CrashError
{
    // SAFETY: no preconditions.
    let code = unsafe { GetLastError() };
    CrashError::Win32 { operation, code }
}

/// Decode a NUL-terminated UTF-16 buffer.
pub(crate) fn from_wide(buffer: &[u16]) -> String
{
    let len = buffer.iter().position(|&unit| unit == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// Encode a string as NUL-terminated UTF-16.
pub(crate) fn to_wide(text: &str) -> Vec<u16>
{
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Enumerate the modules loaded in this process, the executable first.
pub fn loaded_modules() -> Vec<ModuleInfo>
{
    snapshot_modules().unwrap_or_default()
}

fn snapshot_modules() -> CrashResult<Vec<ModuleInfo>>
{
    // SAFETY: snapshot of our own process.
    let snapshot = OwnedHandle::new(
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, GetCurrentProcessId()) },
        "CreateToolhelp32Snapshot",
    )?;

    let mut modules = Vec::new();
    // SAFETY: MODULEENTRY32W is plain data with dwSize set before use.
    let mut entry: MODULEENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<MODULEENTRY32W>() as u32;

    let mut more = unsafe { Module32FirstW(snapshot.raw(), &mut entry) } != 0;
    while more {
        let base = entry.modBaseAddr as usize as u64;
        modules.push(ModuleInfo {
            path: from_wide(&entry.szExePath),
            base: Address::new(base),
            size: u64::from(entry.modBaseSize),
            bias: base,
            eh_frame_hdr: None,
        });
        more = unsafe { Module32NextW(snapshot.raw(), &mut entry) } != 0;
    }
    Ok(modules)
}

/// Working set and commit charge of the process.
pub fn memory_usage() -> Option<MemoryUsage>
{
    // SAFETY: counters are plain data, cb matches their size.
    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { mem::zeroed() };
    counters.cb = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
    let ok = unsafe { GetProcessMemoryInfo(GetCurrentProcess(), &mut counters, counters.cb) };
    if ok == 0 {
        return None;
    }
    Some(MemoryUsage {
        resident: Some(counters.WorkingSetSize as u64),
        peak_resident: Some(counters.PeakWorkingSetSize as u64),
        virtual_size: Some(counters.PagefileUsage as u64),
        peak_virtual: Some(counters.PeakPagefileUsage as u64),
    })
}

/// Number of threads owned by this process.
pub fn thread_count() -> Option<usize>
{
    // SAFETY: system-wide thread snapshot, filtered by owner below.
    let snapshot = OwnedHandle::new(unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }, "CreateToolhelp32Snapshot").ok()?;
    let pid = unsafe { GetCurrentProcessId() };

    let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;
    let mut count = 0usize;
    let mut more = unsafe { Thread32First(snapshot.raw(), &mut entry) } != 0;
    while more {
        if entry.th32OwnerProcessID == pid {
            count += 1;
        }
        more = unsafe { Thread32Next(snapshot.raw(), &mut entry) } != 0;
    }
    Some(count)
}

/// Win32 thread id of the calling thread.
pub fn current_thread_id() -> u64
{
    // SAFETY: no preconditions.
    u64::from(unsafe { GetCurrentThreadId() })
}

/// Fault-tolerant reads of this process's own memory.
#[derive(Debug, Default)]
pub struct SelfMemory
{
    _private: (),
}

impl SelfMemory
{
    /// Reader for the current process.
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl MemoryAccess for SelfMemory
{
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>
    {
        let mut read = 0usize;
        // SAFETY: buf is valid for buf.len() bytes; the source is validated by the kernel.
        let ok = unsafe {
            ReadProcessMemory(
                GetCurrentProcess(),
                address.value() as usize as *const c_void,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut read,
            )
        };
        if ok == 0 || read != buf.len() {
            return Err(CrashError::MemoryRead { address });
        }
        Ok(())
    }
}
