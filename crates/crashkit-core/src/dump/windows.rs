//! `MiniDumpWriteDump` backend.

use std::fs::File;
use std::os::windows::io::AsRawHandle;
use std::ptr;

use windows_sys::Win32::Foundation::FALSE;
use windows_sys::Win32::System::Diagnostics::Debug::{
    MiniDumpNormal, MiniDumpWithFullMemory, MiniDumpWithFullMemoryInfo, MiniDumpWithHandleData,
    MiniDumpWithThreadInfo, MiniDumpWithUnloadedModules, MiniDumpWriteDump, MINIDUMP_EXCEPTION_INFORMATION,
    MINIDUMP_TYPE,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentProcessId};

use super::{DumpOptions, DumpRequest};
use crate::error::CrashResult;
use crate::platform::windows::last_error;

/// `MINIDUMP_TYPE` flags for `options`.
pub fn minidump_type(options: DumpOptions) -> MINIDUMP_TYPE
{
    [
        (DumpOptions::FULL_MEMORY, MiniDumpWithFullMemory),
        (DumpOptions::HANDLE_DATA, MiniDumpWithHandleData),
        (DumpOptions::THREAD_INFO, MiniDumpWithThreadInfo),
        (DumpOptions::UNLOADED_MODULES, MiniDumpWithUnloadedModules),
        (DumpOptions::FULL_MEMORY_INFO, MiniDumpWithFullMemoryInfo),
    ]
    .into_iter()
    .filter(|(option, _)| options.contains(*option))
    .fold(MiniDumpNormal, |flags, (_, flag)| flags | flag)
}

/// Write the dump of the current process into `file`.
///
/// The exception record is attached only when the request carries the
/// pointers of a real fault; a manual dump has none.
pub fn write(file: &mut File, request: &DumpRequest<'_>) -> CrashResult<()>
{
    let fault = &request.fault_context;
    let exception = MINIDUMP_EXCEPTION_INFORMATION {
        ThreadId: fault.thread_id as u32,
        ExceptionPointers: fault.exception_pointers.cast_mut(),
        ClientPointers: FALSE,
    };
    let exception_param = if fault.exception_pointers.is_null() {
        ptr::null()
    } else {
        &exception as *const MINIDUMP_EXCEPTION_INFORMATION
    };

    // SAFETY: the file handle is open for writing for the duration of the
    // call, and exception_param is null or points at a live local.
    let ok = unsafe {
        MiniDumpWriteDump(
            GetCurrentProcess(),
            GetCurrentProcessId(),
            file.as_raw_handle(),
            minidump_type(request.options),
            exception_param,
            ptr::null(),
            ptr::null(),
        )
    };
    if ok == FALSE {
        return Err(last_error("MiniDumpWriteDump"));
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_minidump_type_mapping()
    {
        assert_eq!(minidump_type(DumpOptions::empty()), MiniDumpNormal);
        assert_eq!(
            minidump_type(DumpOptions::FULL_MEMORY | DumpOptions::HANDLE_DATA),
            MiniDumpWithFullMemory | MiniDumpWithHandleData
        );
        let all = minidump_type(DumpOptions::all());
        assert_ne!(all & MiniDumpWithFullMemoryInfo, 0);
        assert_ne!(all & MiniDumpWithUnloadedModules, 0);
    }
}
