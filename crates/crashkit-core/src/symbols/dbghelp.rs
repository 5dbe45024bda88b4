//! DbgHelp symbol engine for the current process.
//!
//! DbgHelp is single-threaded: every call must hold [`lock`]. The engine is
//! initialized on first use and never cleaned up, so later crashes reuse the
//! loaded PDB information.

use std::ffi::CStr;
use std::mem;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use tracing::warn;
use windows_sys::Win32::System::Diagnostics::Debug::{
    SymFromAddr, SymGetLineFromAddr64, SymInitialize, SymSetOptions, IMAGEHLP_LINE64, SYMBOL_INFO,
    SYMOPT_DEFERRED_LOADS, SYMOPT_FAIL_CRITICAL_ERRORS, SYMOPT_LOAD_LINES, SYMOPT_UNDNAME,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use super::demangle::undecorated_symbol_name;
use crate::types::{Address, SourceLocation, SymbolName};

const MAX_NAME_LEN: usize = 1024;

static ENGINE: Mutex<()> = Mutex::new(());
static INITIALIZED: OnceCell<bool> = OnceCell::new();

/// Serialize access to DbgHelp. A poisoned lock is still usable.
pub fn lock() -> MutexGuard<'static, ()>
{
    ENGINE.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Initialize the symbol engine once. Returns `false` if that failed.
pub fn ensure_initialized() -> bool
{
    *INITIALIZED.get_or_init(|| {
        let _guard = lock();
        // SAFETY: plain DbgHelp calls on our own process pseudo handle.
        unsafe {
            SymSetOptions(SYMOPT_UNDNAME | SYMOPT_LOAD_LINES | SYMOPT_DEFERRED_LOADS | SYMOPT_FAIL_CRITICAL_ERRORS);
            let ok = SymInitialize(GetCurrentProcess(), std::ptr::null(), 1) != 0;
            if !ok && !crate::handlers::in_failure_path() {
                warn!("SymInitialize failed, frames will show module offsets only");
            }
            ok
        }
    })
}

#[repr(C)]
struct SymbolBuffer
{
    info: SYMBOL_INFO,
    name: [u8; MAX_NAME_LEN],
}

/// Name and, when available, source line of the function at `address`.
pub fn resolve(address: Address) -> Option<(SymbolName, Option<SourceLocation>)>
{
    if !ensure_initialized() {
        return None;
    }
    let _guard = lock();
    // SAFETY: pseudo handle of the current process.
    let process = unsafe { GetCurrentProcess() };

    // SAFETY: SYMBOL_INFO is plain data; the trailing buffer holds MaxNameLen bytes.
    let mut buffer: SymbolBuffer = unsafe { mem::zeroed() };
    buffer.info.SizeOfStruct = mem::size_of::<SYMBOL_INFO>() as u32;
    buffer.info.MaxNameLen = MAX_NAME_LEN as u32;
    let mut displacement = 0u64;
    if unsafe { SymFromAddr(process, address.value(), &mut displacement, &mut buffer.info) } == 0 {
        return None;
    }
    let name_len = (buffer.info.NameLen as usize).min(MAX_NAME_LEN);
    // SAFETY: Name is the first byte of a run of NameLen bytes inside buffer.
    let name_bytes =
        unsafe { std::slice::from_raw_parts(std::ptr::addr_of!(buffer.info.Name).cast::<u8>(), name_len) };
    let name = undecorated_symbol_name(String::from_utf8_lossy(name_bytes).into_owned());

    // SAFETY: IMAGEHLP_LINE64 is plain data with SizeOfStruct set.
    let mut line: IMAGEHLP_LINE64 = unsafe { mem::zeroed() };
    line.SizeOfStruct = mem::size_of::<IMAGEHLP_LINE64>() as u32;
    let mut line_displacement = 0u32;
    let location = (unsafe { SymGetLineFromAddr64(process, address.value(), &mut line_displacement, &mut line) }
        != 0
        && !line.FileName.is_null())
    .then(|| {
        // SAFETY: DbgHelp returns a NUL-terminated file name it owns until the next call.
        let file = unsafe { CStr::from_ptr(line.FileName.cast()) }.to_string_lossy().into_owned();
        SourceLocation::new(file, Some(line.LineNumber))
    });

    Some((name, location))
}
