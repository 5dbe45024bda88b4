//! # Platform Adapters
//!
//! Per-OS process introspection used by the reporter, the walker and the
//! dump writer. Each backend exposes the same free functions and a
//! `SelfMemory` reader:
//!
//! - **linux**: `dl_iterate_phdr`, `process_vm_readv`, `/proc/self/status`
//! - **windows**: Toolhelp32, `ReadProcessMemory`, `GetProcessMemoryInfo`
//! - **fallback**: other Unix targets, with no module enumeration
//!
//! The handler-side adapters (signal handlers, the unhandled exception
//! filter) live in [`crate::handlers`], next to the registry they report to.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux::{current_thread_id, loaded_modules, memory_usage, thread_count, SelfMemory};

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
pub use windows::{current_thread_id, loaded_modules, memory_usage, thread_count, SelfMemory};

#[cfg(all(unix, not(target_os = "linux")))]
pub mod fallback;
#[cfg(all(unix, not(target_os = "linux")))]
pub use fallback::{current_thread_id, loaded_modules, memory_usage, thread_count, SelfMemory};

/// Memory figures of the process, each best-effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage
{
    /// Resident set / working set, in bytes.
    pub resident: Option<u64>,
    /// Peak resident set / working set, in bytes.
    pub peak_resident: Option<u64>,
    /// Virtual size / commit charge, in bytes.
    pub virtual_size: Option<u64>,
    /// Peak virtual size / commit charge, in bytes.
    pub peak_virtual: Option<u64>,
}

/// Name of the target OS, for messages.
pub const fn os_name() -> &'static str
{
    if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(windows) {
        "windows"
    } else if cfg!(target_vendor = "apple") {
        "macos"
    } else {
        "unix"
    }
}
