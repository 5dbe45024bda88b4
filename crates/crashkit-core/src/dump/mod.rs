//! # Dump Writer
//!
//! Persists a snapshot of the crashing process to a minidump file that
//! WinDbg, Visual Studio or `minidump-stackwalk` can open.
//!
//! ## Backends
//!
//! - **Windows**: `MiniDumpWriteDump` from DbgHelp, with the exception
//!   pointers of the unhandled fault.
//! - **Linux**: an in-process writer ([`minidump`]) that emits system info,
//!   the faulting thread with its context and stack, the module list, the
//!   exception record, memory ranges and a few `/proc/self` files.
//! - Other targets report [`crate::error::CrashError::DumpUnsupported`].
//!
//! ## File naming
//!
//! Dumps are named `<prefix>_<YYYYMMDD>_<HHMMSS>.dmp` after the local time,
//! inside the configured directory (see [`default_dump_directory`]).
//!
//! Every step is narrated on the sink as a `[DUMP]` line. A failure is
//! reported and returned, and never changes how the fault propagates.

#[cfg(target_os = "linux")]
pub mod minidump;
#[cfg(windows)]
pub mod windows;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::context::CpuContext;
use crate::error::CrashResult;
use crate::handlers::in_failure_path;
use crate::types::SignalEvent;

/// Environment variable that overrides the dump directory.
pub const DUMP_DIR_ENV: &str = "CRASHKIT_DUMP_DIR";

bitflags! {
    /// What a dump should contain.
    ///
    /// On Windows these map one-to-one to `MINIDUMP_TYPE` flags. The Linux
    /// writer honors `FULL_MEMORY`; the remaining streams it writes are
    /// always present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DumpOptions: u32 {
        /// All readable memory of the process.
        const FULL_MEMORY = 1 << 0;
        /// Open handles.
        const HANDLE_DATA = 1 << 1;
        /// Thread times and affinity.
        const THREAD_INFO = 1 << 2;
        /// Recently unloaded modules.
        const UNLOADED_MODULES = 1 << 3;
        /// Layout and protection of every memory region.
        const FULL_MEMORY_INFO = 1 << 4;
    }
}

impl Default for DumpOptions
{
    fn default() -> Self
    {
        Self::all()
    }
}

/// The fault a dump is written for.
#[derive(Debug, Clone, Copy)]
pub struct FaultContext<'a>
{
    /// Registers of the faulting thread, if known.
    pub cpu: Option<&'a CpuContext>,
    /// The signal being handled (Unix).
    pub signal: Option<&'a SignalEvent>,
    /// `EXCEPTION_POINTERS` of the unhandled fault (Windows).
    #[cfg(windows)]
    pub exception_pointers: *const windows_sys::Win32::System::Diagnostics::Debug::EXCEPTION_POINTERS,
    /// OS id of the faulting thread.
    pub thread_id: u64,
}

impl<'a> FaultContext<'a>
{
    /// No fault: a dump requested while the process is healthy.
    pub fn manual(cpu: Option<&'a CpuContext>) -> Self
    {
        Self {
            cpu,
            signal: None,
            #[cfg(windows)]
            exception_pointers: std::ptr::null(),
            thread_id: crate::platform::current_thread_id(),
        }
    }
}

/// Everything [`write_dump`] needs.
#[derive(Debug, Clone)]
pub struct DumpRequest<'a>
{
    pub target_path: PathBuf,
    pub fault_context: FaultContext<'a>,
    pub options: DumpOptions,
}

/// `<dir>/<prefix>_<YYYYMMDD>_<HHMMSS>.dmp`
pub fn dump_file_path(dir: &Path, prefix: &str, now: NaiveDateTime) -> PathBuf
{
    dir.join(format!("{prefix}_{}.dmp", now.format("%Y%m%d_%H%M%S")))
}

/// Where dumps go when no directory was configured.
///
/// `CRASHKIT_DUMP_DIR` wins; otherwise `%LOCALAPPDATA%\<prefix>\CrashDumps`
/// on Windows, `$XDG_STATE_HOME/<prefix>/crash-dumps` or
/// `$HOME/.<prefix>/crash-dumps` on Unix, and `./CrashDumps` as the last
/// resort.
pub fn default_dump_directory(prefix: &str) -> PathBuf
{
    let var = |name: &str| std::env::var_os(name).filter(|value| !value.is_empty()).map(PathBuf::from);

    if let Some(dir) = var(DUMP_DIR_ENV) {
        return dir;
    }
    if cfg!(windows) {
        if let Some(local) = var("LOCALAPPDATA") {
            return local.join(prefix).join("CrashDumps");
        }
    } else if let Some(state) = var("XDG_STATE_HOME") {
        return state.join(prefix).join("crash-dumps");
    } else if let Some(home) = var("HOME") {
        return home.join(format!(".{prefix}")).join("crash-dumps");
    }
    PathBuf::from(".").join("CrashDumps")
}

/// Write the dump described by `request`, narrating each step on `sink`.
///
/// Inside a failure episode the sink is the only output; the outcome is not
/// also logged through `tracing`.
pub fn write_dump<W: Write>(request: &DumpRequest<'_>, sink: &mut W) -> CrashResult<PathBuf>
{
    write_dump_logged(request, sink, !in_failure_path())
}

fn write_dump_logged<W: Write>(request: &DumpRequest<'_>, sink: &mut W, log_outcome: bool) -> CrashResult<PathBuf>
{
    let path = &request.target_path;
    let result = write_steps(request, sink);
    match &result {
        Ok(bytes) => {
            let _ = writeln!(sink, "[DUMP] Dump written successfully: {} ({bytes} bytes)", path.display());
            let _ = writeln!(sink, "[DUMP] Analyze with: {} \"{}\"", analyzer_command(), path.display());
            if log_outcome {
                info!(path = %path.display(), bytes, "crash dump written");
            }
        }
        Err(err) => {
            let _ = writeln!(sink, "[DUMP] Failed to write dump: {err}");
            if log_outcome {
                warn!(path = %path.display(), error = %err, "crash dump failed");
            }
        }
    }
    result.map(|_| path.clone())
}

fn write_steps<W: Write>(request: &DumpRequest<'_>, sink: &mut W) -> CrashResult<u64>
{
    let path = &request.target_path;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        let _ = writeln!(sink, "[DUMP] Creating directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    let _ = writeln!(sink, "[DUMP] Writing dump to: {}", path.display());
    let mut file = File::create(path)?;
    write_platform_dump(&mut file, request)?;

    let _ = writeln!(sink, "[DUMP] Closing dump file");
    file.sync_all()?;
    let bytes = file.metadata()?.len();
    drop(file);
    Ok(bytes)
}

#[cfg(target_os = "linux")]
fn write_platform_dump(file: &mut File, request: &DumpRequest<'_>) -> CrashResult<()>
{
    minidump::write(file, request)
}

#[cfg(windows)]
fn write_platform_dump(file: &mut File, request: &DumpRequest<'_>) -> CrashResult<()>
{
    windows::write(file, request)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn write_platform_dump(_file: &mut File, _request: &DumpRequest<'_>) -> CrashResult<()>
{
    Err(crate::error::CrashError::DumpUnsupported(crate::platform::os_name()))
}

const fn analyzer_command() -> &'static str
{
    if cfg!(windows) {
        "windbg -z"
    } else {
        "minidump-stackwalk"
    }
}

/// Write a dump of the current state of the process, on demand.
///
/// The dump goes to `directory`, or to the directory the dump handler was
/// installed with, or to [`default_dump_directory`]. Only memory is
/// requested, matching a dump taken from a healthy process.
pub fn write_dump_now(directory: Option<&Path>) -> CrashResult<PathBuf>
{
    let (directory, prefix) = crate::handlers::HandlerRegistry::global().dump_location(directory);

    let mut sink = crate::report::DiagnosticSink::stderr();
    let _ = writeln!(sink, "[DUMP] Manual dump requested");

    let cpu = CpuContext::current();
    let request = DumpRequest {
        target_path: dump_file_path(&directory, &prefix, Local::now().naive_local()),
        fault_context: FaultContext::manual(cpu.as_ref()),
        options: DumpOptions::FULL_MEMORY,
    };
    write_dump(&request, &mut sink)
}
