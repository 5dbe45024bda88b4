//! # Linux Process Introspection
//!
//! Everything the crash pipeline needs to know about its own process on
//! Linux, gathered without ptrace:
//!
//! - **Modules**: `dl_iterate_phdr` walks the loader's list of mapped ELF
//!   objects. Each entry gives the load bias, the `PT_LOAD` extent and the
//!   `PT_GNU_EH_FRAME` header used by the CFI unwinder.
//! - **Memory**: `process_vm_readv` against our own pid, with `/proc/self/mem`
//!   as the fallback. Either one returns an error for an unmapped address
//!   instead of faulting, which matters when the stack being walked is
//!   corrupt.
//! - **Process status**: `/proc/self/status`, read into a fixed buffer with
//!   raw `open`/`read` so it can run inside a signal handler.
//!
//! ## Known limitation
//!
//! `dl_iterate_phdr` takes the loader lock. A fault raised while another
//! thread (or this one) holds that lock can deadlock module enumeration.

use std::ffi::CStr;
use std::fs::File;
use std::io::IoSliceMut;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU8, Ordering};

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;

use super::MemoryUsage;
use crate::error::{CrashError, CrashResult};
use crate::types::{Address, MappedSection, ModuleInfo};
use crate::unwind::MemoryAccess;

/// Enumerate every ELF object the dynamic loader has mapped.
///
/// The main executable comes first; its loader name is empty, so its path is
/// taken from `/proc/self/exe`.
pub fn loaded_modules() -> Vec<ModuleInfo>
{
    let mut modules: Vec<ModuleInfo> = Vec::with_capacity(64);
    // SAFETY: the callback only touches `modules` through the data pointer,
    // and only while dl_iterate_phdr is running.
    unsafe {
        libc::dl_iterate_phdr(Some(collect_module), std::ptr::addr_of_mut!(modules).cast());
    }
    modules
}

unsafe extern "C" fn collect_module(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut libc::c_void) -> libc::c_int
{
    // SAFETY: dl_iterate_phdr passes a valid info record and our data pointer.
    let (info, modules) = unsafe { (&*info, &mut *data.cast::<Vec<ModuleInfo>>()) };
    if info.dlpi_phdr.is_null() {
        return 0;
    }

    let bias = info.dlpi_addr as u64;
    // SAFETY: the loader guarantees dlpi_phnum headers at dlpi_phdr.
    let headers = unsafe { std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) };

    let mut low = u64::MAX;
    let mut high = 0u64;
    let mut eh_frame_hdr = None;
    for header in headers {
        match header.p_type {
            libc::PT_LOAD => {
                let start = u64::from(header.p_vaddr);
                low = low.min(start);
                high = high.max(start + u64::from(header.p_memsz));
            }
            libc::PT_GNU_EH_FRAME => {
                eh_frame_hdr = Some(MappedSection {
                    address: Address::new(bias.wrapping_add(u64::from(header.p_vaddr))),
                    size: u64::from(header.p_memsz),
                });
            }
            _ => {}
        }
    }
    if low >= high {
        return 0;
    }

    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        // SAFETY: non-null loader names are NUL-terminated.
        unsafe { CStr::from_ptr(info.dlpi_name) }.to_string_lossy().into_owned()
    };
    let path = if name.is_empty() && modules.is_empty() {
        std::fs::read_link("/proc/self/exe")
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/proc/self/exe".to_string())
    } else if name.is_empty() {
        return 0;
    } else {
        name
    };

    modules.push(ModuleInfo {
        path,
        base: Address::new(bias.wrapping_add(low)),
        size: high - low,
        bias,
        eh_frame_hdr,
    });
    0
}

const STYLE_UNPROBED: u8 = 0;
const STYLE_VM_READV: u8 = 1;
const STYLE_PROC_MEM: u8 = 2;

static READ_STYLE: AtomicU8 = AtomicU8::new(STYLE_UNPROBED);

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

    fn vm_readv(address: Address, buf: &mut [u8]) -> Result<usize, nix::Error>
    {
        let remote = [RemoteIoVec {
            base: address.value() as usize,
            len: buf.len(),
        }];
        process_vm_readv(Pid::this(), &mut [IoSliceMut::new(buf)], &remote)
    }

    fn proc_mem(address: Address, buf: &mut [u8]) -> std::io::Result<()>
    {
        File::open("/proc/self/mem")?.read_exact_at(buf, address.value())
    }
}

impl MemoryAccess for SelfMemory
{
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> CrashResult<()>
    {
        if buf.is_empty() {
            return Ok(());
        }
        let style = READ_STYLE.load(Ordering::Relaxed);
        if style != STYLE_PROC_MEM {
            match Self::vm_readv(address, buf) {
                Ok(read) if read == buf.len() => {
                    READ_STYLE.store(STYLE_VM_READV, Ordering::Relaxed);
                    return Ok(());
                }
                Ok(_) | Err(nix::Error::EFAULT) => return Err(CrashError::MemoryRead { address }),
                Err(_) if style == STYLE_VM_READV => return Err(CrashError::MemoryRead { address }),
                // ENOSYS or EPERM: the syscall itself is unavailable here.
                Err(_) => READ_STYLE.store(STYLE_PROC_MEM, Ordering::Relaxed),
            }
        }
        Self::proc_mem(address, buf).map_err(|_| CrashError::MemoryRead { address })
    }
}

/// Values of interest from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatus
{
    /// `VmRSS`, in bytes.
    pub resident: Option<u64>,
    /// `VmHWM`, in bytes.
    pub peak_resident: Option<u64>,
    /// `VmSize`, in bytes.
    pub virtual_size: Option<u64>,
    /// `VmPeak`, in bytes.
    pub peak_virtual: Option<u64>,
    /// `Threads`.
    pub threads: Option<usize>,
}

impl ProcStatus
{
    /// Parse the text of a `status` file. Unknown or malformed lines are skipped.
    pub fn parse(text: &[u8]) -> Self
    {
        let mut status = Self::default();
        for line in text.split(|&byte| byte == b'\n') {
            let Some(colon) = line.iter().position(|&byte| byte == b':') else {
                continue;
            };
            let (key, rest) = line.split_at(colon);
            let value = parse_leading_number(&rest[1..]);
            match key {
                b"VmRSS" => status.resident = value.map(|kb| kb * 1024),
                b"VmHWM" => status.peak_resident = value.map(|kb| kb * 1024),
                b"VmSize" => status.virtual_size = value.map(|kb| kb * 1024),
                b"VmPeak" => status.peak_virtual = value.map(|kb| kb * 1024),
                b"Threads" => status.threads = value.and_then(|count| usize::try_from(count).ok()),
                _ => {}
            }
        }
        status
    }

    /// Read and parse `/proc/self/status` without allocating.
    pub fn read() -> Option<Self>
    {
        let mut buf = [0u8; 4096];
        let len = read_small_file(c"/proc/self/status", &mut buf)?;
        Some(Self::parse(&buf[..len]))
    }
}

fn parse_leading_number(text: &[u8]) -> Option<u64>
{
    let digits: &[u8] = {
        let start = text.iter().position(u8::is_ascii_digit)?;
        let tail = &text[start..];
        let end = tail.iter().position(|byte| !byte.is_ascii_digit()).unwrap_or(tail.len());
        &tail[..end]
    };
    digits
        .iter()
        .try_fold(0u64, |acc, &digit| acc.checked_mul(10)?.checked_add(u64::from(digit - b'0')))
}

/// Read up to `buf.len()` bytes of a file with raw syscalls.
///
/// Returns the number of bytes read, or `None` if the file could not be
/// opened. Safe to call from a signal handler.
pub fn read_small_file(path: &CStr, buf: &mut [u8]) -> Option<usize>
{
    // SAFETY: path is NUL-terminated, buf is valid for writes of its length.
    unsafe {
        let fd = libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC);
        if fd < 0 {
            return None;
        }
        let mut filled = 0usize;
        while filled < buf.len() {
            let read = libc::read(fd, buf[filled..].as_mut_ptr().cast(), buf.len() - filled);
            if read <= 0 {
                break;
            }
            filled += read as usize;
        }
        libc::close(fd);
        Some(filled)
    }
}

/// Resident and virtual memory of the process.
pub fn memory_usage() -> Option<MemoryUsage>
{
    let status = ProcStatus::read()?;
    Some(MemoryUsage {
        resident: status.resident,
        peak_resident: status.peak_resident,
        virtual_size: status.virtual_size,
        peak_virtual: status.peak_virtual,
    })
}

/// Number of threads in the process.
pub fn thread_count() -> Option<usize>
{
    ProcStatus::read()?.threads
}

/// Kernel thread id of the calling thread.
pub fn current_thread_id() -> u64
{
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const STATUS: &[u8] = b"Name:\tcrashkit\nVmPeak:\t   12000 kB\nVmSize:\t   11000 kB\nVmHWM:\t    4400 kB\nVmRSS:\t    4300 kB\nThreads:\t3\n";

    #[test]
    fn test_parse_status()
    {
        let status = ProcStatus::parse(STATUS);
        assert_eq!(status.resident, Some(4300 * 1024));
        assert_eq!(status.peak_resident, Some(4400 * 1024));
        assert_eq!(status.virtual_size, Some(11000 * 1024));
        assert_eq!(status.peak_virtual, Some(12000 * 1024));
        assert_eq!(status.threads, Some(3));
    }

    #[test]
    fn test_parse_status_tolerates_garbage()
    {
        let status = ProcStatus::parse(b"VmRSS:\tnone\nnonsense\nThreads:\n");
        assert_eq!(status, ProcStatus::default());
    }

    #[test]
    fn test_main_executable_is_first_module()
    {
        let modules = loaded_modules();
        assert!(!modules.is_empty());
        let main = &modules[0];
        let exe = std::env::current_exe().unwrap();
        assert_eq!(main.short_name(), exe.file_name().unwrap().to_str().unwrap());
        let here = Address::from_usize(test_main_executable_is_first_module as usize);
        assert!(main.contains(here));
    }

    #[test]
    fn test_self_memory_reads_and_rejects()
    {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = SelfMemory::new();
        let mut buf = [0u8; 8];
        memory
            .read_bytes(Address::from_usize(std::ptr::addr_of!(value) as usize), &mut buf)
            .unwrap();
        assert_eq!(u64::from_ne_bytes(buf), value);

        let err = memory.read_bytes(Address::new(8), &mut buf).unwrap_err();
        assert!(matches!(err, CrashError::MemoryRead { .. }));
    }

    #[test]
    fn test_live_status_has_threads()
    {
        let status = ProcStatus::read().unwrap();
        assert!(status.threads.unwrap_or(0) >= 1);
        assert!(status.resident.is_some());
    }
}
