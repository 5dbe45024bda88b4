//! Process introspection for Unix targets without a dedicated backend.
//!
//! Module enumeration is unavailable, so symbolication degrades to
//! `<unknown>` frames and the walker uses frame pointers only. Memory reads
//! are direct loads after a null and alignment check; a corrupt frame chain
//! can therefore fault inside the handler, which the crash episode guard
//! turns into an immediate hand-off to the previous handler.

use super::MemoryUsage;
use crate::error::{CrashError, CrashResult};
use crate::types::{Address, ModuleInfo};
use crate::unwind::MemoryAccess;

/// No loader introspection on this target.
pub fn loaded_modules() -> Vec<ModuleInfo>
{
    Vec::new()
}

/// Peak resident size from `getrusage`.
pub fn memory_usage() -> Option<MemoryUsage>
{
    let usage = nix::sys::resource::getrusage(nix::sys::resource::UsageWho::RUSAGE_SELF).ok()?;
    let max_rss = u64::try_from(usage.max_rss()).ok()?;
    // macOS reports bytes, the BSDs report kilobytes.
    let peak = if cfg!(target_vendor = "apple") { max_rss } else { max_rss * 1024 };
    Some(MemoryUsage {
        peak_resident: Some(peak),
        ..MemoryUsage::default()
    })
}

/// Not available on this target.
pub fn thread_count() -> Option<usize>
{
    None
}

/// `pthread_self` as an opaque id.
pub fn current_thread_id() -> u64
{
    // SAFETY: no preconditions.
    unsafe { libc::pthread_self() as usize as u64 }
}

/// Direct reads of this process's memory.
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
        let word_sized = buf.len() == std::mem::size_of::<usize>();
        if address.value() < 4096 || (word_sized && !address.is_aligned(buf.len() as u64)) {
            return Err(CrashError::MemoryRead { address });
        }
        let source = address.value() as usize as *const u8;
        for (offset, byte) in buf.iter_mut().enumerate() {
            // SAFETY: best effort; see the module docs.
            *byte = unsafe { source.add(offset).read_volatile() };
        }
        Ok(())
    }
}
