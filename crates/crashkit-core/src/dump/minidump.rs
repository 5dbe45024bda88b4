//! # Linux Minidump Writer
//!
//! Writes a Breakpad-compatible minidump of the current process from
//! inside the process.
//!
//! ## Layout
//!
//! ```text
//! +--------+-----------+---------------------------+-----------------+
//! | header | directory | stream bodies and strings | Memory64 ranges |
//! +--------+-----------+---------------------------+-----------------+
//! ```
//!
//! Everything up to the memory ranges is built in one buffer and written in
//! a single call; the ranges of a full-memory dump are then streamed from the
//! live address space in chunks, so the buffer never holds the heap.
//!
//! ## Streams
//!
//! | stream            | content                                        |
//! |-------------------|------------------------------------------------|
//! | `ThreadList`      | the faulting (or calling) thread, with context |
//! | `ModuleList`      | every loaded image                             |
//! | `MemoryList`      | the stack of that thread                       |
//! | `Exception`       | signal number, code and address, if a fault    |
//! | `SystemInfo`      | architecture, CPU count, kernel version        |
//! | `Memory64List`    | readable private mappings (`FULL_MEMORY`)      |
//! | `LinuxProcStatus` | `/proc/self/status`                            |
//! | `LinuxCmdLine`    | `/proc/self/cmdline`                           |
//! | `LinuxMaps`       | `/proc/self/maps`                              |
//!
//! Record layouts and stream identifiers come from `minidump-common`; the
//! fields are written little-endian with `scroll`.

use std::ffi::CStr;
use std::fs::{self, File};
use std::io::{self, Write};

use minidump_common::format::{self as md, MINIDUMP_STREAM_TYPE as StreamType};
use scroll::ctx::{SizeWith, TryIntoCtx};
use scroll::{Endian, Pwrite, LE};

use super::{DumpOptions, DumpRequest};
use crate::context::{Architecture, CpuContext};
use crate::error::{CrashError, CrashResult};
use crate::platform::SelfMemory;
use crate::types::{Address, ModuleInfo};
use crate::unwind::MemoryAccess;

/// Bytes below the stack pointer that may still be live (the x86-64 red zone).
const RED_ZONE: u64 = 128;
/// Upper bound on the stack copied for the thread.
const MAX_STACK_BYTES: u64 = 64 * 1024;
/// Chunk size for streaming memory ranges.
const COPY_CHUNK: usize = 64 * 1024;
/// Room in the directory; only the streams actually written are counted.
const MAX_STREAMS: usize = 12;

const MEMORY_DESCRIPTOR64_SIZE: usize = 16;

/// Where a blob lives in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Location
{
    size: u32,
    rva: u32,
}

/// One directory entry.
#[derive(Debug, Clone, Copy)]
struct Stream
{
    kind: u32,
    location: Location,
}

impl Stream
{
    fn new(kind: StreamType, location: Location) -> Self
    {
        Self {
            kind: kind as u32,
            location,
        }
    }
}

/// The part of the dump that is assembled in memory.
#[derive(Debug, Default)]
struct DumpBuffer
{
    bytes: Vec<u8>,
}

impl DumpBuffer
{
    fn position(&self) -> usize
    {
        self.bytes.len()
    }

    /// Zero-filled space for `len` bytes, 8-byte aligned.
    fn reserve(&mut self, len: usize) -> CrashResult<Location>
    {
        let aligned = self.bytes.len().next_multiple_of(8);
        self.bytes.resize(aligned + len, 0);
        Ok(Location {
            size: to_u32(len)?,
            rva: to_u32(aligned)?,
        })
    }

    fn append(&mut self, data: &[u8]) -> CrashResult<Location>
    {
        let location = self.reserve(data.len())?;
        let start = location.rva as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(location)
    }

    /// `MINIDUMP_STRING`: byte length, UTF-16LE text, NUL.
    fn append_string(&mut self, text: &str) -> CrashResult<u32>
    {
        let units: Vec<u16> = text.encode_utf16().collect();
        let location = self.reserve(4 + (units.len() + 1) * 2)?;
        let mut offset = location.rva as usize;
        offset = self.put(offset, to_u32(units.len() * 2)?)?;
        for unit in units {
            offset = self.put(offset, unit)?;
        }
        Ok(location.rva)
    }

    /// Write `value` at `offset`, returning the offset just past it.
    fn put<T>(&mut self, offset: usize, value: T) -> CrashResult<usize>
    where
        T: TryIntoCtx<Endian, Error = scroll::Error>,
    {
        let written = self.bytes.as_mut_slice().pwrite_with(value, offset, LE).map_err(encode_error)?;
        Ok(offset + written)
    }

    fn put_location(&mut self, offset: usize, location: Location) -> CrashResult<usize>
    {
        let offset = self.put(offset, location.size)?;
        self.put(offset, location.rva)
    }
}

fn encode_error(err: scroll::Error) -> CrashError
{
    CrashError::DumpIo(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

fn to_u32(value: usize) -> CrashResult<u32>
{
    u32::try_from(value).map_err(|_| CrashError::DumpIo(io::Error::new(io::ErrorKind::InvalidData, "dump exceeds 4 GiB of metadata")))
}

/// One line of `/proc/self/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry
{
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub private: bool,
    pub path: String,
}

impl MapEntry
{
    /// Parse one maps line. Malformed lines yield `None`.
    pub fn parse(line: &str) -> Option<Self>
    {
        // The first five fields are single-space separated; the path is padded.
        let mut fields = line.splitn(6, ' ');
        let (start, end) = fields.next()?.split_once('-')?;
        let perms = fields.next()?.as_bytes();
        if perms.len() < 4 {
            return None;
        }
        // offset, device, inode
        fields.nth(2)?;
        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            readable: perms[0] == b'r',
            writable: perms[1] == b'w',
            private: perms[3] == b'p',
            path: fields.next().unwrap_or_default().trim().to_string(),
        })
    }

    pub fn contains(&self, address: u64) -> bool
    {
        (self.start..self.end).contains(&address)
    }

    pub fn len(&self) -> u64
    {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Included in a full-memory dump.
    pub fn is_dumpable(&self) -> bool
    {
        self.readable && self.private && !self.is_empty() && !matches!(self.path.as_str(), "[vvar]" | "[vvar_vclock]" | "[vsyscall]")
    }
}

/// Parse the whole maps file, skipping malformed lines.
pub fn parse_maps(text: &str) -> Vec<MapEntry>
{
    text.lines().filter_map(MapEntry::parse).collect()
}

/// Write the minidump for `request` to `file`.
pub fn write(file: &mut File, request: &DumpRequest<'_>) -> CrashResult<()>
{
    let memory = SelfMemory::new();
    let maps_text = fs::read_to_string("/proc/self/maps").unwrap_or_default();
    let mappings = parse_maps(&maps_text);
    let fault = &request.fault_context;

    let mut buffer = DumpBuffer::default();
    let header_size = md::MINIDUMP_HEADER::size_with(&LE);
    let entry_size = md::MINIDUMP_DIRECTORY::size_with(&LE);
    buffer.reserve(header_size)?;
    let directory = buffer.reserve(entry_size * MAX_STREAMS)?;

    let context = match fault.cpu {
        Some(cpu) => Some(write_context(&mut buffer, cpu)?),
        None => None,
    };
    let stack = match fault.cpu {
        Some(cpu) => write_stack(&mut buffer, &memory, &mappings, cpu.sp())?,
        None => None,
    };

    let mut streams = Vec::with_capacity(MAX_STREAMS);
    streams.push(write_thread_list(&mut buffer, fault.thread_id, context, stack)?);
    streams.push(write_module_list(&mut buffer, &crate::platform::loaded_modules())?);
    streams.push(write_memory_list(&mut buffer, stack)?);
    if let Some(signal) = fault.signal {
        let address = signal.fault_address.map_or(0, Address::value);
        streams.push(write_exception(&mut buffer, fault.thread_id, signal.kind.signo(), signal.code, address, context)?);
    }
    streams.push(write_system_info(&mut buffer)?);
    for (kind, path) in [(StreamType::LinuxProcStatus, "/proc/self/status"), (StreamType::LinuxCmdLine, "/proc/self/cmdline")] {
        if let Ok(bytes) = fs::read(path) {
            streams.push(Stream::new(kind, buffer.append(&bytes)?));
        }
    }
    streams.push(Stream::new(StreamType::LinuxMaps, buffer.append(maps_text.as_bytes())?));

    // Must come last: the range data starts where the buffer ends.
    let ranges: Vec<&MapEntry> = if request.options.contains(DumpOptions::FULL_MEMORY) {
        mappings.iter().filter(|entry| entry.is_dumpable()).collect()
    } else {
        Vec::new()
    };
    if !ranges.is_empty() {
        streams.push(write_memory64_list(&mut buffer, &ranges)?);
    }

    write_header(&mut buffer, directory, &streams)?;
    file.write_all(&buffer.bytes)?;
    for entry in ranges {
        copy_range(file, &memory, entry)?;
    }
    Ok(())
}

fn write_header(buffer: &mut DumpBuffer, directory: Location, streams: &[Stream]) -> CrashResult<()>
{
    let timestamp = chrono::Utc::now().timestamp();
    let mut offset = buffer.put(0, md::MINIDUMP_SIGNATURE)?;
    offset = buffer.put(offset, md::MINIDUMP_VERSION)?;
    offset = buffer.put(offset, to_u32(streams.len())?)?;
    offset = buffer.put(offset, directory.rva)?;
    offset = buffer.put(offset, 0u32)?;
    offset = buffer.put(offset, u32::try_from(timestamp).unwrap_or(0))?;
    buffer.put(offset, 0u64)?;

    let mut offset = directory.rva as usize;
    for stream in streams {
        offset = buffer.put(offset, stream.kind)?;
        offset = buffer.put_location(offset, stream.location)?;
    }
    Ok(())
}

/// Serialize `cpu` as the `CONTEXT_*` record of its architecture.
fn write_context(buffer: &mut DumpBuffer, cpu: &CpuContext) -> CrashResult<Location>
{
    let reg = |number: u16| cpu.register(number).unwrap_or(0);
    match cpu.arch() {
        Architecture::X86_64 => {
            let location = buffer.reserve(md::CONTEXT_AMD64::size_with(&LE))?;
            let base = location.rva as usize;
            let flags = md::ContextFlagsCpu::CONTEXT_AMD64.bits() | 0x3;
            buffer.put(base + 48, flags)?;
            buffer.put(base + 68, cpu.flags() as u32)?;
            // rax rcx rdx rbx rsp rbp rsi rdi, in CONTEXT order, as DWARF numbers.
            let mut offset = base + 120;
            for number in [0u16, 2, 1, 3, 7, 6, 4, 5, 8, 9, 10, 11, 12, 13, 14, 15] {
                offset = buffer.put(offset, reg(number))?;
            }
            buffer.put(offset, cpu.pc().value())?;
            Ok(location)
        }
        Architecture::Aarch64 => {
            let location = buffer.reserve(md::CONTEXT_ARM64::size_with(&LE))?;
            let base = location.rva as usize;
            buffer.put(base, md::ContextFlagsCpu::CONTEXT_ARM64.bits() | 0x3)?;
            let mut offset = buffer.put(base + 4, cpu.flags() as u32)?;
            for number in 0u16..32 {
                offset = buffer.put(offset, reg(number))?;
            }
            buffer.put(offset, cpu.pc().value())?;
            Ok(location)
        }
        Architecture::X86 => {
            let location = buffer.reserve(md::CONTEXT_X86::size_with(&LE))?;
            let base = location.rva as usize;
            buffer.put(base, md::ContextFlagsCpu::CONTEXT_X86.bits() | 0x3)?;
            // edi esi ebx edx ecx eax ebp
            let mut offset = base + 156;
            for number in [7u16, 6, 3, 2, 1, 0, 5] {
                offset = buffer.put(offset, reg(number) as u32)?;
            }
            buffer.put(base + 184, cpu.pc().value() as u32)?;
            buffer.put(base + 192, cpu.flags() as u32)?;
            buffer.put(base + 196, cpu.sp().value() as u32)?;
            Ok(location)
        }
        Architecture::Unknown => Ok(Location::default()),
    }
}

/// Copy the live part of the stack around `sp`. Returns its start address
/// and location, or `None` if `sp` is not in any mapping.
fn write_stack(
    buffer: &mut DumpBuffer,
    memory: &SelfMemory,
    mappings: &[MapEntry],
    sp: Address,
) -> CrashResult<Option<(u64, Location)>>
{
    let sp = sp.value();
    let Some(mapping) = mappings.iter().find(|entry| entry.contains(sp)) else {
        return Ok(None);
    };
    let start = sp.saturating_sub(RED_ZONE).max(mapping.start);
    let end = mapping.end.min(start + MAX_STACK_BYTES);
    let len = (end - start) as usize;

    let location = buffer.reserve(len)?;
    let rva = location.rva as usize;
    let target = &mut buffer.bytes[rva..rva + len];
    if memory.read_bytes(Address::new(start), target).is_err() {
        // Zero whatever could not be read, page by page.
        let page = page_size::get();
        for (index, chunk) in target.chunks_mut(page).enumerate() {
            let address = Address::new(start + (index * page) as u64);
            if memory.read_bytes(address, chunk).is_err() {
                chunk.fill(0);
            }
        }
    }
    Ok(Some((start, location)))
}

fn write_thread_list(
    buffer: &mut DumpBuffer,
    thread_id: u64,
    context: Option<Location>,
    stack: Option<(u64, Location)>,
) -> CrashResult<Stream>
{
    let thread_size = md::MINIDUMP_THREAD::size_with(&LE);
    let list = buffer.reserve(4 + thread_size)?;
    let mut offset = buffer.put(list.rva as usize, 1u32)?;
    offset = buffer.put(offset, thread_id as u32)?;
    // suspend count, priority class, priority, teb
    offset = buffer.put(offset, 0u32)?;
    offset = buffer.put(offset, 0u32)?;
    offset = buffer.put(offset, 0u32)?;
    offset = buffer.put(offset, 0u64)?;
    let (stack_start, stack_location) = stack.unwrap_or_default();
    offset = buffer.put(offset, stack_start)?;
    offset = buffer.put_location(offset, stack_location)?;
    buffer.put_location(offset, context.unwrap_or_default())?;
    Ok(Stream::new(StreamType::ThreadListStream, list))
}

fn write_module_list(buffer: &mut DumpBuffer, modules: &[ModuleInfo]) -> CrashResult<Stream>
{
    let names = modules
        .iter()
        .map(|module| buffer.append_string(&module.path))
        .collect::<CrashResult<Vec<u32>>>()?;

    let module_size = md::MINIDUMP_MODULE::size_with(&LE);
    let list = buffer.reserve(4 + module_size * modules.len())?;
    let mut offset = buffer.put(list.rva as usize, to_u32(modules.len())?)?;
    for (module, name_rva) in modules.iter().zip(names) {
        let record = offset;
        offset = buffer.put(offset, module.base.value())?;
        offset = buffer.put(offset, u32::try_from(module.size).unwrap_or(u32::MAX))?;
        // checksum, timestamp
        offset = buffer.put(offset, 0u32)?;
        offset = buffer.put(offset, 0u32)?;
        buffer.put(offset, name_rva)?;
        // Version info, CodeView and misc records stay zeroed.
        offset = record + module_size;
    }
    Ok(Stream::new(StreamType::ModuleListStream, list))
}

fn write_memory_list(buffer: &mut DumpBuffer, stack: Option<(u64, Location)>) -> CrashResult<Stream>
{
    let descriptor_size = md::MINIDUMP_MEMORY_DESCRIPTOR::size_with(&LE);
    let count = usize::from(stack.is_some());
    let list = buffer.reserve(4 + descriptor_size * count)?;
    let offset = buffer.put(list.rva as usize, to_u32(count)?)?;
    if let Some((start, location)) = stack {
        // The u32 count leaves the descriptors 4 bytes into the stream.
        let offset = buffer.put(offset, start)?;
        buffer.put_location(offset, location)?;
    }
    Ok(Stream::new(StreamType::MemoryListStream, list))
}

fn write_exception(
    buffer: &mut DumpBuffer,
    thread_id: u64,
    signo: i32,
    code: i32,
    address: u64,
    context: Option<Location>,
) -> CrashResult<Stream>
{
    let stream = buffer.reserve(md::MINIDUMP_EXCEPTION_STREAM::size_with(&LE))?;
    let base = stream.rva as usize;
    let mut offset = buffer.put(base, thread_id as u32)?;
    offset = buffer.put(offset + 4, signo as u32)?;
    offset = buffer.put(offset, code as u32)?;
    // nested record
    offset = buffer.put(offset, 0u64)?;
    buffer.put(offset, address)?;
    buffer.put_location(base + 160, context.unwrap_or_default())?;
    Ok(Stream::new(StreamType::ExceptionStream, stream))
}

fn write_system_info(buffer: &mut DumpBuffer) -> CrashResult<Stream>
{
    let uname = KernelVersion::read();
    let csd_rva = buffer.append_string(&uname.description)?;

    let architecture = match Architecture::current() {
        Architecture::X86_64 => md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64 as u16,
        Architecture::Aarch64 => md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM64 as u16,
        Architecture::X86 => md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_INTEL as u16,
        Architecture::Unknown => md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_UNKNOWN as u16,
    };
    // SAFETY: sysconf has no preconditions.
    let processors = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };

    let stream = buffer.reserve(md::MINIDUMP_SYSTEM_INFO::size_with(&LE))?;
    let mut offset = buffer.put(stream.rva as usize, architecture)?;
    // level, revision
    offset = buffer.put(offset, 0u16)?;
    offset = buffer.put(offset, 0u16)?;
    offset = buffer.put(offset, u8::try_from(processors.max(1)).unwrap_or(u8::MAX))?;
    // product type
    offset = buffer.put(offset, 0u8)?;
    offset = buffer.put(offset, uname.major)?;
    offset = buffer.put(offset, uname.minor)?;
    offset = buffer.put(offset, uname.patch)?;
    offset = buffer.put(offset, md::PlatformId::Linux as u32)?;
    buffer.put(offset, csd_rva)?;
    Ok(Stream::new(StreamType::SystemInfoStream, stream))
}

fn write_memory64_list(buffer: &mut DumpBuffer, ranges: &[&MapEntry]) -> CrashResult<Stream>
{
    let list = buffer.reserve(16 + MEMORY_DESCRIPTOR64_SIZE * ranges.len())?;
    let base_rva = buffer.position() as u64;
    let mut offset = buffer.put(list.rva as usize, ranges.len() as u64)?;
    offset = buffer.put(offset, base_rva)?;
    for entry in ranges {
        offset = buffer.put(offset, entry.start)?;
        offset = buffer.put(offset, entry.len())?;
    }
    Ok(Stream::new(StreamType::Memory64ListStream, list))
}

/// Stream one mapping into the file; unreadable chunks become zeros so the
/// offsets of later ranges stay correct.
fn copy_range(file: &mut File, memory: &SelfMemory, entry: &MapEntry) -> CrashResult<()>
{
    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut address = entry.start;
    while address < entry.end {
        let len = (entry.end - address).min(COPY_CHUNK as u64) as usize;
        let data = &mut chunk[..len];
        if memory.read_bytes(Address::new(address), data).is_err() {
            data.fill(0);
        }
        file.write_all(data)?;
        address += len as u64;
    }
    Ok(())
}

/// Kernel release numbers and the `uname` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct KernelVersion
{
    major: u32,
    minor: u32,
    patch: u32,
    description: String,
}

impl KernelVersion
{
    fn read() -> Self
    {
        // SAFETY: utsname is plain data; all zeroes is a valid value.
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        // SAFETY: uts is a valid, writable utsname.
        if unsafe { libc::uname(&mut uts) } != 0 {
            return Self::default();
        }
        let field = |raw: &[libc::c_char]| {
            // SAFETY: uname NUL-terminates every field within its array.
            unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
        };
        let release = field(&uts.release);
        let mut version = Self::parse_release(&release);
        version.description = format!("{} {} {} {}", field(&uts.sysname), release, field(&uts.version), field(&uts.machine));
        version
    }

    /// `6.8.0-45-generic` -> 6, 8, 0
    fn parse_release(release: &str) -> Self
    {
        let mut numbers = release.split(['.', '-', '+']).map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        });
        Self {
            major: numbers.next().unwrap_or(0),
            minor: numbers.next().unwrap_or(0),
            patch: numbers.next().unwrap_or(0),
            description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dump::FaultContext;
    use crate::types::{SignalEvent, SignalKind};

    fn read_u32(bytes: &[u8], offset: usize) -> u32
    {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn streams(bytes: &[u8]) -> Vec<(u32, u32, u32)>
    {
        let count = read_u32(bytes, 8) as usize;
        let directory = read_u32(bytes, 12) as usize;
        (0..count)
            .map(|index| {
                let entry = directory + index * 12;
                (read_u32(bytes, entry), read_u32(bytes, entry + 4), read_u32(bytes, entry + 8))
            })
            .collect()
    }

    fn dump(request: &DumpRequest<'_>) -> Vec<u8>
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.dmp");
        let mut file = File::create(&path).unwrap();
        write(&mut file, request).unwrap();
        drop(file);
        fs::read(path).unwrap()
    }

    #[test]
    fn test_parse_maps_line()
    {
        let entry = MapEntry::parse("7ffc1d2e0000-7ffc1d301000 rw-p 00000000 00:00 0                          [stack]").unwrap();
        assert_eq!(entry.start, 0x7ffc_1d2e_0000);
        assert_eq!(entry.end, 0x7ffc_1d30_1000);
        assert!(entry.readable && entry.writable && entry.private);
        assert_eq!(entry.path, "[stack]");
        assert!(entry.is_dumpable());
    }

    #[test]
    fn test_parse_maps_keeps_spaces_in_paths()
    {
        let entry = MapEntry::parse("55d0c0000000-55d0c0001000 r-xp 00001000 08:01 131 /opt/my app/bin").unwrap();
        assert_eq!(entry.path, "/opt/my app/bin");
        assert!(!entry.writable);
    }

    #[test]
    fn test_special_and_shared_mappings_are_not_dumped()
    {
        let maps = "\
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0 [vsyscall]
7fff00000000-7fff00004000 r--p 00000000 00:00 0 [vvar]
7f0000000000-7f0000001000 rw-s 00000000 00:05 7 /dev/shm/x
garbage line
";
        let entries = parse_maps(maps);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|entry| !entry.is_dumpable()));
    }

    #[test]
    fn test_parse_release()
    {
        let version = KernelVersion::parse_release("6.8.0-45-generic");
        assert_eq!((version.major, version.minor, version.patch), (6, 8, 0));
        let version = KernelVersion::parse_release("5.15");
        assert_eq!((version.major, version.minor, version.patch), (5, 15, 0));
    }

    #[test]
    fn test_string_is_utf16_with_length_prefix()
    {
        let mut buffer = DumpBuffer::default();
        let rva = buffer.append_string("ab").unwrap() as usize;
        assert_eq!(read_u32(&buffer.bytes, rva), 4);
        assert_eq!(&buffer.bytes[rva + 4..rva + 10], &[b'a', 0, b'b', 0, 0, 0]);
    }

    #[test]
    fn test_manual_dump_streams()
    {
        let cpu = CpuContext::current();
        let request = DumpRequest {
            target_path: "unused".into(),
            fault_context: FaultContext::manual(cpu.as_ref()),
            options: DumpOptions::empty(),
        };
        let bytes = dump(&request);
        assert_eq!(read_u32(&bytes, 0), md::MINIDUMP_SIGNATURE);
        assert_eq!(read_u32(&bytes, 4), md::MINIDUMP_VERSION);

        let kinds: Vec<u32> = streams(&bytes).iter().map(|stream| stream.0).collect();
        assert!(kinds.contains(&(StreamType::ThreadListStream as u32)));
        assert!(kinds.contains(&(StreamType::ModuleListStream as u32)));
        assert!(kinds.contains(&(StreamType::SystemInfoStream as u32)));
        assert!(kinds.contains(&(StreamType::LinuxMaps as u32)));
        assert!(!kinds.contains(&(StreamType::ExceptionStream as u32)));
        assert!(!kinds.contains(&(StreamType::Memory64ListStream as u32)));

        let (_, _, threads_rva) = streams(&bytes)
            .into_iter()
            .find(|stream| stream.0 == StreamType::ThreadListStream as u32)
            .unwrap();
        assert_eq!(read_u32(&bytes, threads_rva as usize), 1);
        assert_eq!(u64::from(read_u32(&bytes, threads_rva as usize + 4)), request.fault_context.thread_id & 0xffff_ffff);
    }

    #[test]
    fn test_signal_dump_has_exception_stream()
    {
        let cpu = CpuContext::current();
        let signal = SignalEvent {
            kind: SignalKind::SegFault,
            code: 1,
            fault_address: Some(Address::new(8)),
            thread_id: crate::platform::current_thread_id(),
        };
        let request = DumpRequest {
            target_path: "unused".into(),
            fault_context: FaultContext {
                signal: Some(&signal),
                ..FaultContext::manual(cpu.as_ref())
            },
            options: DumpOptions::empty(),
        };
        let bytes = dump(&request);
        let (_, size, rva) = streams(&bytes)
            .into_iter()
            .find(|stream| stream.0 == StreamType::ExceptionStream as u32)
            .unwrap();
        assert_eq!(size as usize, md::MINIDUMP_EXCEPTION_STREAM::size_with(&LE));
        let rva = rva as usize;
        assert_eq!(read_u32(&bytes, rva + 8), libc::SIGSEGV as u32);
        assert_eq!(read_u32(&bytes, rva + 12), 1);
        assert_eq!(read_u32(&bytes, rva + 24), 8);
    }

    #[test]
    fn test_full_memory_appends_ranges()
    {
        let request = DumpRequest {
            target_path: "unused".into(),
            fault_context: FaultContext::manual(None),
            options: DumpOptions::FULL_MEMORY,
        };
        let bytes = dump(&request);
        let (_, _, rva) = streams(&bytes)
            .into_iter()
            .find(|stream| stream.0 == StreamType::Memory64ListStream as u32)
            .unwrap();
        let rva = rva as usize;
        let count = u64::from_le_bytes(bytes[rva..rva + 8].try_into().unwrap());
        let base = u64::from_le_bytes(bytes[rva + 8..rva + 16].try_into().unwrap());
        let total: u64 = (0..count as usize)
            .map(|index| {
                let at = rva + 16 + index * 16 + 8;
                u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
            })
            .sum();
        assert!(count > 0);
        assert_eq!(bytes.len() as u64, base + total);
    }
}
