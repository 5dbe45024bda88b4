//! # CPU Context
//!
//! Register state of a thread at the moment of a failure.
//!
//! A [`CpuContext`] is the starting point of every stack walk and the thread
//! record of every dump. It can be built three ways:
//!
//! - [`CpuContext::current`]: the caller's own registers, captured with a few
//!   instructions of inline assembly (or `RtlCaptureContext` on Windows).
//! - [`CpuContext::from_ucontext`]: the interrupted registers a signal
//!   handler receives in its third argument.
//! - `CpuContext::from_native` (Windows): the `CONTEXT` record attached to an
//!   unhandled exception.
//!
//! ## Register numbering
//!
//! General registers are stored by their DWARF register number, which is what
//! `.eh_frame` rules refer to. That lets the CFI unwinder restore any
//! callee-saved register without a per-architecture translation table:
//!
//! | arch    | sp | fp | return address |
//! |---------|----|----|----------------|
//! | x86-64  | 7  | 6  | 16 (`rip`)     |
//! | AArch64 | 31 | 29 | 30 (`lr`)      |
//! | x86     | 4  | 5  | 8 (`eip`)      |

use crate::types::Address;

/// Number of DWARF register slots tracked per context.
pub const REGISTER_SLOTS: usize = 33;

/// CPU architecture of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture
{
    /// x86-64 / AMD64
    X86_64,
    /// ARM64 / AArch64
    Aarch64,
    /// 32-bit x86
    X86,
    /// Anything else; only the frame pointer walk is attempted.
    Unknown,
}

impl Architecture
{
    /// Architecture this crate was compiled for.
    pub const fn current() -> Self
    {
        if cfg!(target_arch = "x86_64") {
            Architecture::X86_64
        } else if cfg!(target_arch = "aarch64") {
            Architecture::Aarch64
        } else if cfg!(target_arch = "x86") {
            Architecture::X86
        } else {
            Architecture::Unknown
        }
    }

    /// Width of a saved register or stack slot, in bytes.
    pub const fn pointer_size(self) -> u64
    {
        match self {
            Architecture::X86 => 4,
            Architecture::X86_64 | Architecture::Aarch64 => 8,
            Architecture::Unknown => std::mem::size_of::<usize>() as u64,
        }
    }

    /// DWARF number of the stack pointer.
    pub const fn sp_register(self) -> u16
    {
        match self {
            Architecture::X86_64 => 7,
            Architecture::Aarch64 => 31,
            Architecture::X86 => 4,
            Architecture::Unknown => u16::MAX,
        }
    }

    /// DWARF number of the frame pointer.
    pub const fn fp_register(self) -> u16
    {
        match self {
            Architecture::X86_64 => 6,
            Architecture::Aarch64 => 29,
            Architecture::X86 => 5,
            Architecture::Unknown => u16::MAX,
        }
    }

    /// DWARF column holding the return address.
    pub const fn return_register(self) -> u16
    {
        match self {
            Architecture::X86_64 => 16,
            Architecture::Aarch64 => 30,
            Architecture::X86 => 8,
            Architecture::Unknown => u16::MAX,
        }
    }

    /// Name used in reports and the dump's system info.
    pub const fn name(self) -> &'static str
    {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::X86 => "x86",
            Architecture::Unknown => "unknown",
        }
    }
}

/// Register state of one thread.
#[derive(Clone)]
pub struct CpuContext
{
    arch: Architecture,
    pc: u64,
    flags: u64,
    registers: [Option<u64>; REGISTER_SLOTS],
    #[cfg(windows)]
    native: Option<Box<windows_sys::Win32::System::Diagnostics::Debug::CONTEXT>>,
}

impl std::fmt::Debug for CpuContext
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("CpuContext")
            .field("arch", &self.arch)
            .field("pc", &self.pc())
            .field("sp", &self.sp())
            .field("fp", &self.fp())
            .finish_non_exhaustive()
    }
}

impl CpuContext
{
    /// Context with only pc, sp and fp known.
    pub fn from_parts(arch: Architecture, pc: Address, sp: Address, fp: Address) -> Self
    {
        let mut context = Self::blank(arch);
        context.pc = pc.value();
        context.set_register(arch.sp_register(), sp.value());
        context.set_register(arch.fp_register(), fp.value());
        context
    }

    fn blank(arch: Architecture) -> Self
    {
        Self {
            arch,
            pc: 0,
            flags: 0,
            registers: [None; REGISTER_SLOTS],
            #[cfg(windows)]
            native: None,
        }
    }

    /// Architecture of the context.
    pub fn arch(&self) -> Architecture
    {
        self.arch
    }

    /// Program counter.
    pub fn pc(&self) -> Address
    {
        Address::new(self.pc)
    }

    /// Stack pointer (zero if unknown).
    pub fn sp(&self) -> Address
    {
        Address::new(self.register(self.arch.sp_register()).unwrap_or(0))
    }

    /// Frame pointer (zero if unknown).
    pub fn fp(&self) -> Address
    {
        Address::new(self.register(self.arch.fp_register()).unwrap_or(0))
    }

    /// Link register, on architectures that have one.
    pub fn lr(&self) -> Option<Address>
    {
        match self.arch {
            Architecture::Aarch64 => self.register(30).map(Address::new),
            _ => None,
        }
    }

    /// Flags register (`rflags`, `eflags`, `pstate`), zero if unknown.
    pub fn flags(&self) -> u64
    {
        self.flags
    }

    /// Value of a DWARF-numbered register, if known.
    pub fn register(&self, number: u16) -> Option<u64>
    {
        self.registers.get(usize::from(number)).copied().flatten()
    }

    /// Set a DWARF-numbered register. Out-of-range numbers are ignored.
    pub fn set_register(&mut self, number: u16, value: u64)
    {
        if let Some(slot) = self.registers.get_mut(usize::from(number)) {
            *slot = Some(value);
        }
    }

    /// Forget a DWARF-numbered register.
    pub fn clear_register(&mut self, number: u16)
    {
        if let Some(slot) = self.registers.get_mut(usize::from(number)) {
            *slot = None;
        }
    }

    /// Replace the program counter.
    pub fn set_pc(&mut self, pc: Address)
    {
        self.pc = pc.value();
    }

    /// Registers `0..count` in DWARF order, unknown ones as zero.
    pub fn general_registers(&self, count: usize) -> impl Iterator<Item = u64> + '_
    {
        self.registers.iter().take(count).map(|value| value.unwrap_or(0))
    }

    /// Native Windows context record, when the context came from one.
    #[cfg(windows)]
    pub fn native(&self) -> Option<&windows_sys::Win32::System::Diagnostics::Debug::CONTEXT>
    {
        self.native.as_deref()
    }
}

// Capture of the caller's registers.
//
// `#[inline(always)]` keeps the captured pc and sp inside the caller's frame,
// so a walk started from the result sees the caller as frame 0.
impl CpuContext
{
    /// Capture the calling function's registers.
    ///
    /// Returns `None` on architectures without a capture routine.
    #[cfg(all(not(windows), target_arch = "x86_64"))]
    #[inline(always)]
    pub fn current() -> Option<Self>
    {
        let (pc, sp, fp): (u64, u64, u64);
        // SAFETY: only reads registers into outputs.
        unsafe {
            std::arch::asm!(
                "lea {pc}, [rip]",
                "mov {sp}, rsp",
                "mov {fp}, rbp",
                pc = out(reg) pc,
                sp = out(reg) sp,
                fp = out(reg) fp,
                options(nomem, nostack, preserves_flags),
            );
        }
        Some(Self::from_parts(
            Architecture::X86_64,
            Address::new(pc),
            Address::new(sp),
            Address::new(fp),
        ))
    }

    /// Capture the calling function's registers.
    #[cfg(all(not(windows), target_arch = "aarch64"))]
    #[inline(always)]
    pub fn current() -> Option<Self>
    {
        let (pc, sp, fp, lr): (u64, u64, u64, u64);
        // SAFETY: only reads registers into outputs.
        unsafe {
            std::arch::asm!(
                "adr {pc}, .",
                "mov {sp}, sp",
                "mov {fp}, x29",
                "mov {lr}, x30",
                pc = out(reg) pc,
                sp = out(reg) sp,
                fp = out(reg) fp,
                lr = out(reg) lr,
                options(nomem, nostack, preserves_flags),
            );
        }
        let mut context = Self::from_parts(
            Architecture::Aarch64,
            Address::new(pc),
            Address::new(sp),
            Address::new(fp),
        );
        context.set_register(30, lr);
        Some(context)
    }

    /// Capture the calling function's registers.
    #[cfg(all(not(windows), target_arch = "x86"))]
    #[inline(always)]
    pub fn current() -> Option<Self>
    {
        let (pc, sp, fp): (u32, u32, u32);
        // SAFETY: the call/pop pair leaves the stack balanced.
        unsafe {
            std::arch::asm!(
                "call 2f",
                "2:",
                "pop {pc}",
                "mov {sp}, esp",
                "mov {fp}, ebp",
                pc = out(reg) pc,
                sp = out(reg) sp,
                fp = out(reg) fp,
                options(preserves_flags),
            );
        }
        Some(Self::from_parts(
            Architecture::X86,
            Address::new(u64::from(pc)),
            Address::new(u64::from(sp)),
            Address::new(u64::from(fp)),
        ))
    }

    /// Capture the calling function's registers.
    #[cfg(all(not(windows), not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86"))))]
    #[inline(always)]
    pub fn current() -> Option<Self>
    {
        None
    }

    /// Capture the calling function's registers with `RtlCaptureContext`.
    #[cfg(windows)]
    #[inline(always)]
    pub fn current() -> Option<Self>
    {
        use windows_sys::Win32::System::Diagnostics::Debug::{RtlCaptureContext, CONTEXT};

        // SAFETY: CONTEXT is plain data; RtlCaptureContext fills it in.
        let mut native: Box<CONTEXT> = Box::new(unsafe { std::mem::zeroed() });
        unsafe { RtlCaptureContext(&mut *native) };
        Some(Self::from_native(native))
    }
}

#[cfg(windows)]
impl CpuContext
{
    /// Build from a Windows `CONTEXT` record.
    pub fn from_native(native: Box<windows_sys::Win32::System::Diagnostics::Debug::CONTEXT>) -> Self
    {
        let arch = Architecture::current();
        let mut context = Self::blank(arch);

        #[cfg(target_arch = "x86_64")]
        {
            let ordered = [
                native.Rax, native.Rdx, native.Rcx, native.Rbx, native.Rsi, native.Rdi, native.Rbp, native.Rsp,
                native.R8, native.R9, native.R10, native.R11, native.R12, native.R13, native.R14, native.R15,
            ];
            for (number, value) in (0u16..).zip(ordered) {
                context.set_register(number, value);
            }
            context.pc = native.Rip;
            context.flags = u64::from(native.EFlags);
        }

        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: both union views cover the same 31 registers.
            let x = unsafe { native.Anonymous.X };
            for (number, value) in (0u16..).zip(x) {
                context.set_register(number, value);
            }
            context.set_register(31, native.Sp);
            context.pc = native.Pc;
            context.flags = u64::from(native.Cpsr);
        }

        #[cfg(target_arch = "x86")]
        {
            let ordered = [
                native.Eax, native.Ecx, native.Edx, native.Ebx, native.Esp, native.Ebp, native.Esi, native.Edi,
            ];
            for (number, value) in (0u16..).zip(ordered) {
                context.set_register(number, u64::from(value));
            }
            context.pc = u64::from(native.Eip);
            context.flags = u64::from(native.EFlags);
        }

        context.native = Some(native);
        context
    }
}

#[cfg(unix)]
impl CpuContext
{
    /// Extract the interrupted registers from a signal handler's `ucontext`.
    ///
    /// Returns `None` for a null pointer or an unsupported target.
    ///
    /// # Safety
    ///
    /// `ucontext` must be null or the third argument the kernel passed to an
    /// `SA_SIGINFO` handler that is still running.
    pub unsafe fn from_ucontext(ucontext: *const libc::c_void) -> Option<Self>
    {
        if ucontext.is_null() {
            return None;
        }
        // SAFETY: forwarded from the caller's contract.
        unsafe { Self::from_ucontext_impl(ucontext.cast()) }
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    unsafe fn from_ucontext_impl(uc: *const libc::ucontext_t) -> Option<Self>
    {
        // SAFETY: checked non-null by the caller.
        let gregs = unsafe { &(*uc).uc_mcontext.gregs };
        let read = |index: libc::c_int| gregs[index as usize] as u64;
        let mut context = Self::blank(Architecture::X86_64);
        let ordered = [
            libc::REG_RAX,
            libc::REG_RDX,
            libc::REG_RCX,
            libc::REG_RBX,
            libc::REG_RSI,
            libc::REG_RDI,
            libc::REG_RBP,
            libc::REG_RSP,
            libc::REG_R8,
            libc::REG_R9,
            libc::REG_R10,
            libc::REG_R11,
            libc::REG_R12,
            libc::REG_R13,
            libc::REG_R14,
            libc::REG_R15,
        ];
        for (number, index) in (0u16..).zip(ordered) {
            context.set_register(number, read(index));
        }
        context.pc = read(libc::REG_RIP);
        context.flags = read(libc::REG_EFL);
        Some(context)
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    unsafe fn from_ucontext_impl(uc: *const libc::ucontext_t) -> Option<Self>
    {
        // SAFETY: checked non-null by the caller.
        let mcontext = unsafe { &(*uc).uc_mcontext };
        let mut context = Self::blank(Architecture::Aarch64);
        for (number, value) in (0u16..).zip(mcontext.regs) {
            context.set_register(number, value);
        }
        context.set_register(31, mcontext.sp);
        context.pc = mcontext.pc;
        context.flags = mcontext.pstate;
        Some(context)
    }

    #[cfg(all(target_os = "linux", target_arch = "x86"))]
    unsafe fn from_ucontext_impl(uc: *const libc::ucontext_t) -> Option<Self>
    {
        // SAFETY: checked non-null by the caller.
        let gregs = unsafe { &(*uc).uc_mcontext.gregs };
        let read = |index: libc::c_int| u64::from(gregs[index as usize] as u32);
        let mut context = Self::blank(Architecture::X86);
        let ordered = [
            libc::REG_EAX,
            libc::REG_ECX,
            libc::REG_EDX,
            libc::REG_EBX,
            libc::REG_ESP,
            libc::REG_EBP,
            libc::REG_ESI,
            libc::REG_EDI,
        ];
        for (number, index) in (0u16..).zip(ordered) {
            context.set_register(number, read(index));
        }
        context.pc = read(libc::REG_EIP);
        context.flags = read(libc::REG_EFL);
        Some(context)
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86"))))]
    unsafe fn from_ucontext_impl(_uc: *const libc::c_void) -> Option<Self>
    {
        None
    }
}
