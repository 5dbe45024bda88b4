//! DWARF call frame information over in-memory `.eh_frame`.
//!
//! Every ELF image linked with unwind tables has a `PT_GNU_EH_FRAME`
//! segment: the `.eh_frame_hdr` section, whose binary search table maps
//! function start addresses to their FDEs in `.eh_frame`. Both sections are
//! part of a loaded segment, so the unwinder reads them straight from memory
//! without opening the file on disk.
//!
//! The unwind context is backed by fixed arrays rather than gimli's default
//! heap storage, so evaluating a row does not allocate.

use gimli::{
    BaseAddresses, CfaRule, EhFrame, EhFrameHdr, NativeEndian, Pointer, Register, RegisterRule, UnwindContext,
    UnwindContextStorage, UnwindSection, UnwindTableRow,
};

use super::MemoryAccess;
use crate::context::{CpuContext, REGISTER_SLOTS};
use crate::types::{Address, ModuleInfo};

/// Unwind context storage on the stack.
///
/// 192 rules covers every register an x86-64 or AArch64 FDE can mention;
/// four remembered states is more than compilers emit.
struct StoreOnStack;

impl UnwindContextStorage<usize> for StoreOnStack
{
    type Rules = [(Register, RegisterRule<usize>); 192];
    type Stack = [UnwindTableRow<usize, Self>; 4];
}

/// Outcome of one CFI step.
pub enum CfiStep
{
    /// Caller's registers were recovered.
    Unwound(CpuContext),
    /// The FDE marks the return address undefined: there is no caller.
    Outermost,
    /// No usable unwind info; try another strategy.
    NoInfo,
}

/// Unwind one frame using the CFI of the module containing the pc.
///
/// For caller frames the pc is a return address, which may already belong
/// to the next function, so the lookup uses `pc - 1`.
pub fn step<M: MemoryAccess>(modules: &[ModuleInfo], memory: &M, cursor: &CpuContext, innermost: bool) -> CfiStep
{
    let pc = cursor.pc();
    let lookup = if innermost { pc } else { pc.checked_sub(1).unwrap_or(pc) };
    let Some(module) = modules.iter().find(|module| module.contains(lookup)) else {
        return CfiStep::NoInfo;
    };
    let Some(hdr) = module.eh_frame_hdr else {
        return CfiStep::NoInfo;
    };

    match unwind_with_module(module, hdr.address, hdr.size, memory, cursor, lookup, innermost) {
        Ok(step) => step,
        Err(_) => CfiStep::NoInfo,
    }
}

fn unwind_with_module<M: MemoryAccess>(
    module: &ModuleInfo,
    hdr_address: Address,
    hdr_size: u64,
    memory: &M,
    cursor: &CpuContext,
    lookup: Address,
    innermost: bool,
) -> gimli::Result<CfiStep>
{
    let arch = cursor.arch();
    let address_size = arch.pointer_size() as u8;

    // SAFETY: PT_GNU_EH_FRAME lies inside a loaded, readable segment of a
    // module that stays mapped while we hold the loader's module list.
    let hdr_bytes = unsafe { mapped_slice(hdr_address, hdr_size) };
    let mut bases = BaseAddresses::default().set_eh_frame_hdr(hdr_address.value());
    let parsed = EhFrameHdr::new(hdr_bytes, NativeEndian).parse(&bases, address_size)?;

    let Pointer::Direct(eh_frame_address) = parsed.eh_frame_ptr() else {
        return Ok(CfiStep::NoInfo);
    };
    let eh_frame_address = Address::new(eh_frame_address);
    let Some(eh_frame_len) = module.end().offset_from(eh_frame_address) else {
        return Ok(CfiStep::NoInfo);
    };
    let Some(table) = parsed.table() else {
        return Ok(CfiStep::NoInfo);
    };

    // SAFETY: .eh_frame is in the same segment family as its header; gimli
    // only touches the CIE and FDE the table points at.
    let eh_frame_bytes = unsafe { mapped_slice(eh_frame_address, eh_frame_len) };
    let mut eh_frame = EhFrame::new(eh_frame_bytes, NativeEndian);
    eh_frame.set_address_size(address_size);
    bases = bases.set_eh_frame(eh_frame_address.value());

    let fde = table.fde_for_address(&eh_frame, &bases, lookup.value(), EhFrame::cie_from_offset)?;
    let mut context: UnwindContext<usize, StoreOnStack> = UnwindContext::new_in();
    let row = fde.unwind_info_for_address(&eh_frame, &bases, &mut context, lookup.value())?;

    Ok(apply_row(row, memory, cursor, innermost))
}

/// View `len` bytes of our own address space as a slice.
///
/// # Safety
///
/// The range must be mapped and readable for the lifetime of the walk.
unsafe fn mapped_slice(address: Address, len: u64) -> &'static [u8]
{
    let len = usize::try_from(len).unwrap_or(0);
    // SAFETY: forwarded from the caller.
    unsafe { std::slice::from_raw_parts(address.value() as usize as *const u8, len) }
}

fn apply_row<M: MemoryAccess>(
    row: &UnwindTableRow<usize, StoreOnStack>,
    memory: &M,
    cursor: &CpuContext,
    innermost: bool,
) -> CfiStep
{
    let arch = cursor.arch();
    let word = arch.pointer_size();

    let cfa = match row.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => {
            let Some(base) = cursor.register(register.0) else {
                return CfiStep::NoInfo;
            };
            base.wrapping_add_signed(*offset)
        }
        // DWARF expressions for the CFA are only used by signal trampolines
        // and hand-written assembly.
        CfaRule::Expression(_) => return CfiStep::NoInfo,
    };

    // An undefined return address marks the outermost frame. The AArch64
    // link register is the exception for the innermost frame: a leaf that
    // never saved it still has its return address in x30.
    let return_register = arch.return_register();
    let lr_in_register = return_register == 30 && innermost;
    if matches!(row.register(Register(return_register)), RegisterRule::Undefined) && !lr_in_register {
        return CfiStep::Outermost;
    }

    let mut next = cursor.clone();
    for number in 0..REGISTER_SLOTS as u16 {
        let rule = row.register(Register(number));
        let value = match rule {
            // Unlisted registers keep their value (callee-saved convention).
            RegisterRule::Undefined | RegisterRule::SameValue => continue,
            RegisterRule::Offset(offset) => {
                match memory.read_word(Address::new(cfa.wrapping_add_signed(offset)), word) {
                    Ok(value) => Some(value),
                    Err(_) if number == return_register => return CfiStep::NoInfo,
                    Err(_) => None,
                }
            }
            RegisterRule::ValOffset(offset) => Some(cfa.wrapping_add_signed(offset)),
            RegisterRule::Register(other) => cursor.register(other.0),
            _ => None,
        };
        match value {
            Some(value) => next.set_register(number, value),
            None => next.clear_register(number),
        }
    }

    let Some(return_address) = next.register(return_register) else {
        return CfiStep::NoInfo;
    };

    next.set_pc(Address::new(return_address));
    next.set_register(arch.sp_register(), cfa);
    // The return-address column is not a real register on x86; keep it out
    // of the caller's register file.
    if return_register != 30 {
        next.clear_register(return_register);
    }
    CfiStep::Unwound(next)
}

#[cfg(all(test, target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests
{
    use super::*;
    use crate::platform::{loaded_modules, SelfMemory};

    #[test]
    fn test_main_executable_has_eh_frame_hdr()
    {
        let modules = loaded_modules();
        assert!(modules[0].eh_frame_hdr.is_some());
    }

    #[test]
    fn test_cfi_recovers_a_caller()
    {
        let Some(context) = CpuContext::current() else {
            return;
        };
        let modules = loaded_modules();
        let memory = SelfMemory::new();
        match step(&modules, &memory, &context, true) {
            CfiStep::Unwound(caller) => {
                assert!(caller.sp() > context.sp());
                assert!(!caller.pc().is_null());
            }
            CfiStep::Outermost => panic!("a test function is never the outermost frame"),
            CfiStep::NoInfo => panic!("the test binary is built with unwind tables"),
        }
    }
}
