//! # Symbolicator
//!
//! Resolves instruction addresses in the current process to function names,
//! source locations and owning modules.
//!
//! ## Lookup order
//!
//! 1. DWARF function that owns the code, with inlined calls folded into
//!    their call site
//! 2. ELF symbol table entry containing the address
//! 3. Owning module, reported as `<module>+0x<offset>`
//! 4. Unknown
//!
//! A source location is looked up only once a name has been found, and its
//! failure does not affect the name. [`Symbolicator::resolve`] never fails:
//! every error is folded into a less specific [`Resolution`].
//!
//! ## Caching
//!
//! The module table is captured once per `Symbolicator`. Each module's file
//! is opened and parsed the first time an address inside it is resolved, and
//! kept until the symbolicator is dropped. On Windows the lookups go through
//! DbgHelp instead, whose symbol engine is initialized once and stays
//! initialized for the life of the process (see [`dbghelp`]).

pub mod demangle;
#[cfg(unix)]
pub mod image;
#[cfg(windows)]
pub mod dbghelp;

#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
use once_cell::sync::OnceCell;
#[cfg(unix)]
use tracing::debug;

#[cfg(unix)]
use self::image::BinaryImage;
#[cfg(unix)]
use crate::handlers::in_failure_path;
use crate::types::{Address, ModuleInfo, ModuleOffset, Resolution, StackTrace};

/// Address-to-symbol resolver over a fixed set of loaded modules.
pub struct Symbolicator
{
    modules: Vec<ModuleInfo>,
    #[cfg(unix)]
    images: Vec<OnceCell<Option<BinaryImage>>>,
    debug_info: bool,
}

impl Symbolicator
{
    /// Symbolicator over the given modules.
    pub fn new(modules: Vec<ModuleInfo>) -> Self
    {
        Self::build(modules, true)
    }

    /// Symbolicator over the modules currently loaded in this process.
    pub fn for_current_process() -> Self
    {
        Self::new(crate::platform::loaded_modules())
    }

    /// Symbolicator that only reports `<module>+0x<offset>`.
    ///
    /// Used when symbolication is switched off, or when opening image files
    /// is not safe at the moment of the crash.
    pub fn without_debug_info(modules: Vec<ModuleInfo>) -> Self
    {
        Self::build(modules, false)
    }

    fn build(modules: Vec<ModuleInfo>, debug_info: bool) -> Self
    {
        Self {
            #[cfg(unix)]
            images: modules.iter().map(|_| OnceCell::new()).collect(),
            modules,
            debug_info,
        }
    }

    /// Modules this symbolicator knows about.
    pub fn modules(&self) -> &[ModuleInfo]
    {
        &self.modules
    }

    /// Resolve a single address. Never fails.
    pub fn resolve(&self, address: Address) -> Resolution
    {
        let module_index = self.modules.iter().position(|module| module.contains(address));
        let module = module_index.map(|index| &self.modules[index]);

        let mut resolution = Resolution::unknown();
        if self.debug_info {
            self.resolve_symbol(address, module_index, &mut resolution);
        }
        if resolution.symbol.is_none() {
            resolution.module = module.and_then(|module| module_offset(module, address));
        }
        resolution
    }

    /// Annotate every frame of `trace` in place.
    pub fn symbolicate(&self, trace: &mut StackTrace)
    {
        for frame in trace.frames_mut() {
            let resolution = self.resolve(frame.lookup_address());
            frame.annotate(resolution);
        }
    }

    #[cfg(unix)]
    fn resolve_symbol(&self, address: Address, module_index: Option<usize>, resolution: &mut Resolution)
    {
        let Some(image) = module_index.and_then(|index| self.image(index)) else {
            return;
        };
        if let Ok((symbol, location)) = image.dwarf_frame(address) {
            resolution.symbol = Some(symbol);
            resolution.location = location;
        } else if let Ok(symbol) = image.table_symbol(address) {
            resolution.symbol = Some(symbol);
            resolution.location = image.location(address);
        }
    }

    #[cfg(windows)]
    fn resolve_symbol(&self, address: Address, _module_index: Option<usize>, resolution: &mut Resolution)
    {
        if let Some((symbol, location)) = dbghelp::resolve(address) {
            resolution.symbol = Some(symbol);
            resolution.location = location;
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn resolve_symbol(&self, _address: Address, _module_index: Option<usize>, _resolution: &mut Resolution) {}

    #[cfg(unix)]
    fn image(&self, index: usize) -> Option<&BinaryImage>
    {
        let module = &self.modules[index];
        self.images[index]
            .get_or_init(|| match BinaryImage::parse(Path::new(&module.path), module.bias) {
                Ok(image) => Some(image),
                Err(err) => {
                    if !in_failure_path() {
                        debug!(module = %module.path, error = %err, "module image unavailable for symbolication");
                    }
                    None
                }
            })
            .as_ref()
    }
}

/// Offset of `address` inside `module`, in the module's own address space.
///
/// ELF offsets are relative to the load bias so they match `addr2line -e`;
/// PE offsets are relative to the image base.
fn module_offset(module: &ModuleInfo, address: Address) -> Option<ModuleOffset>
{
    let offset = address.value().checked_sub(module.bias)?;
    Some(ModuleOffset {
        name: module.short_name().to_string(),
        offset,
    })
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::FrameStatus;

    fn fake_module() -> ModuleInfo
    {
        ModuleInfo {
            path: "/opt/app/lib/libfake.so".to_string(),
            base: Address::new(0x7f00_0000_0000),
            size: 0x10_0000,
            bias: 0x7f00_0000_0000,
            eh_frame_hdr: None,
        }
    }

    #[test]
    fn test_module_fallback_when_image_is_missing()
    {
        let symbolicator = Symbolicator::new(vec![fake_module()]);
        let resolution = symbolicator.resolve(Address::new(0x7f00_0000_1234));
        assert!(resolution.symbol.is_none());
        let module = resolution.module.unwrap();
        assert_eq!(module.to_string(), "libfake.so+0x1234");
    }

    #[test]
    fn test_unknown_outside_every_module()
    {
        let symbolicator = Symbolicator::new(vec![fake_module()]);
        assert!(symbolicator.resolve(Address::new(0x10)).is_unknown());
        assert!(symbolicator.resolve(Address::ZERO).is_unknown());
    }

    #[test]
    fn test_without_debug_info_reports_offsets_only()
    {
        let symbolicator = Symbolicator::without_debug_info(crate::platform::loaded_modules());
        let here = Address::from_usize(test_without_debug_info_reports_offsets_only as usize);
        let resolution = symbolicator.resolve(here);
        assert!(resolution.symbol.is_none());
        if !symbolicator.modules().is_empty() {
            assert!(resolution.module.is_some());
        }
    }

    #[test]
    fn test_symbolicate_annotates_every_frame()
    {
        let symbolicator = Symbolicator::new(vec![fake_module()]);
        let mut trace = StackTrace::empty();
        trace.push(Address::new(0x7f00_0000_0100), Address::new(0x1000), FrameStatus::Context);
        trace.push(Address::new(0x7f00_0000_0201), Address::new(0x1100), FrameStatus::Cfi);
        trace.push(Address::new(0x20), Address::new(0x1200), FrameStatus::Cfi);
        symbolicator.symbolicate(&mut trace);

        let lines: Vec<String> = trace.frames().iter().map(ToString::to_string).collect();
        assert!(lines[0].ends_with("libfake.so+0x100"), "{}", lines[0]);
        // Caller frames are looked up one byte before the return address.
        assert!(lines[1].ends_with("libfake.so+0x200"), "{}", lines[1]);
        assert!(lines[2].ends_with("<unknown>"), "{}", lines[2]);
    }

    #[cfg(target_os = "linux")]
    #[inline(never)]
    fn resolvable_function() -> u32
    {
        std::hint::black_box(7)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolves_own_function()
    {
        let symbolicator = Symbolicator::for_current_process();
        let resolution = symbolicator.resolve(Address::from_usize(resolvable_function as usize));
        let symbol = resolution.symbol.unwrap();
        assert!(symbol.display_name().contains("resolvable_function"), "{symbol}");
        // Repeated lookups hit the cached image and agree.
        let again = symbolicator.resolve(Address::from_usize(resolvable_function as usize));
        assert_eq!(again.symbol.unwrap().display_name(), symbol.display_name());
    }
}
