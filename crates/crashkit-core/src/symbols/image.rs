//! ELF images on disk: DWARF and symbol-table lookups.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use once_cell::sync::OnceCell;

use super::demangle::make_symbol_name;
use crate::error::{CrashError, CrashResult};
use crate::types::{Address, SourceLocation, SymbolName};

type OwnedReader = EndianArcSlice<RunTimeEndian>;

const DWARF_SECTIONS: &[(SectionId, &str)] = &[
    (SectionId::DebugAbbrev, ".debug_abbrev"),
    (SectionId::DebugAddr, ".debug_addr"),
    (SectionId::DebugAranges, ".debug_aranges"),
    (SectionId::DebugInfo, ".debug_info"),
    (SectionId::DebugLine, ".debug_line"),
    (SectionId::DebugLineStr, ".debug_line_str"),
    (SectionId::DebugRanges, ".debug_ranges"),
    (SectionId::DebugRngLists, ".debug_rnglists"),
    (SectionId::DebugStr, ".debug_str"),
    (SectionId::DebugStrOffsets, ".debug_str_offsets"),
];

fn load_section_bytes(file: &object::File<'_>, name: &str) -> CrashResult<Option<Arc<[u8]>>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section.uncompressed_data()?;
    Ok(Some(match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
        Cow::Owned(vec) => vec.into(),
    }))
}

/// One entry of the ELF symbol table.
#[derive(Debug, Clone)]
struct TableSymbol
{
    address: u64,
    size: u64,
    name: String,
}

/// A loaded module's file, parsed lazily for symbolication.
///
/// The DWARF context and the symbol table are each built on first use and
/// then cached, so repeated lookups during one crash report cost one parse.
pub struct BinaryImage
{
    path: PathBuf,
    bias: u64,
    endian: RunTimeEndian,
    debug_sections: HashMap<SectionId, Arc<[u8]>>,
    symbols: Vec<TableSymbol>,
    context_cache: OnceCell<Option<Context<OwnedReader>>>,
}

impl BinaryImage
{
    /// Read and index the file at `path`, loaded with the given bias.
    pub fn parse(path: &Path, bias: u64) -> CrashResult<Self>
    {
        let bytes = fs::read(path)?;
        let file = object::File::parse(&*bytes)?;
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut debug_sections = HashMap::new();
        for (id, name) in DWARF_SECTIONS {
            if let Some(data) = load_section_bytes(&file, name)? {
                debug_sections.insert(*id, data);
            }
        }

        let mut symbols: Vec<TableSymbol> = file
            .symbols()
            .chain(file.dynamic_symbols())
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition())
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                (!name.is_empty()).then(|| TableSymbol {
                    address: symbol.address(),
                    size: symbol.size(),
                    name: name.to_string(),
                })
            })
            .collect();
        symbols.sort_by_key(|symbol| symbol.address);
        symbols.dedup_by_key(|symbol| symbol.address);

        Ok(Self {
            path: path.to_path_buf(),
            bias,
            endian,
            debug_sections,
            symbols,
            context_cache: OnceCell::new(),
        })
    }

    /// Path the image was read from.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// `true` if the file carries DWARF line and function information.
    pub fn has_debug_info(&self) -> bool
    {
        self.debug_sections.contains_key(&SectionId::DebugInfo)
    }

    /// Translate a runtime address into the file's address space.
    pub fn file_address(&self, address: Address) -> Option<u64>
    {
        address.value().checked_sub(self.bias)
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    fn symbol_context(&self) -> Option<&Context<OwnedReader>>
    {
        self.context_cache
            .get_or_init(|| {
                if !self.has_debug_info() {
                    return None;
                }
                let dwarf = Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section))).ok()?;
                Context::from_dwarf(dwarf).ok()
            })
            .as_ref()
    }

    /// Function name and source location from DWARF.
    ///
    /// An address inside inlined code belongs to a chain of frames, innermost
    /// first. The frame is named after the outermost function of the chain,
    /// the one that owns the machine code, and located at the line of that
    /// function the address falls on, which for an inlined call is the call
    /// site.
    pub fn dwarf_frame(&self, address: Address) -> CrashResult<(SymbolName, Option<SourceLocation>)>
    {
        let file_addr = self.file_address(address).ok_or(CrashError::SymbolResolution(address))?;
        let ctx = self.symbol_context().ok_or(CrashError::SymbolResolution(address))?;

        let mut outermost = None;
        let mut frames = ctx.find_frames(file_addr).skip_all_loads()?;
        while let Some(frame) = frames.next()? {
            if let Some(raw) = frame.function.as_ref().and_then(|func| func.raw_name().ok()) {
                let location = frame.location.as_ref().and_then(source_location);
                outermost = Some((make_symbol_name(raw.into_owned()), location));
            }
        }
        outermost.ok_or(CrashError::SymbolResolution(address))
    }

    /// Enclosing function from the ELF symbol table.
    pub fn table_symbol(&self, address: Address) -> CrashResult<SymbolName>
    {
        let file_addr = self.file_address(address).ok_or(CrashError::SymbolResolution(address))?;
        let index = self.symbols.partition_point(|symbol| symbol.address <= file_addr);
        let symbol = index
            .checked_sub(1)
            .map(|i| &self.symbols[i])
            .filter(|symbol| symbol.size == 0 || file_addr < symbol.address + symbol.size)
            .ok_or(CrashError::SymbolResolution(address))?;
        Ok(make_symbol_name(symbol.name.clone()))
    }

    /// Source file and line from the DWARF line table.
    pub fn location(&self, address: Address) -> Option<SourceLocation>
    {
        let file_addr = self.file_address(address)?;
        let location = self.symbol_context()?.find_location(file_addr).ok()??;
        source_location(&location)
    }
}

fn source_location(location: &addr2line::Location<'_>) -> Option<SourceLocation>
{
    Some(SourceLocation {
        file: location.file?.to_string(),
        line: location.line,
        column: location.column,
    })
}

#[cfg(all(test, target_os = "linux"))]
mod tests
{
    use super::*;

    #[inline(never)]
    fn marker_function() -> usize
    {
        std::hint::black_box(42)
    }

    #[test]
    fn test_table_symbol_of_test_binary()
    {
        let modules = crate::platform::loaded_modules();
        let main = &modules[0];
        let image = BinaryImage::parse(Path::new(&main.path), main.bias).unwrap();

        let address = Address::from_usize(marker_function as usize);
        let name = image
            .dwarf_frame(address)
            .map(|(name, _)| name)
            .or_else(|_| image.table_symbol(address))
            .unwrap();
        assert!(name.display_name().ends_with("marker_function"), "{}", name.display_name());
    }

    #[inline(never)]
    fn capture_here() -> Option<(crate::context::CpuContext, u32)>
    {
        let (context, line) = (crate::context::CpuContext::current(), line!());
        Some((context?, line))
    }

    #[test]
    fn test_inlined_code_is_named_after_its_caller()
    {
        let Some((context, line)) = capture_here() else {
            return;
        };
        let modules = crate::platform::loaded_modules();
        let main = &modules[0];
        let image = BinaryImage::parse(Path::new(&main.path), main.bias).unwrap();

        let (name, location) = image.dwarf_frame(context.pc()).unwrap();
        assert!(name.display_name().ends_with("capture_here"), "{}", name.display_name());
        let location = location.unwrap();
        assert!(location.file.ends_with("image.rs"), "{location}");
        assert_eq!(location.line, Some(line));
    }

    #[test]
    fn test_address_below_bias_is_unresolved()
    {
        let modules = crate::platform::loaded_modules();
        let main = &modules[0];
        let image = BinaryImage::parse(Path::new(&main.path), main.bias).unwrap();
        if main.bias > 0 {
            assert!(image.table_symbol(Address::new(main.bias - 1)).is_err());
        }
    }
}
