//! Symbol, source location and module types produced by the Symbolicator.

use std::fmt;

use super::Address;

/// Mangling scheme detected on a linkage name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Rust legacy (`_ZN...17h<hash>E`) or v0 (`_R...`) mangling.
    Rust,
    /// Itanium C++ mangling.
    Cpp,
    /// Plain C symbol or anything left unmangled.
    C,
    /// Produced by a platform engine that already undecorated the name.
    Unknown,
}

/// A function name, raw and demangled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    /// Build from a linkage name and its demangled form.
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// Name as stored in the symbol table.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    /// Demangled name, if the raw name was mangled.
    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Name to print in a frame line.
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }

    /// Detected mangling scheme.
    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.display_name())
    }
}

/// File and line of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Path as recorded in the debug info.
    pub file: String,
    /// Line number, when the line table has one.
    pub line: Option<u32>,
    /// Column number, when the line table has one.
    pub column: Option<u32>,
}

impl SourceLocation
{
    /// Location with a file and line.
    pub fn new(file: impl Into<String>, line: Option<u32>) -> Self
    {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file),
            None => f.write_str(&self.file),
        }
    }
}

/// Module that contains an address, with the address's offset into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOffset
{
    /// Short module name (file name of the shared object or executable).
    pub name: String,
    /// Offset from the module's load address.
    pub offset: u64,
}

impl fmt::Display for ModuleOffset
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}+0x{:x}", self.name, self.offset)
    }
}

/// Everything the Symbolicator learned about one address.
///
/// Each part is optional. A location is only looked up once a symbol was
/// found, and the module is filled in whenever the address falls inside a
/// loaded image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution
{
    /// Function name.
    pub symbol: Option<SymbolName>,
    /// Source file and line.
    pub location: Option<SourceLocation>,
    /// Owning module and offset.
    pub module: Option<ModuleOffset>,
}

impl Resolution
{
    /// Resolution for an address outside every known module.
    pub fn unknown() -> Self
    {
        Self::default()
    }

    /// `true` if nothing at all is known about the address.
    pub fn is_unknown(&self) -> bool
    {
        self.symbol.is_none() && self.module.is_none()
    }
}

/// A loaded executable image.
///
/// Produced by the platform module enumeration and shared by the snapshot,
/// the Stack Walker (for CFI lookup) and the Symbolicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Full path of the image on disk (or the loader's name for it).
    pub path: String,
    /// Lowest mapped address of the image.
    pub base: Address,
    /// Size of the mapped range.
    pub size: u64,
    /// Difference between runtime and link-time addresses.
    pub bias: u64,
    /// Runtime location of `PT_GNU_EH_FRAME`, when the image has one.
    pub eh_frame_hdr: Option<MappedSection>,
}

/// A section of a loaded image, at its runtime address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedSection
{
    /// Runtime address of the first byte.
    pub address: Address,
    /// Size in bytes.
    pub size: u64,
}

impl ModuleInfo
{
    /// File name of the image, used in `<module>+0x<offset>` frames.
    pub fn short_name(&self) -> &str
    {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.path)
    }

    /// `true` if `address` falls inside the image's mapped range.
    pub fn contains(&self, address: Address) -> bool
    {
        address
            .offset_from(self.base)
            .is_some_and(|offset| offset < self.size)
    }

    /// End of the mapped range (exclusive).
    pub fn end(&self) -> Address
    {
        self.base + self.size
    }
}
