//! Symbol demangling.
//!
//! Linkage names from symbol tables and DWARF are turned into
//! [`SymbolName`]s with a demangled form and a detected mangling scheme:
//!
//! - **Rust**: legacy (`_ZN...17h<hash>E`) and v0 (`_R...`), demangled with
//!   `rustc-demangle`. The trailing hash is dropped from report output.
//! - **C++**: Itanium (`_Z...`), kept raw.
//! - **C**: anything else.

use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Build a [`SymbolName`] from a raw linkage name.
pub(crate) fn make_symbol_name(raw: String) -> SymbolName
{
    // `{:#}` omits the `::h0123456789abcdef` hash suffix.
    let demangled = try_demangle(&raw).ok().map(|name| format!("{name:#}"));
    let language = if demangled.is_some() || raw.starts_with("_R") {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else {
        SymbolLanguage::C
    };

    SymbolName::new(raw, demangled, language)
}

/// Build a [`SymbolName`] for a name a platform engine already undecorated.
#[cfg(windows)]
pub(crate) fn undecorated_symbol_name(name: String) -> SymbolName
{
    SymbolName::new(name, None, SymbolLanguage::Unknown)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_rust_legacy_name_loses_hash()
    {
        let name = make_symbol_name("_ZN8crashkit9scenarios10null_write17h0123456789abcdefE".to_string());
        assert_eq!(name.language(), SymbolLanguage::Rust);
        assert_eq!(name.display_name(), "crashkit::scenarios::null_write");
    }

    #[test]
    fn test_c_name_is_kept()
    {
        let name = make_symbol_name("__libc_start_main".to_string());
        assert_eq!(name.language(), SymbolLanguage::C);
        assert_eq!(name.display_name(), "__libc_start_main");
        assert_eq!(name.demangled(), None);
    }
}
