//! Tests for error handling

use std::io;

use crashkit_core::error::{CrashError, CrashResult};
use crashkit_core::types::Address;

#[test]
fn test_symbol_resolution_names_address()
{
    let error = CrashError::SymbolResolution(Address::new(0x4010));
    assert_eq!(error.to_string(), "No symbol for address 0x0000000000004010");
}

#[test]
fn test_context_capture_display()
{
    let error = CrashError::ContextCapture("unsupported architecture".to_string());
    let message = format!("{}", error);
    assert!(message.contains("CPU context"));
    assert!(message.contains("unsupported architecture"));
}

#[test]
fn test_dump_unsupported_display()
{
    let error = CrashError::DumpUnsupported("macos");
    assert_eq!(error.to_string(), "Dump writing is not supported on macos");
}

#[test]
fn test_already_installed_display()
{
    let error = CrashError::AlreadyInstalled("crash handlers");
    assert!(error.to_string().contains("crash handlers"));
}

#[test]
fn test_unknown_exception_kind_display()
{
    assert_eq!(CrashError::UnknownExceptionKind.to_string(), "Unknown exception kind");
}

#[test]
fn test_io_error_conversion_keeps_source()
{
    fn create() -> CrashResult<()>
    {
        Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"))?;
        Ok(())
    }

    let error = create().unwrap_err();
    assert!(matches!(error, CrashError::DumpIo(_)));
    assert!(error.to_string().starts_with("Dump I/O error:"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_dwarf_error_conversion()
{
    let error: CrashError = gimli::Error::UnexpectedEof(gimli::ReaderOffsetId(0)).into();
    assert!(matches!(error, CrashError::Dwarf(_)));
    assert!(error.to_string().starts_with("DWARF error:"));
}

#[cfg(unix)]
#[test]
fn test_signal_registration_display()
{
    let error = CrashError::SignalRegistration {
        signal: "SIGSEGV",
        source: nix::Error::EINVAL,
    };
    let message = error.to_string();
    assert!(message.contains("SIGSEGV"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_result_alias()
{
    let ok: CrashResult<u32> = Ok(7);
    assert_eq!(ok.unwrap(), 7);

    let err: CrashResult<u32> = Err(CrashError::MemoryRead {
        address: Address::ZERO,
    });
    assert!(err.is_err());
}
