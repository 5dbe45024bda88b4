//! # Error Types
//!
//! Error handling for crash capture.
//!
//! Every fallible step of the crash pipeline (symbol lookup, stack reads,
//! dump I/O, handler registration) reports through [`CrashError`]. The
//! failure handlers themselves never let one of these escape: each boundary
//! downgrades the error to a line on the diagnostic sink or a partial result,
//! and the process still terminates through the previous handler.

use std::io;

use thiserror::Error;

use crate::types::Address;

/// Main error type for crash capture operations
///
/// ## Error Categories
///
/// 1. **Resolution errors**: SymbolResolution, Dwarf, Object
/// 2. **Capture errors**: ContextCapture, MemoryRead
/// 3. **Dump errors**: DumpIo, DumpUnsupported
/// 4. **Installation errors**: AlreadyInstalled, SignalRegistration, Win32
/// 5. **Classification errors**: UnknownExceptionKind
#[derive(Error, Debug)]
pub enum CrashError
{
    /// No symbol could be found for an address
    ///
    /// The Symbolicator maps this to a module-relative or `<unknown>` frame,
    /// so it is only visible to callers of the lower-level image lookups.
    #[error("No symbol for address {0}")]
    SymbolResolution(Address),

    /// The CPU context of the faulting thread could not be captured
    ///
    /// The reporter prints "no stack trace available" in its place.
    #[error("Failed to capture CPU context: {0}")]
    ContextCapture(String),

    /// Creating, writing or closing a dump file failed
    #[error("Dump I/O error: {0}")]
    DumpIo(#[from] io::Error),

    /// Dump writing is not implemented on this target
    #[error("Dump writing is not supported on {0}")]
    DumpUnsupported(&'static str),

    /// A handler family was already registered
    ///
    /// Used internally; the public install API reports
    /// [`InstallOutcome::AlreadyInstalled`](crate::handlers::InstallOutcome) instead.
    #[error("Handler already installed: {0}")]
    AlreadyInstalled(&'static str),

    /// A panic payload had a type the classifier does not recognise
    #[error("Unknown exception kind")]
    UnknownExceptionKind,

    /// `sigaction` or `sigaltstack` rejected a registration
    #[cfg(unix)]
    #[error("Failed to register signal handler for {signal}: {source}")]
    SignalRegistration
    {
        /// Signal name (e.g. `SIGSEGV`)
        signal: &'static str,
        /// Underlying errno
        #[source]
        source: nix::Error,
    },

    /// A Win32 API call failed
    #[cfg(windows)]
    #[error("{operation} failed with Win32 error {code}")]
    Win32
    {
        /// Name of the API that failed
        operation: &'static str,
        /// Value of `GetLastError()`
        code: u32,
    },

    /// Reading process memory failed (unmapped or protected page)
    #[error("Failed to read memory at {address}")]
    MemoryRead
    {
        /// Address of the first byte that could not be read
        address: Address,
    },

    /// DWARF or CFI data was malformed
    #[error("DWARF error: {0}")]
    Dwarf(#[from] gimli::Error),

    /// An object file could not be parsed
    #[error("Object parse error: {0}")]
    Object(#[from] object::Error),
}

/// Result type for crash capture operations
pub type CrashResult<T> = std::result::Result<T, CrashError>;

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_memory_read_display()
    {
        let err = CrashError::MemoryRead {
            address: Address::new(0xdead_beef),
        };
        assert_eq!(err.to_string(), "Failed to read memory at 0x00000000deadbeef");
    }

    #[test]
    fn test_io_error_converts_to_dump_io()
    {
        let err: CrashError = io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into();
        assert!(matches!(err, CrashError::DumpIo(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
