//! # crashkit-core
//!
//! In-process crash diagnostics: when the process is about to die, say why,
//! where, and leave a minidump behind.
//!
//! ## Components
//!
//! - [`handlers`]: installs the panic hook, fatal signal handlers and the
//!   unhandled exception filter, and owns the registry they report through
//! - [`report`]: writes the human-readable report on stderr
//! - [`unwind`] and [`context`]: capture registers and walk the stack
//! - [`symbols`]: turn return addresses into function names and lines
//! - [`dump`]: write a minidump for offline analysis
//! - [`platform`]: per-OS process introspection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn main()
//! {
//!     crashkit_core::init_all().expect("crash handlers");
//!     // ... a later SIGSEGV prints a report and writes a .dmp file
//! }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: `sigaction` handlers, CFI unwinding, DWARF symbols and an
//!   in-process minidump writer
//! - **Windows**: CRT signals, `SetUnhandledExceptionFilter`, DbgHelp stack
//!   walking and symbols, `MiniDumpWriteDump`
//! - **Other Unix**: reports with frame-pointer traces, no dumps
//!
//! ## Why unsafe code is needed
//!
//! Signal handlers, raw descriptor writes, register capture and the OS
//! debugging APIs are all `unsafe`. Each call is wrapped in a safe function
//! with its precondition stated next to it.

#![allow(unsafe_code)] // Signal handlers, register capture and OS debugging APIs

pub mod config;
pub mod context;
pub mod dump;
pub mod error;
pub mod handlers;
pub mod platform;
pub mod prelude;
pub mod report;
pub mod symbols;
pub mod types;
pub mod unwind;

pub use config::CrashConfig;
pub use context::{Architecture, CpuContext};
pub use dump::{write_dump, write_dump_now, DumpOptions, DumpRequest, FaultContext};
pub use error::{CrashError, CrashResult};
pub use handlers::{
    in_failure_path, init_all, init_all_with, init_crash_handlers_only, init_crash_handlers_only_with, init_dump_only,
    install_crash_handlers, install_crash_handlers_with, install_dump_handler, installed_config, HandlerRegistry,
    InstallOutcome,
};
pub use report::{ReportOptions, Reporter};
pub use symbols::Symbolicator;
pub use unwind::capture_trace;
