//! Common imports for programs that install crashkit

pub use crate::config::CrashConfig;
pub use crate::dump::{write_dump_now, DumpOptions};
pub use crate::error::{CrashError, CrashResult};
pub use crate::handlers::{
    init_all, init_all_with, init_crash_handlers_only, init_crash_handlers_only_with, init_dump_only,
    install_crash_handlers, install_crash_handlers_with, install_dump_handler, InstallOutcome,
};
pub use crate::types::{Address, ExceptionKind, SignalKind, StackTrace};
