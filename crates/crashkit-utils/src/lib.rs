//! # crashkit Utilities
//!
//! Collaborators of the crash toolkit: logging, timed sections and build
//! information.
//!
//! - [`logging`]: `tracing` subscriber setup, stderr only, with a runtime
//!   on/off switch
//! - [`section`]: RAII sections with correlation ids, `section!`,
//!   `critical!` and banners
//! - [`build_info`]: what was built and where it runs

pub mod build_info;
pub mod logging;
pub mod section;

pub use build_info::{print_build_info, version_line, BuildInfo, SystemInfo};
pub use logging::{init_logging, init_logging_with_level, is_enabled, set_enabled, LogFormat, LogLevel, LoggingError};
pub use section::{banner, current_correlation_id, SectionScope};
// Used by the exported macros
pub use tracing;
pub use tracing::{debug, error, info, trace, warn};
