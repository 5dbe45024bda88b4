//! # Configuration
//!
//! [`CrashConfig`] holds every knob of the handlers, the reporter and the
//! dump writer. It is built once, before installation, and frozen into the
//! handler registry; the handlers only ever read it.
//!
//! ## Environment Variables
//!
//! [`CrashConfig::from_env`] overlays the defaults with:
//!
//! - `CRASHKIT_DUMP_DIR`: directory for dump files
//! - `CRASHKIT_DUMP_PREFIX`: file name prefix of dump files
//! - `CRASHKIT_SYMBOLS`: `0`, `false` or `off` disables symbolication
//! - `CRASHKIT_MAX_MODULES`: modules listed in the process snapshot
//! - `CRASHKIT_ABORT_ON_PANIC`: `1`, `true` or `on` makes every panic fatal
//!
//! Values that do not parse are ignored with a warning.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashkit_core::config::CrashConfig;
//!
//! let config = CrashConfig::from_env().with_max_frames(32).with_symbolication(false);
//! crashkit_core::install_crash_handlers_with(config).expect("install failed");
//! ```

use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::dump::{DumpOptions, DUMP_DIR_ENV};
use crate::report::ReportOptions;
use crate::types::{SignalKind, MAX_FRAMES};

/// Environment variable that overrides the dump file prefix.
pub const DUMP_PREFIX_ENV: &str = "CRASHKIT_DUMP_PREFIX";
/// Environment variable that turns symbolication off.
pub const SYMBOLS_ENV: &str = "CRASHKIT_SYMBOLS";
/// Environment variable that caps the module list.
pub const MAX_MODULES_ENV: &str = "CRASHKIT_MAX_MODULES";
/// Environment variable that makes panics fatal.
pub const ABORT_ON_PANIC_ENV: &str = "CRASHKIT_ABORT_ON_PANIC";

/// Default size of the alternate signal stack.
pub const DEFAULT_ALT_STACK_SIZE: usize = 256 * 1024;

/// Signals handled by default.
pub const DEFAULT_SIGNALS: [SignalKind; 5] = [
    SignalKind::Abort,
    SignalKind::SegFault,
    SignalKind::FloatingPointError,
    SignalKind::IllegalInstruction,
    SignalKind::BusError,
];

/// Handler, reporter and dump settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashConfig
{
    /// Where dumps go. `None` means [`crate::dump::default_dump_directory`].
    pub dump_directory: Option<PathBuf>,
    /// File name prefix of dump files.
    pub dump_prefix: String,
    /// What dumps contain.
    pub dump_options: DumpOptions,
    /// Signals to handle (Unix) or CRT signals to hook (Windows).
    pub signals: Vec<SignalKind>,
    /// Alternate signal stack size in bytes; 0 keeps the thread's own stack.
    pub alt_stack_size: usize,
    /// Resolve frames to function names and lines.
    pub symbolicate: bool,
    /// Modules listed in the process snapshot.
    pub max_modules: usize,
    /// Frames walked per trace, at most [`MAX_FRAMES`].
    pub max_frames: usize,
    /// Report every panic as fatal and abort after the previous hook ran.
    ///
    /// Off by default: a panic then unwinds as usual and may be caught by
    /// `catch_unwind` or a thread join. Builds with `panic = "abort"` treat
    /// every panic as fatal regardless.
    pub abort_on_panic: bool,
}

impl Default for CrashConfig
{
    fn default() -> Self
    {
        Self {
            dump_directory: None,
            dump_prefix: default_prefix(),
            dump_options: DumpOptions::default(),
            signals: DEFAULT_SIGNALS.to_vec(),
            alt_stack_size: DEFAULT_ALT_STACK_SIZE,
            symbolicate: true,
            max_modules: 20,
            max_frames: MAX_FRAMES,
            abort_on_panic: false,
        }
    }
}

impl CrashConfig
{
    /// Defaults overlaid with the `CRASHKIT_*` environment variables.
    pub fn from_env() -> Self
    {
        Self::default().with_env_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(dir) = lookup(DUMP_DIR_ENV) {
            self.dump_directory = Some(PathBuf::from(dir));
        }
        if let Some(prefix) = lookup(DUMP_PREFIX_ENV) {
            self.dump_prefix = prefix.trim().to_string();
        }
        if let Some(value) = lookup(SYMBOLS_ENV) {
            match parse_switch(&value) {
                Some(enabled) => self.symbolicate = enabled,
                None => warn!(variable = SYMBOLS_ENV, value = %value, "ignoring unrecognised value"),
            }
        }
        if let Some(value) = lookup(ABORT_ON_PANIC_ENV) {
            match parse_switch(&value) {
                Some(enabled) => self.abort_on_panic = enabled,
                None => warn!(variable = ABORT_ON_PANIC_ENV, value = %value, "ignoring unrecognised value"),
            }
        }
        if let Some(value) = lookup(MAX_MODULES_ENV) {
            match value.trim().parse::<usize>() {
                Ok(count) => self.max_modules = count,
                Err(_) => warn!(variable = MAX_MODULES_ENV, value = %value, "ignoring unrecognised value"),
            }
        }
        self
    }

    pub fn with_dump_directory(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.dump_directory = Some(dir.into());
        self
    }

    pub fn with_dump_prefix(mut self, prefix: impl Into<String>) -> Self
    {
        self.dump_prefix = prefix.into();
        self
    }

    pub fn with_dump_options(mut self, options: DumpOptions) -> Self
    {
        self.dump_options = options;
        self
    }

    pub fn with_signals(mut self, signals: impl IntoIterator<Item = SignalKind>) -> Self
    {
        self.signals = signals.into_iter().collect();
        self
    }

    pub fn with_alt_stack_size(mut self, bytes: usize) -> Self
    {
        self.alt_stack_size = bytes;
        self
    }

    pub fn with_symbolication(mut self, enabled: bool) -> Self
    {
        self.symbolicate = enabled;
        self
    }

    pub fn with_max_modules(mut self, count: usize) -> Self
    {
        self.max_modules = count;
        self
    }

    pub fn with_abort_on_panic(mut self, enabled: bool) -> Self
    {
        self.abort_on_panic = enabled;
        self
    }

    /// Panics end the process: the build aborts on panic, or the config
    /// asks for it.
    pub fn panics_are_fatal(&self) -> bool
    {
        cfg!(panic = "abort") || self.abort_on_panic
    }

    /// Frame cap, clamped to [`MAX_FRAMES`].
    pub fn with_max_frames(mut self, count: usize) -> Self
    {
        self.max_frames = count.min(MAX_FRAMES);
        self
    }

    /// The reporter's view of this config.
    pub fn report_options(&self) -> ReportOptions
    {
        ReportOptions {
            symbolicate: self.symbolicate,
            max_frames: self.max_frames.min(MAX_FRAMES),
            max_modules: self.max_modules,
        }
    }
}

/// File stem of the running executable, or `crashkit`.
pub fn default_prefix() -> String
{
    env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "crashkit".to_string())
}

fn parse_switch(value: &str) -> Option<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> CrashConfig
    {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        CrashConfig::default().with_env_overrides(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults()
    {
        let config = CrashConfig::default();
        assert_eq!(config.signals.len(), 5);
        assert_eq!(config.alt_stack_size, 256 * 1024);
        assert!(config.symbolicate);
        assert_eq!(config.max_frames, 50);
        assert_eq!(config.max_modules, 20);
        assert!(!config.abort_on_panic);
        assert_eq!(config.dump_options, DumpOptions::all());
        assert!(!config.dump_prefix.is_empty());
    }

    #[test]
    fn test_env_overrides()
    {
        let config = overrides(&[
            ("CRASHKIT_DUMP_DIR", "/tmp/dumps"),
            ("CRASHKIT_DUMP_PREFIX", "svc"),
            ("CRASHKIT_SYMBOLS", "0"),
            ("CRASHKIT_MAX_MODULES", "5"),
            ("CRASHKIT_ABORT_ON_PANIC", "on"),
        ]);
        assert_eq!(config.dump_directory, Some(PathBuf::from("/tmp/dumps")));
        assert_eq!(config.dump_prefix, "svc");
        assert!(!config.symbolicate);
        assert_eq!(config.max_modules, 5);
        assert!(config.abort_on_panic);
        assert!(config.panics_are_fatal());
    }

    #[test]
    fn test_bad_values_are_ignored()
    {
        let config = overrides(&[
            ("CRASHKIT_SYMBOLS", "maybe"),
            ("CRASHKIT_MAX_MODULES", "lots"),
            ("CRASHKIT_DUMP_DIR", "  "),
            ("CRASHKIT_ABORT_ON_PANIC", "sometimes"),
        ]);
        assert_eq!(config, CrashConfig::default());
    }

    #[cfg(panic = "unwind")]
    #[test]
    fn test_panics_unwind_unless_configured()
    {
        assert!(!CrashConfig::default().panics_are_fatal());
        assert!(CrashConfig::default().with_abort_on_panic(true).panics_are_fatal());
    }

    #[test]
    fn test_builders_and_report_options()
    {
        let config = CrashConfig::default()
            .with_max_frames(500)
            .with_symbolication(false)
            .with_max_modules(3)
            .with_signals([SignalKind::SegFault]);
        assert_eq!(config.max_frames, MAX_FRAMES);
        assert_eq!(config.signals, vec![SignalKind::SegFault]);
        let options = config.report_options();
        assert!(!options.symbolicate);
        assert_eq!(options.max_modules, 3);
    }
}
