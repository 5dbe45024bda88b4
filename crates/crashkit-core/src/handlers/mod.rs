//! # Handler Installer
//!
//! Registers the process-wide failure handlers and owns the registry they
//! report through.
//!
//! ## Handler families
//!
//! - **Crash handlers** ([`install_crash_handlers`]): a panic hook, plus fatal
//!   signal handlers (Unix `sigaction`, Windows CRT `signal`). They write the
//!   diagnostic report.
//! - **Dump handler** ([`install_dump_handler`]): on Unix the same signal
//!   handlers, now also writing a minidump; on Windows the top-level
//!   unhandled exception filter.
//!
//! Each family installs once. A second call is a no-op that returns
//! [`InstallOutcome::AlreadyInstalled`].
//!
//! ## The registry
//!
//! One static [`HandlerRegistry`] holds the frozen [`CrashConfig`], the
//! per-family flags and the episode guard. The handlers only read it through
//! atomics and `OnceCell::get`, so nothing in the failure path takes a lock.
//!
//! ## Episodes
//!
//! A failure episode starts when the first handler claims the guard. Any
//! later handler invocation on the same thread (a fault while reporting, the
//! `abort()` that ends a panic) skips straight to chaining. Other threads that
//! fault meanwhile wait a bounded time for the process to die, then chain;
//! their reports are not written.

mod panic;
#[cfg(unix)]
mod signals;
#[cfg(windows)]
mod windows;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::config::CrashConfig;
use crate::dump::{self, DumpOptions, DumpRequest, FaultContext};
use crate::error::CrashResult;
use crate::report::DiagnosticSink;

/// What an install call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome
{
    /// The handlers are now registered.
    Installed,
    /// They already were; nothing changed.
    AlreadyInstalled,
}

/// Poll interval while another thread owns the episode.
const EPISODE_POLL: Duration = Duration::from_millis(10);
/// Give up waiting for the owning thread after this many polls (about 5 s).
const EPISODE_POLLS: u32 = 500;

/// Who may report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Episode
{
    /// This call started the episode and reports it.
    Owner,
    /// The owning thread failed again while reporting.
    Reentrant,
    /// Another thread owns the episode.
    Busy,
}

/// One-shot guard around failure reporting.
#[derive(Debug)]
pub(crate) struct EpisodeGuard
{
    active: AtomicBool,
    owner: AtomicU64,
}

impl EpisodeGuard
{
    const fn new() -> Self
    {
        Self {
            active: AtomicBool::new(false),
            owner: AtomicU64::new(0),
        }
    }

    /// Claim the episode for `thread_id`.
    pub(crate) fn begin(&self, thread_id: u64) -> Episode
    {
        if self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            self.owner.store(thread_id, Ordering::Release);
            return Episode::Owner;
        }
        if self.owner.load(Ordering::Acquire) == thread_id {
            Episode::Reentrant
        } else {
            Episode::Busy
        }
    }

    /// `true` from the first claim until the process ends.
    pub(crate) fn is_active(&self) -> bool
    {
        self.active.load(Ordering::Acquire)
    }

    /// Sleep while another thread reports, up to the poll budget.
    pub(crate) fn wait(&self)
    {
        for _ in 0..EPISODE_POLLS {
            if !self.active.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(EPISODE_POLL);
        }
    }

    #[cfg(test)]
    fn reset(&self)
    {
        self.owner.store(0, Ordering::Release);
        self.active.store(false, Ordering::Release);
    }
}

/// Process-wide handler state.
#[derive(Debug)]
pub struct HandlerRegistry
{
    config: OnceCell<CrashConfig>,
    dump_directory: OnceCell<PathBuf>,
    crash_installed: AtomicBool,
    dump_installed: AtomicBool,
    platform_installed: AtomicBool,
    reporting: AtomicBool,
    dumping: AtomicBool,
    episode: EpisodeGuard,
}

static REGISTRY: HandlerRegistry = HandlerRegistry::new();

impl HandlerRegistry
{
    const fn new() -> Self
    {
        Self {
            config: OnceCell::new(),
            dump_directory: OnceCell::new(),
            crash_installed: AtomicBool::new(false),
            dump_installed: AtomicBool::new(false),
            platform_installed: AtomicBool::new(false),
            reporting: AtomicBool::new(false),
            dumping: AtomicBool::new(false),
            episode: EpisodeGuard::new(),
        }
    }

    /// The singleton.
    pub fn global() -> &'static HandlerRegistry
    {
        &REGISTRY
    }

    /// The config frozen by the first install call.
    pub fn config(&self) -> Option<&CrashConfig>
    {
        self.config.get()
    }

    /// Diagnostic reports are enabled.
    pub fn is_reporting(&self) -> bool
    {
        self.reporting.load(Ordering::Acquire)
    }

    /// Dump-on-fault is enabled.
    pub fn is_dumping(&self) -> bool
    {
        self.dumping.load(Ordering::Acquire)
    }

    pub(crate) fn episode(&self) -> &EpisodeGuard
    {
        &self.episode
    }

    fn freeze_config(&self, config: CrashConfig) -> &CrashConfig
    {
        self.config.get_or_init(|| config)
    }

    /// Register the OS-level handlers once, whichever family asks first.
    fn install_platform(&self, config: &'static CrashConfig) -> CrashResult<()>
    {
        if self.platform_installed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Ok(());
        }
        let result = install_platform_handlers(config);
        if result.is_err() {
            self.platform_installed.store(false, Ordering::Release);
        }
        result
    }

    /// Dump directory and prefix, with an explicit `directory` taking priority
    /// over the one given to [`install_dump_handler`], then the config.
    pub fn dump_location(&self, directory: Option<&Path>) -> (PathBuf, String)
    {
        let prefix = self
            .config()
            .map_or_else(crate::config::default_prefix, |config| config.dump_prefix.clone());
        let directory = directory
            .map(Path::to_path_buf)
            .or_else(|| self.dump_directory.get().cloned())
            .or_else(|| self.config().and_then(|config| config.dump_directory.clone()))
            .unwrap_or_else(|| dump::default_dump_directory(&prefix));
        (directory, prefix)
    }

    /// Write a dump for the failure being handled, if dumping is enabled.
    /// Failures are reported on the sink and otherwise ignored.
    pub(crate) fn dump_on_failure(&self, fault_context: FaultContext<'_>)
    {
        if !self.is_dumping() {
            return;
        }
        let (directory, prefix) = self.dump_location(None);
        let options = self.config().map_or_else(DumpOptions::default, |config| config.dump_options);
        let request = DumpRequest {
            target_path: dump::dump_file_path(&directory, &prefix, chrono::Local::now().naive_local()),
            fault_context,
            options,
        };
        let mut sink = DiagnosticSink::stderr();
        let _ = dump::write_dump(&request, &mut sink);
    }
}

#[cfg(unix)]
fn install_platform_handlers(config: &'static CrashConfig) -> CrashResult<()>
{
    signals::install(config)
}

#[cfg(windows)]
fn install_platform_handlers(config: &'static CrashConfig) -> CrashResult<()>
{
    windows::install(config)
}

#[cfg(not(any(unix, windows)))]
fn install_platform_handlers(_config: &'static CrashConfig) -> CrashResult<()>
{
    Ok(())
}

/// `true` once a failure episode has started.
///
/// Nothing emits `tracing` events from then on: the failing code may hold
/// the subscriber's writers, and the report goes to the raw sink anyway.
pub fn in_failure_path() -> bool
{
    REGISTRY.episode.is_active()
}

/// The config the handlers were installed with, if any.
pub fn installed_config() -> Option<&'static CrashConfig>
{
    REGISTRY.config()
}

/// Install the panic hook and fatal signal handlers with [`CrashConfig::from_env`].
pub fn install_crash_handlers() -> CrashResult<InstallOutcome>
{
    install_crash_handlers_with(CrashConfig::from_env())
}

/// Install the panic hook and fatal signal handlers.
///
/// The first install call of either family freezes its config; later calls
/// use the frozen one.
pub fn install_crash_handlers_with(config: CrashConfig) -> CrashResult<InstallOutcome>
{
    if REGISTRY.crash_installed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        debug!("crash handlers already installed");
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    let config = REGISTRY.freeze_config(config);
    if let Err(err) = REGISTRY.install_platform(config) {
        REGISTRY.crash_installed.store(false, Ordering::Release);
        return Err(err);
    }
    panic::install();
    REGISTRY.reporting.store(true, Ordering::Release);
    info!(signals = config.signals.len(), symbolicate = config.symbolicate, "crash handlers installed");
    Ok(InstallOutcome::Installed)
}

/// Write a minidump when the process fails.
///
/// Dumps go to `directory`, or else to the configured or default directory.
pub fn install_dump_handler(directory: Option<&Path>) -> CrashResult<InstallOutcome>
{
    if REGISTRY.dump_installed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        debug!("dump handler already installed");
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    if let Some(directory) = directory {
        let _ = REGISTRY.dump_directory.set(directory.to_path_buf());
    }
    let config = REGISTRY.freeze_config(CrashConfig::from_env());
    if let Err(err) = REGISTRY.install_platform(config) {
        REGISTRY.dump_installed.store(false, Ordering::Release);
        return Err(err);
    }
    REGISTRY.dumping.store(true, Ordering::Release);
    let (directory, _) = REGISTRY.dump_location(None);
    info!(directory = %directory.display(), "dump handler installed");
    Ok(InstallOutcome::Installed)
}

/// Print the banner and build info, then install both handler families.
pub fn init_all() -> CrashResult<()>
{
    init_with(CrashConfig::from_env(), true, true)
}

/// [`init_all`] with an explicit config instead of [`CrashConfig::from_env`].
pub fn init_all_with(config: CrashConfig) -> CrashResult<()>
{
    init_with(config, true, true)
}

/// [`init_all`] without the dump handler.
pub fn init_crash_handlers_only() -> CrashResult<()>
{
    init_with(CrashConfig::from_env(), true, false)
}

/// [`init_crash_handlers_only`] with an explicit config.
pub fn init_crash_handlers_only_with(config: CrashConfig) -> CrashResult<()>
{
    init_with(config, true, false)
}

/// [`init_all`] without the crash handlers.
pub fn init_dump_only() -> CrashResult<()>
{
    init_with(CrashConfig::from_env(), false, true)
}

fn init_with(config: CrashConfig, crash: bool, dump: bool) -> CrashResult<()>
{
    crashkit_utils::banner(
        "CRASHKIT",
        &[
            &crashkit_utils::build_info::version_line(),
            "Fatal failures are reported on stderr",
        ],
    );
    crashkit_utils::build_info::print_build_info();

    // Ignored if an earlier install already froze a config.
    REGISTRY.freeze_config(config.clone());
    let crash_outcome = if crash { Some(install_crash_handlers_with(config)?) } else { None };
    let dump_outcome = if dump { Some(install_dump_handler(None)?) } else { None };
    let (directory, _) = REGISTRY.dump_location(None);
    info!(
        crash_handlers = ?crash_outcome,
        dump_handler = ?dump_outcome,
        dump_directory = %directory.display(),
        "crash capture initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_episode_owner_then_reentrant()
    {
        let guard = EpisodeGuard::new();
        assert_eq!(guard.begin(7), Episode::Owner);
        assert_eq!(guard.begin(7), Episode::Reentrant);
        assert_eq!(guard.begin(8), Episode::Busy);
        guard.reset();
        assert_eq!(guard.begin(8), Episode::Owner);
    }

    #[test]
    fn test_wait_returns_when_idle()
    {
        let guard = EpisodeGuard::new();
        let start = std::time::Instant::now();
        guard.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_dump_location_prefers_explicit_directory()
    {
        let registry = HandlerRegistry::new();
        let _ = registry.dump_directory.set(PathBuf::from("/from/install"));
        let (dir, prefix) = registry.dump_location(Some(Path::new("/explicit")));
        assert_eq!(dir, Path::new("/explicit"));
        assert!(!prefix.is_empty());
        let (dir, _) = registry.dump_location(None);
        assert_eq!(dir, Path::new("/from/install"));
    }

    #[test]
    fn test_dump_location_uses_config()
    {
        let registry = HandlerRegistry::new();
        registry.freeze_config(CrashConfig::default().with_dump_directory("/cfg").with_dump_prefix("svc"));
        assert_eq!(registry.dump_location(None), (PathBuf::from("/cfg"), "svc".to_string()));
    }
}
