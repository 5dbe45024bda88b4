//! # Build and System Information
//!
//! What was built ([`BuildInfo`], from the values `build.rs` records) and
//! where it runs ([`SystemInfo`], collected at runtime with `os_info`).
//! Printed at startup so every crash report in a log comes with the exact
//! binary and host it came from.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crashkit_utils::build_info;
//!
//! eprintln!("{}", build_info::version_line());
//! build_info::print_build_info();
//! ```

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;
use std::{env, fs};

use chrono::{DateTime, Utc};

/// Facts fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo
{
    pub version: &'static str,
    pub rustc_version: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub git_dirty: bool,
    pub built_at: Option<DateTime<Utc>>,
    pub arch: &'static str,
    pub pointer_width: u32,
}

impl BuildInfo
{
    /// Information about this build.
    pub fn current() -> Self
    {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            rustc_version: env!("CRASHKIT_RUSTC_VERSION"),
            target: env!("CRASHKIT_TARGET"),
            profile: env!("CRASHKIT_PROFILE"),
            git_hash: env!("CRASHKIT_GIT_HASH"),
            git_branch: env!("CRASHKIT_GIT_BRANCH"),
            git_dirty: env!("CRASHKIT_GIT_DIRTY") == "1",
            built_at: env!("CRASHKIT_BUILD_TIMESTAMP")
                .parse::<i64>()
                .ok()
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            arch: std::env::consts::ARCH,
            pointer_width: usize::BITS,
        }
    }

    /// Commit hash with a ` (dirty)` suffix when the tree had changes.
    pub fn commit(&self) -> String
    {
        if self.git_dirty {
            format!("{} (dirty)", self.git_hash)
        } else {
            self.git_hash.to_string()
        }
    }

    fn built_at_display(&self) -> String
    {
        self.built_at
            .map_or_else(|| "unknown".to_string(), |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    }
}

/// Facts about the host, gathered at runtime. Unknown values stay `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo
{
    pub os_type: String,
    pub os_version: String,
    pub os_bitness: String,
    pub cpu_count: Option<usize>,
    pub total_memory: Option<u64>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub executable: Option<PathBuf>,
    pub pid: u32,
}

impl SystemInfo
{
    /// Collect what the host will tell us.
    pub fn collect() -> Self
    {
        let os = os_info::get();
        Self {
            os_type: os.os_type().to_string(),
            os_version: os.version().to_string(),
            os_bitness: os.bitness().to_string(),
            cpu_count: std::thread::available_parallelism().ok().map(|count| count.get()),
            total_memory: total_memory(),
            user: first_var(&["USER", "USERNAME", "LOGNAME"]),
            host: host_name(),
            executable: env::current_exe().ok(),
            pid: std::process::id(),
        }
    }
}

fn first_var(names: &[&str]) -> Option<String>
{
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
}

fn host_name() -> Option<String>
{
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| first_var(&["HOSTNAME", "COMPUTERNAME"]))
}

/// `MemTotal` from `/proc/meminfo`, in bytes.
fn total_memory() -> Option<u64>
{
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

fn parse_mem_total(meminfo: &str) -> Option<u64>
{
    let line = meminfo.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// One-line identification: version, compiler, build time and commit.
pub fn version_line() -> String
{
    let build = BuildInfo::current();
    format!(
        "crashkit v{} [rustc {}] [{} {}] [built {}] [{}]",
        build.version,
        build.rustc_version,
        build.target,
        build.profile,
        build.built_at_display(),
        build.commit()
    )
}

/// The full build and system block.
pub fn render_build_info(build: &BuildInfo, system: &SystemInfo) -> String
{
    let rule = "=".repeat(80);
    let unknown = || "unknown".to_string();
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{:^80}", format!("crashkit v{}", build.version));
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out);

    let _ = writeln!(out, "--- Git (at build time) ---");
    let _ = writeln!(out, "Commit:           {}", build.commit());
    let _ = writeln!(out, "Branch:           {}", build.git_branch);
    let _ = writeln!(out);

    let _ = writeln!(out, "--- Build ---");
    let _ = writeln!(out, "Date:             {}", build.built_at_display());
    let _ = writeln!(out, "Compiler:         rustc {}", build.rustc_version);
    let _ = writeln!(out, "Target:           {}", build.target);
    let _ = writeln!(out, "Architecture:     {} ({}-bit)", build.arch, build.pointer_width);
    let _ = writeln!(out, "Profile:          {}", build.profile);
    let _ = writeln!(out);

    let _ = writeln!(out, "--- System ---");
    let _ = writeln!(out, "OS:               {} {} ({})", system.os_type, system.os_version, system.os_bitness);
    let _ = writeln!(out, "Host:             {}", system.host.clone().unwrap_or_else(unknown));
    let _ = writeln!(
        out,
        "CPUs:             {}",
        system.cpu_count.map_or_else(unknown, |count| count.to_string())
    );
    let _ = writeln!(
        out,
        "Memory:           {}",
        system
            .total_memory
            .map_or_else(unknown, |bytes| format!("{:.1} GB total", bytes as f64 / (1024.0 * 1024.0 * 1024.0)))
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "--- Runtime ---");
    let _ = writeln!(out, "User:             {}", system.user.clone().unwrap_or_else(unknown));
    let _ = writeln!(out, "Process ID:       {}", system.pid);
    let _ = writeln!(
        out,
        "Executable:       {}",
        system
            .executable
            .as_ref()
            .map_or_else(unknown, |path| path.display().to_string())
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{rule}");
    out
}

/// Print the build and system block to stderr.
pub fn print_build_info()
{
    let text = render_build_info(&BuildInfo::current(), &SystemInfo::collect());
    let _ = io::stderr().lock().write_all(text.as_bytes());
}
