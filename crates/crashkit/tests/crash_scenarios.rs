//! End-to-end crash scenarios
//!
//! Each test runs the `crashkit` binary in one of its failure modes and
//! checks what a user would see: the report on stderr, the signal that
//! ended the process, and the minidump left in the dump directory.
//!
//! Unix only: the assertions rely on `ExitStatusExt::signal`.
#![cfg(unix)]

use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn crashkit(args: &[&str], dump_dir: &Path) -> Output
{
    Command::new(env!("CARGO_BIN_EXE_crashkit"))
        .args(args)
        .arg("--dump-dir")
        .arg(dump_dir)
        .env("RUST_LOG", "info")
        .env("CRASHKIT_LOG_FORMAT", "json")
        .env_remove("CRASHKIT_DUMP_DIR")
        .env_remove("CRASHKIT_DUMP_PREFIX")
        .env_remove("CRASHKIT_SYMBOLS")
        .env_remove("CRASHKIT_LOG_FILE")
        .output()
        .expect("failed to run crashkit")
}

fn stderr(output: &Output) -> String
{
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn dump_files(dir: &Path) -> Vec<PathBuf>
{
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "dmp"))
                .collect()
        })
        .unwrap_or_default()
}

/// `crashkit_<YYYYMMDD>_<HHMMSS>.dmp`
#[cfg(target_os = "linux")]
fn assert_dump_name(path: &Path)
{
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap();
    let parts: Vec<&str> = stem.split('_').collect();
    assert_eq!(parts.len(), 3, "unexpected dump name {stem}");
    assert_eq!(parts[0], "crashkit");
    assert!(parts[1].len() == 8 && parts[1].chars().all(|c| c.is_ascii_digit()));
    assert!(parts[2].len() == 6 && parts[2].chars().all(|c| c.is_ascii_digit()));
}

#[cfg(target_os = "linux")]
fn assert_single_minidump(dir: &Path)
{
    let dumps = dump_files(dir);
    assert_eq!(dumps.len(), 1, "expected one dump in {}", dir.display());
    assert_dump_name(&dumps[0]);
    let bytes = fs::read(&dumps[0]).unwrap();
    assert_eq!(&bytes[..4], b"MDMP");
}

fn assert_stack_trace(text: &str)
{
    assert!(text.contains("=== STACK TRACE"), "no stack trace in:\n{text}");
    assert!(text.contains("=== END STACK TRACE ==="));
    assert!(text.contains("[0] 0x"), "no frame lines in:\n{text}");
}

#[test]
fn test_null_write_reports_segfault()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["null-write"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGSEGV), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGSEGV (Segmentation fault)"));
    assert!(text.contains("Signal code: SEGV_MAPERR"));
    assert!(text.contains("Fault address: 0x0000000000000008"));
    assert!(text.contains("Hint:"));
    assert_stack_trace(&text);

    #[cfg(target_os = "linux")]
    {
        assert!(text.contains("[DUMP] Dump written successfully:"));
        assert_single_minidump(dir.path());
    }
}

#[test]
fn test_runtime_error_reports_panic()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["runtime-error"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL: uncaught panic (runtime failure)"));
    assert!(text.contains("Exception message: Test runtime error from crashkit"));
    assert!(text.contains("Location: "));
    assert_stack_trace(&text);
    // The trace starts in the code that panicked, not in the hook.
    let first_frame = text.lines().find(|line| line.starts_with("[0] 0x")).unwrap_or_default();
    assert!(!first_frame.contains("crashkit_core::"), "stderr:\n{text}");
    assert!(!first_frame.contains("std::panicking"), "stderr:\n{text}");
    // The abort that follows the panic must not produce a second report.
    assert_eq!(text.matches("!!! FATAL").count(), 1, "stderr:\n{text}");

    #[cfg(target_os = "linux")]
    assert_single_minidump(dir.path());
}

#[test]
fn test_panic_kinds_are_classified()
{
    let cases = [
        ("alloc-failure", "allocation failure"),
        ("out-of-range", "out of range"),
        ("invalid-argument", "invalid argument"),
    ];
    for (mode, kind) in cases {
        let dir = TempDir::new().unwrap();
        let output = crashkit(&[mode, "--no-dump"], dir.path());
        let text = stderr(&output);
        assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{mode} stderr:\n{text}");
        assert!(text.contains(&format!("Exception type: {kind}")), "{mode} stderr:\n{text}");
    }
}

#[test]
fn test_abort_reports_sigabrt()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["abort"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGABRT (Aborted)"));
    assert_stack_trace(&text);
    // Only hardware faults leave a dump behind.
    assert!(!text.contains("[DUMP]"), "stderr:\n{text}");
    assert!(dump_files(dir.path()).is_empty());
}

#[test]
fn test_stack_overflow_is_reported()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["stack-overflow", "--no-dump"], dir.path());
    let text = stderr(&output);

    // std's own overflow handler may run after ours and abort.
    let signal = output.status.signal();
    assert!(signal == Some(libc::SIGSEGV) || signal == Some(libc::SIGABRT), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGSEGV"), "stderr:\n{text}");
    assert!(text.contains("most likely a stack overflow"));
    // Thousands of recursive frames are cut at the cap.
    assert!(text.contains("=== STACK TRACE (50 frames) ==="), "stderr:\n{text}");
    assert!(text.contains("... (truncated at 50 frames)"));
    assert!(text.contains("[49] 0x"));
    assert!(!text.contains("[50] 0x"));
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[test]
fn test_divide_by_zero_reports_sigfpe()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["divide-by-zero"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGFPE), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGFPE (Floating point exception)"));
    assert!(text.contains("Signal code: FPE_INTDIV"));
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
fn test_illegal_instruction_reports_sigill()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["illegal-instruction", "--no-dump"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGILL), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGILL (Illegal instruction)"));
}

#[test]
fn test_no_dump_leaves_directory_empty()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["null-write", "--no-dump"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGSEGV));
    assert!(text.contains("!!! FATAL SIGNAL: SIGSEGV"));
    assert!(!text.contains("[DUMP]"), "stderr:\n{text}");
    assert!(dump_files(dir.path()).is_empty());
}

#[test]
fn test_second_install_is_a_noop()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["null-write", "--install-twice"], dir.path());
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGSEGV));
    assert!(text.contains("AlreadyInstalled"), "stderr:\n{text}");
    assert_eq!(text.matches("!!! FATAL").count(), 1);

    #[cfg(target_os = "linux")]
    assert_single_minidump(dir.path());
}

#[cfg(target_os = "linux")]
#[test]
fn test_dump_now_writes_minidump_and_exits()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["dump-now"], dir.path());
    let text = stderr(&output);

    assert!(output.status.success(), "stderr:\n{text}");
    assert!(text.contains("[DUMP] Manual dump requested"));
    let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let path = PathBuf::from(printed);
    assert_eq!(path.parent(), Some(dir.path()));
    assert_dump_name(&path);
    assert_single_minidump(dir.path());
}

#[test]
fn test_build_info_installs_nothing()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["build-info"], dir.path());
    let text = stderr(&output);

    assert!(output.status.success());
    for heading in ["--- Git (at build time) ---", "--- Build ---", "--- System ---", "--- Runtime ---"] {
        assert!(text.contains(heading), "missing {heading}");
    }
    assert!(!text.contains("crash handlers installed"));
}

#[test]
fn test_logging_demo_sections()
{
    let dir = TempDir::new().unwrap();
    let output = crashkit(&["logging-demo"], dir.path());
    let text = stderr(&output);

    assert!(output.status.success(), "stderr:\n{text}");
    for line in [
        "ENTERING database_init",
        "EXITING database_init",
        "ENTERING json_context",
        "EXITING rpc_startup",
        "ENTERING network_init",
    ] {
        assert!(text.contains(line), "missing {line}");
    }
    assert!(text.contains("\"critical\":true"));
    assert!(text.contains("\"correlation_id\""));
    assert!(dump_files(dir.path()).is_empty());
}

#[test]
fn test_unwritable_dump_directory_still_crashes()
{
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, b"file").unwrap();
    let output = crashkit(&["null-write"], &blocker.join("dumps"));
    let text = stderr(&output);

    assert_eq!(output.status.signal(), Some(libc::SIGSEGV), "stderr:\n{text}");
    assert!(text.contains("!!! FATAL SIGNAL: SIGSEGV"));
    assert!(text.contains("[DUMP] Failed to write dump:"), "stderr:\n{text}");
}
