//! Panics under installed crash handlers
//!
//! Each test re-runs itself in a child process with the handlers installed,
//! so the hook, the abort and the process exit can be observed from outside.

use std::process::{Command, Output};

use crashkit_core::{install_crash_handlers_with, CrashConfig, InstallOutcome};

const CHILD_ENV: &str = "CRASHKIT_PANIC_POLICY_CHILD";

fn in_child() -> bool
{
    std::env::var_os(CHILD_ENV).is_some()
}

/// Run the test named `test` alone in a child process.
fn run_child(test: &str) -> Output
{
    Command::new(std::env::current_exe().unwrap())
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .env_remove("CRASHKIT_ABORT_ON_PANIC")
        .output()
        .expect("failed to re-run the test binary")
}

fn install(config: CrashConfig)
{
    let config = config.with_symbolication(false);
    assert_eq!(install_crash_handlers_with(config).unwrap(), InstallOutcome::Installed);
}

#[test]
fn test_caught_panic_does_not_end_process()
{
    if in_child() {
        install(CrashConfig::default());
        let caught = std::panic::catch_unwind(|| panic!("recoverable"));
        assert!(caught.is_err());
        println!("SURVIVED");
        return;
    }

    let output = run_child("test_caught_panic_does_not_end_process");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "status {:?}, stderr:\n{stderr}", output.status);
    assert!(stdout.contains("SURVIVED"));
    assert!(!stderr.contains("!!! FATAL"), "stderr:\n{stderr}");
    // The previous hook still prints the usual message.
    assert!(stderr.contains("recoverable"));
}

#[test]
fn test_joined_thread_panic_does_not_end_process()
{
    if in_child() {
        install(CrashConfig::default());
        let worker = std::thread::spawn(|| panic!("worker failed"));
        assert!(worker.join().is_err());
        println!("SURVIVED");
        return;
    }

    let output = run_child("test_joined_thread_panic_does_not_end_process");
    assert!(output.status.success(), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("SURVIVED"));
}

#[cfg(unix)]
#[test]
fn test_configured_fatal_panic_reports_and_aborts()
{
    use std::os::unix::process::ExitStatusExt;

    if in_child() {
        install(CrashConfig::default().with_abort_on_panic(true));
        let _ = std::panic::catch_unwind(|| panic!("index 7 out of range for slice of length 3"));
        println!("SURVIVED");
        return;
    }

    let output = run_child("test_configured_fatal_panic_reports_and_aborts");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "stderr:\n{stderr}");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("SURVIVED"));
    assert!(stderr.contains("!!! FATAL: uncaught panic (out of range)"), "stderr:\n{stderr}");
    assert_eq!(stderr.matches("!!! FATAL").count(), 1, "stderr:\n{stderr}");
}
