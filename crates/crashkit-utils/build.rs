//! Build script for crashkit-utils
//!
//! Records build-time facts for `build_info`:
//! - `CRASHKIT_RUSTC_VERSION`: compiler version (via `rustc_version`)
//! - `CRASHKIT_TARGET`, `CRASHKIT_PROFILE`: target triple and cargo profile
//! - `CRASHKIT_GIT_HASH`, `CRASHKIT_GIT_BRANCH`, `CRASHKIT_GIT_DIRTY`: the
//!   checkout being built, `unknown` outside a git work tree
//! - `CRASHKIT_BUILD_TIMESTAMP`: seconds since the Unix epoch
//!
//! ## Requirements
//!
//! - **Rust**: 1.81.0 or newer (`PanicHookInfo`, inline `const` blocks)

use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const MIN_RUST_VERSION: &str = "1.81.0";

fn main()
{
    let rustc = match rustc_version::version() {
        Ok(version) => {
            if let Ok(minimum) = rustc_version::Version::parse(MIN_RUST_VERSION) {
                if version < minimum {
                    panic!("crashkit requires Rust {minimum} or newer, found {version}");
                }
            }
            version.to_string()
        }
        Err(_) => {
            // Some build environments hide rustc; carry on without the check
            println!("cargo:warning=could not verify Rust version");
            "unknown".to_string()
        }
    };

    export("CRASHKIT_RUSTC_VERSION", &rustc);
    export("CRASHKIT_TARGET", &env::var("TARGET").unwrap_or_else(|_| "unknown".to_string()));
    export("CRASHKIT_PROFILE", &env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string()));

    let hash = git(&["rev-parse", "--short=12", "HEAD"]);
    let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).map(|status| !status.is_empty());
    export("CRASHKIT_GIT_HASH", hash.as_deref().unwrap_or("unknown"));
    export("CRASHKIT_GIT_BRANCH", branch.as_deref().unwrap_or("unknown"));
    export("CRASHKIT_GIT_DIRTY", if dirty == Some(true) { "1" } else { "0" });

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or(0);
    export("CRASHKIT_BUILD_TIMESTAMP", &timestamp.to_string());

    println!("cargo:rerun-if-changed=build.rs");
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        println!("cargo:rerun-if-changed={head}");
    }
}

fn export(name: &str, value: &str)
{
    println!("cargo:rustc-env={name}={value}");
}

/// Trimmed stdout of a successful git command.
fn git(args: &[&str]) -> Option<String>
{
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8(output.stdout).ok()?.trim().to_string())
}
