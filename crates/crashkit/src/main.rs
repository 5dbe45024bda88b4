use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crashkit_core::{
    init_all_with, init_crash_handlers_only_with, install_crash_handlers, install_dump_handler, write_dump_now,
    CrashConfig, CrashResult,
};
use crashkit_utils::{critical, debug, error, info, init_logging, section, warn};

/// Crash-test driver: fail on purpose and watch crashkit report it.
#[derive(Parser, Debug)]
#[command(name = "crashkit")]
#[command(version)]
#[command(about = "Crash-test driver for the crashkit diagnostics toolkit", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    mode: Mode,

    /// Directory for minidumps (default: CRASHKIT_DUMP_DIR or the temp dir)
    #[arg(long, global = true, value_name = "DIR")]
    dump_dir: Option<PathBuf>,

    /// Report failures but do not write a minidump
    #[arg(long, global = true, default_value_t = false)]
    no_dump: bool,

    /// Install the handlers a second time; the second call must be a no-op
    #[arg(long, global = true, default_value_t = false)]
    install_twice: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode
{
    /// Panic with an allocation failure
    AllocFailure,
    /// Panic with a plain runtime error
    RuntimeError,
    /// Index past the end of a vector
    OutOfRange,
    /// Panic on a failed number parse
    InvalidArgument,
    /// Write through a near-null pointer (SIGSEGV)
    NullWrite,
    /// Call abort() (SIGABRT)
    Abort,
    /// Recurse until the stack runs out
    StackOverflow,
    /// Integer division by zero in hardware (SIGFPE)
    DivideByZero,
    /// Execute an undefined instruction (SIGILL)
    IllegalInstruction,
    /// Show sections, levels and banners, then exit normally
    LoggingDemo,
    /// Print build and system information without installing handlers
    BuildInfo,
    /// Write a minidump of the running process and exit normally
    DumpNow,
}

fn main()
{
    let cli = Cli::parse();

    // Initialize logging (reads from RUST_LOG env var)
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if cli.mode == Mode::BuildInfo {
        crashkit_utils::print_build_info();
        return;
    }

    if let Err(e) = install(&cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_mode(&cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn install(cli: &Cli) -> CrashResult<()>
{
    let config = crash_config(cli);
    if cli.no_dump {
        init_crash_handlers_only_with(config)?;
    } else {
        init_all_with(config)?;
    }

    if cli.install_twice {
        let crash = install_crash_handlers()?;
        info!(outcome = ?crash, "second crash handler install");
        if !cli.no_dump {
            let dump = install_dump_handler(cli.dump_dir.as_deref())?;
            info!(outcome = ?dump, "second dump handler install");
        }
    }
    Ok(())
}

/// Every panic this driver raises is meant to end the process.
fn crash_config(cli: &Cli) -> CrashConfig
{
    let config = CrashConfig::from_env().with_abort_on_panic(true);
    match &cli.dump_dir {
        Some(dir) => config.with_dump_directory(dir),
        None => config,
    }
}

fn run_mode(cli: &Cli) -> CrashResult<()>
{
    match cli.mode {
        Mode::LoggingDemo => {
            logging_demo();
            return Ok(());
        }
        Mode::DumpNow => {
            let path = dump_now(cli.dump_dir.as_deref())?;
            println!("{}", path.display());
            return Ok(());
        }
        Mode::BuildInfo => return Ok(()),
        mode => {
            println!("\nRunning crash test mode {mode:?}...");
            println!("You should see verbose crash diagnostics below.\n");
        }
    }

    match cli.mode {
        Mode::AllocFailure => alloc_failure(),
        Mode::RuntimeError => runtime_error(),
        Mode::OutOfRange => out_of_range(),
        Mode::InvalidArgument => invalid_argument(),
        Mode::NullWrite => null_write(),
        Mode::Abort => abort(),
        Mode::StackOverflow => stack_overflow(0),
        Mode::DivideByZero => divide_by_zero(),
        Mode::IllegalInstruction => illegal_instruction(),
        Mode::LoggingDemo | Mode::BuildInfo | Mode::DumpNow => {}
    }

    // Only reached if the failure did not terminate the process.
    error!(mode = ?cli.mode, "crash mode returned");
    process::exit(2)
}

fn dump_now(dir: Option<&Path>) -> CrashResult<PathBuf>
{
    let _section = section!("dump_now");
    info!("Requesting a minidump of the running process...");
    write_dump_now(dir)
}

fn alloc_failure()
{
    let _section = section!("alloc_failure");
    info!("Attempting to reserve an impossibly large buffer...");
    let mut buffer: Vec<u8> = Vec::new();
    if let Err(err) = buffer.try_reserve(black_box(usize::MAX)) {
        std::panic::panic_any(err);
    }
    // A successful reservation still has to fail the process.
    panic!("memory allocation of {} bytes succeeded unexpectedly", buffer.capacity());
}

fn runtime_error()
{
    let _section = section!("runtime_error");
    info!("Raising a runtime error...");
    panic!("Test runtime error from crashkit");
}

fn out_of_range()
{
    let _section = section!("out_of_range");
    let values = vec![1u32, 2, 3];
    let index = black_box(10usize);
    warn!(index, len = values.len(), "Indexing past the end...");
    let value = values[index];
    debug!(value, "unreachable");
}

fn invalid_argument()
{
    let _section = section!("invalid_argument");
    info!("Parsing a port number...");
    let port: u16 = black_box("forty-two").parse().expect("port must be a number");
    debug!(port, "unreachable");
}

fn null_write()
{
    let _section = section!("null_write");
    warn!("About to write through a null pointer...");
    let target = black_box(8usize) as *mut u32;
    // SAFETY: none; the write is meant to fault.
    unsafe { std::ptr::write_volatile(target, 42) };
}

fn abort()
{
    let _section = section!("abort");
    error!("Calling abort()...");
    process::abort();
}

#[allow(unconditional_recursion)]
fn stack_overflow(depth: u64)
{
    let mut buffer = [0u8; 4096];
    buffer[0] = depth as u8;
    black_box(&mut buffer);
    if depth % 1000 == 0 {
        debug!(depth, "Stack overflow depth");
    }
    stack_overflow(black_box(depth + 1));
    // Keeps the frame alive across the call so it cannot become a loop.
    black_box(&buffer);
}

fn divide_by_zero()
{
    let _section = section!("divide_by_zero");
    warn!("Dividing by zero in hardware...");
    trap_divide_by_zero();
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn trap_divide_by_zero()
{
    let divisor: i32 = black_box(0);
    let quotient: i32;
    // SAFETY: none; idiv with a zero divisor traps with SIGFPE.
    unsafe {
        std::arch::asm!(
            "cdq",
            "idiv {divisor:e}",
            divisor = in(reg) divisor,
            inout("eax") 1i32 => quotient,
            out("edx") _,
        );
    }
    debug!(quotient, "unreachable");
}

/// Integer division does not trap here; deliver the signal directly.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn trap_divide_by_zero()
{
    // SAFETY: raising a signal that has a handler installed.
    unsafe {
        libc::raise(libc::SIGFPE);
    }
}

fn illegal_instruction()
{
    let _section = section!("illegal_instruction");
    warn!("Executing an undefined instruction...");
    trap_illegal_instruction();
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn trap_illegal_instruction()
{
    // SAFETY: none; ud2 always raises an invalid opcode fault.
    unsafe { std::arch::asm!("ud2") };
}

#[cfg(target_arch = "aarch64")]
fn trap_illegal_instruction()
{
    // SAFETY: none; udf is permanently undefined.
    unsafe { std::arch::asm!("udf #0") };
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn trap_illegal_instruction()
{
    // SAFETY: raising a signal that has a handler installed.
    unsafe {
        libc::raise(libc::SIGILL);
    }
}

fn logging_demo()
{
    crashkit_utils::banner("crashkit", &["Section logging demo"]);
    info!("Starting demonstration of section logging...");
    pause(50);

    debug!("This is a DEBUG level message");
    info!("This is an INFO level message");
    warn!("This is a WARNING level message");
    error!("This is an ERROR level message");
    critical!("This is a CRITICAL level message");
    pause(50);

    {
        let _section = section!("database_init");
        info!("Connecting to database...");
        pause(100);
        info!("Loading schema...");
        pause(50);
        info!("Connection established");
    }

    {
        let _section = section!("rpc_startup");
        info!("Initializing RPC handlers...");
        pause(75);
        {
            let _section = section!("json_context");
            debug!("Creating JSON context...");
            pause(25);
            debug!("Registering methods...");
            pause(25);
        }
        info!("RPC system ready");
    }

    {
        let _section = section!("network_init");
        info!("Starting peer connections...");
        pause(150);
        warn!(peer = "192.168.1.50", "Peer slow to respond");
        pause(50);
        info!(peers = 5, "Connected to peers");
    }

    info!("All systems initialized successfully!");
}

fn pause(ms: u64)
{
    thread::sleep(Duration::from_millis(ms));
}
