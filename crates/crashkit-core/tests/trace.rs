//! Stack walking and symbolication against the running test binary

use crashkit_core::platform::loaded_modules;
use crashkit_core::types::{Address, FrameStatus, StackTrace, MAX_FRAMES};
use crashkit_core::{capture_trace, CpuContext, Symbolicator};

#[inline(never)]
fn walk_twice(max_frames: usize) -> Option<(StackTrace, StackTrace)>
{
    let context = CpuContext::current()?;
    let first = capture_trace(Some(&context), max_frames);
    let second = capture_trace(Some(&context), max_frames);
    Some((first, second))
}

#[inline(never)]
fn recurse_then_walk(depth: usize) -> Option<StackTrace>
{
    if depth == 0 {
        let context = CpuContext::current()?;
        return Some(capture_trace(Some(&context), MAX_FRAMES));
    }
    let trace = recurse_then_walk(std::hint::black_box(depth - 1));
    // Keeps the call out of tail position.
    std::hint::black_box(depth);
    trace
}

#[test]
fn test_walk_is_repeatable()
{
    let Some((first, second)) = walk_twice(MAX_FRAMES) else {
        return; // no register capture on this architecture
    };
    assert!(!first.is_empty());
    assert_eq!(first.frames()[0].status, FrameStatus::Context);
    let a: Vec<Address> = first.addresses().collect();
    let b: Vec<Address> = second.addresses().collect();
    assert_eq!(a, b);
}

#[test]
fn test_walk_honours_frame_cap()
{
    let Some((trace, _)) = walk_twice(2) else {
        return;
    };
    assert!(trace.len() <= 2);
    assert!(trace.len() <= MAX_FRAMES);
}

#[cfg(target_os = "linux")]
#[test]
fn test_deep_recursion_is_capped()
{
    let Some(mut trace) = recurse_then_walk(2 * MAX_FRAMES) else {
        return;
    };
    assert_eq!(trace.len(), MAX_FRAMES);
    assert!(trace.is_full());
    assert_eq!(trace.frames()[MAX_FRAMES - 1].index, MAX_FRAMES - 1);

    Symbolicator::for_current_process().symbolicate(&mut trace);
    let lines: Vec<String> = trace.frames().iter().map(ToString::to_string).collect();
    let recursive = lines.iter().filter(|line| line.contains("recurse_then_walk")).count();
    assert_eq!(recursive, MAX_FRAMES, "{lines:#?}");
}

#[test]
fn test_symbolication_is_idempotent()
{
    let Some((mut trace, _)) = walk_twice(8) else {
        return;
    };
    let symbolicator = Symbolicator::for_current_process();
    symbolicator.symbolicate(&mut trace);
    let once: Vec<String> = trace.frames().iter().map(ToString::to_string).collect();
    symbolicator.symbolicate(&mut trace);
    let twice: Vec<String> = trace.frames().iter().map(ToString::to_string).collect();
    assert_eq!(once, twice);
}

#[cfg(target_os = "linux")]
#[test]
fn test_innermost_frame_names_the_caller()
{
    let Some((mut trace, _)) = walk_twice(4) else {
        return;
    };
    Symbolicator::for_current_process().symbolicate(&mut trace);
    let line = trace.frames()[0].to_string();
    assert!(line.contains("walk_twice"), "unexpected frame: {line}");
}

#[test]
fn test_module_fallback_without_debug_info()
{
    let modules = loaded_modules();
    let Some(context) = CpuContext::current() else {
        return;
    };
    let Some(own) = modules.iter().find(|module| module.contains(context.pc())).cloned() else {
        return; // module enumeration unavailable
    };

    let resolution = Symbolicator::without_debug_info(modules).resolve(context.pc());
    assert!(resolution.symbol.is_none());
    let module = resolution.module.unwrap();
    assert_eq!(module.name, own.short_name());
    assert_eq!(module.offset, context.pc().value() - own.bias);
}

#[test]
fn test_unmapped_address_is_unknown()
{
    let symbolicator = Symbolicator::for_current_process();
    let resolution = symbolicator.resolve(Address::new(0x10));
    assert!(resolution.is_unknown());
}
