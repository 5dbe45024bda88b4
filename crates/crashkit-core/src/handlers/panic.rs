//! Panic hook.
//!
//! A panic is only a failure of the process when nothing will catch it. With
//! unwinding the hook cannot know that (`catch_unwind` and thread joins both
//! recover), so it stays out of the way and chains to the previous hook. It
//! reports, dumps and aborts when panics are fatal by configuration or by
//! the `panic = "abort"` strategy.

use std::panic::{self, PanicHookInfo};

use super::{Episode, HandlerRegistry};
use crate::context::CpuContext;
use crate::dump::FaultContext;
use crate::report::{classify_panic, Reporter};
use crate::types::{ExceptionInfo, FailureEvent, SourceLocation};

/// Chain our hook in front of the current one.
pub(super) fn install()
{
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let fatal = HandlerRegistry::global()
            .config()
            .is_some_and(crate::config::CrashConfig::panics_are_fatal);
        if fatal {
            on_fatal_panic(info);
        }
        previous(info);
        if fatal {
            // The abort is delivered to our own signal handler as a
            // re-entrant failure, which chains without reporting twice.
            std::process::abort();
        }
    }));
}

fn on_fatal_panic(info: &PanicHookInfo<'_>)
{
    let registry = HandlerRegistry::global();
    let thread_id = crate::platform::current_thread_id();
    if registry.episode().begin(thread_id) != Episode::Owner {
        return;
    }

    let thread = std::thread::current();
    let (kind, message) = classify_panic(info.payload());
    let event = FailureEvent::UncaughtException(ExceptionInfo {
        kind,
        message,
        location: info.location().map(|location| SourceLocation::new(location.file(), Some(location.line()))),
        thread_name: thread.name(),
    });
    let context = CpuContext::current();

    if registry.is_reporting() {
        let options = registry.config().map(|config| config.report_options()).unwrap_or_default();
        Reporter::stderr(options).report(&event, context.as_ref());
    }
    registry.dump_on_failure(FaultContext::manual(context.as_ref()));
}
