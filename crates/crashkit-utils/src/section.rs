//! # Section Logging
//!
//! Timed, correlated sections of work.
//!
//! A [`SectionScope`] logs `ENTERING <name>` when created and
//! `EXITING <name> (<elapsed> ms)` when dropped, on every exit path
//! including unwinding. While it lives, a tracing span carrying `section`
//! and `correlation_id` is entered, so every event inside is tagged.
//!
//! ## Correlation ids
//!
//! Each thread keeps a stack of open sections. A root section draws a fresh
//! short id from a v4 UUID; nested sections reuse their parent's id, so one
//! id follows a whole unit of work through the log.
//!
//! ```rust,no_run
//! use crashkit_utils::section;
//!
//! fn startup()
//! {
//!     let _outer = section!("startup");
//!     {
//!         let _inner = section!("load_config"); // same correlation id
//!         tracing::info!("reading config");
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::io::Write;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use tracing::span::EnteredSpan;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::logging::is_enabled;

thread_local! {
    static OPEN_SECTIONS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for one section. Not `Send`: it must close on the thread
/// that opened it.
#[derive(Debug)]
pub struct SectionScope
{
    name: &'static str,
    correlation_id: String,
    started: Instant,
    span: Option<EnteredSpan>,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl SectionScope
{
    /// Open a section. When logging is disabled the scope is inert.
    pub fn enter(name: &'static str) -> Self
    {
        if !is_enabled() {
            return Self {
                name,
                correlation_id: String::new(),
                started: Instant::now(),
                span: None,
                active: false,
                _not_send: PhantomData,
            };
        }

        let correlation_id = OPEN_SECTIONS.with(|open| {
            let mut open = open.borrow_mut();
            let id = open.last().cloned().unwrap_or_else(new_correlation_id);
            open.push(id.clone());
            id
        });
        let span = info_span!("section", section = name, correlation_id = %correlation_id).entered();
        info!("ENTERING {name}");
        Self {
            name,
            correlation_id,
            started: Instant::now(),
            span: Some(span),
            active: true,
            _not_send: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str
    {
        self.name
    }

    /// Id shared with the enclosing sections; empty for an inert scope.
    pub fn correlation_id(&self) -> &str
    {
        &self.correlation_id
    }

    pub fn elapsed(&self) -> Duration
    {
        self.started.elapsed()
    }
}

impl Drop for SectionScope
{
    fn drop(&mut self)
    {
        if !self.active {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        info!(elapsed_ms, "EXITING {} ({elapsed_ms:.3} ms)", self.name);
        // try_with: the thread-local may already be gone during thread exit.
        let _ = OPEN_SECTIONS.try_with(|open| {
            open.borrow_mut().pop();
        });
        self.span.take();
    }
}

/// First 8 hex digits of a v4 UUID.
fn new_correlation_id() -> String
{
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Correlation id of the innermost open section on this thread.
pub fn current_correlation_id() -> Option<String>
{
    OPEN_SECTIONS.with(|open| open.borrow().last().cloned())
}

/// Box-drawn banner on stderr.
pub fn banner(title: &str, lines: &[&str])
{
    if !is_enabled() {
        return;
    }
    let text = render_banner(title, lines);
    let _ = std::io::stderr().lock().write_all(text.as_bytes());
}

/// The banner text, one box around the title and the lines.
pub fn render_banner(title: &str, lines: &[&str]) -> String
{
    let width = lines
        .iter()
        .map(|line| line.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0)
        .max(56)
        + 2;
    let rule = "═".repeat(width);
    let mut out = format!("\n╔{rule}╗\n║{title:^width$}║\n");
    if !lines.is_empty() {
        out.push_str(&format!("╟{}╢\n", "─".repeat(width)));
        for line in lines {
            out.push_str(&format!("║ {line:<inner$} ║\n", inner = width - 2));
        }
    }
    out.push_str(&format!("╚{rule}╝\n\n"));
    out
}

/// Open a [`SectionScope`]; bind the result or it closes immediately.
#[macro_export]
macro_rules! section {
    ($name:expr) => {
        $crate::section::SectionScope::enter($name)
    };
}

/// An error event flagged `critical = true`, preceded by a banner.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        if $crate::logging::is_enabled() {
            let message = ::std::format!($($arg)+);
            $crate::section::banner("CRITICAL", &[message.as_str()]);
            $crate::tracing::error!(critical = true, "{}", message);
        }
    };
}
