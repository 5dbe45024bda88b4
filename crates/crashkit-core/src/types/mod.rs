//! # Types
//!
//! Plain data shared by every part of the crash pipeline: addresses, failure
//! events, stack frames and symbol resolutions.
//!
//! Nothing in here talks to the operating system. Platform adapters build
//! these values; the reporter and the dump writer consume them.

pub mod address;
pub mod event;
pub mod stack;
pub mod symbols;

pub use address::Address;
pub use event::{
    exception_codes, AccessKind, ExceptionInfo, ExceptionKind, FailureEvent, FaultRecord, SignalEvent, SignalKind,
};
pub use stack::{FrameStatus, StackFrame, StackTrace, MAX_FRAMES};
pub use symbols::{MappedSection, ModuleInfo, ModuleOffset, Resolution, SourceLocation, SymbolLanguage, SymbolName};
