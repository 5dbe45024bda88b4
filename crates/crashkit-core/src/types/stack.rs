//! Stack frame and stack trace types.

use std::fmt;

use smallvec::SmallVec;

use super::symbols::{ModuleOffset, Resolution, SourceLocation, SymbolName};
use super::Address;

/// Hard cap on the number of frames in one trace.
pub const MAX_FRAMES: usize = 50;

/// How a frame's return address was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus
{
    /// Innermost frame, taken directly from the captured CPU context.
    Context,
    /// Recovered by evaluating `.eh_frame` call frame information.
    Cfi,
    /// Recovered by following the saved frame-pointer chain.
    FramePointer,
    /// Produced by the platform's own walker (`StackWalk64`).
    Platform,
}

/// One call frame of a crash trace.
#[derive(Debug, Clone)]
pub struct StackFrame
{
    /// Position in the trace, 0 is the innermost frame.
    pub index: usize,
    /// Program counter (frame 0) or return address (callers).
    pub return_address: Address,
    /// Stack pointer when the frame was active, if known.
    pub sp: Address,
    /// Function name, filled in by the Symbolicator.
    pub symbol: Option<SymbolName>,
    /// Source file and line, filled in by the Symbolicator.
    pub location: Option<SourceLocation>,
    /// Owning module, filled in by the Symbolicator.
    pub module: Option<ModuleOffset>,
    /// How the frame was recovered.
    pub status: FrameStatus,
}

impl StackFrame
{
    /// Unsymbolicated frame.
    pub fn new(index: usize, return_address: Address, sp: Address, status: FrameStatus) -> Self
    {
        Self {
            index,
            return_address,
            sp,
            symbol: None,
            location: None,
            module: None,
            status,
        }
    }

    /// Address to use for symbol lookup.
    ///
    /// Caller frames hold the address *after* the call instruction, which can
    /// belong to the next line or even the next function; stepping back one
    /// byte lands inside the call.
    pub fn lookup_address(&self) -> Address
    {
        match self.status {
            FrameStatus::Context => self.return_address,
            _ => self.return_address.checked_sub(1).unwrap_or(Address::ZERO),
        }
    }

    /// Attach the Symbolicator's findings.
    pub fn annotate(&mut self, resolution: Resolution)
    {
        self.symbol = resolution.symbol;
        self.location = resolution.location;
        self.module = resolution.module;
    }
}

/// Formats as one of the three report shapes:
///
/// - `[i] 0x<addr> <symbol>(<file>:<line>)`, or without the location
/// - `[i] 0x<addr> <module>+0x<offset>`
/// - `[i] 0x<addr> <unknown>`
impl fmt::Display for StackFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[{}] {} ", self.index, self.return_address)?;
        match (&self.symbol, &self.location, &self.module) {
            (Some(symbol), Some(location), _) => write!(f, "{symbol}({location})"),
            (Some(symbol), None, _) => write!(f, "{symbol}"),
            (None, _, Some(module)) => write!(f, "{module}"),
            (None, _, None) => f.write_str("<unknown>"),
        }
    }
}

/// Ordered call frames, innermost first.
///
/// Storage is inline up to [`MAX_FRAMES`], so collecting a trace does not
/// touch the heap.
#[derive(Debug, Clone, Default)]
pub struct StackTrace
{
    frames: SmallVec<[StackFrame; MAX_FRAMES]>,
}

impl StackTrace
{
    /// Empty trace, the result of a failed context capture.
    pub fn empty() -> Self
    {
        Self::default()
    }

    /// Append a frame. Returns `false` (and drops the frame) once the trace
    /// holds [`MAX_FRAMES`] frames.
    pub fn push(&mut self, return_address: Address, sp: Address, status: FrameStatus) -> bool
    {
        if self.frames.len() >= MAX_FRAMES {
            return false;
        }
        let index = self.frames.len();
        self.frames.push(StackFrame::new(index, return_address, sp, status));
        true
    }

    /// Number of frames.
    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    /// `true` if no frame was captured.
    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    /// `true` once the frame cap is reached.
    pub fn is_full(&self) -> bool
    {
        self.frames.len() >= MAX_FRAMES
    }

    /// Frames, innermost first.
    pub fn frames(&self) -> &[StackFrame]
    {
        &self.frames
    }

    /// Mutable frames, for annotation.
    pub fn frames_mut(&mut self) -> &mut [StackFrame]
    {
        &mut self.frames
    }

    /// Return addresses only, innermost first.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_
    {
        self.frames.iter().map(|frame| frame.return_address)
    }

    /// Keep at most `len` frames.
    pub fn truncate(&mut self, len: usize)
    {
        self.frames.truncate(len);
    }

    /// Drop the leading frames that match `skip`, renumbering the rest.
    ///
    /// A trace where every frame matches is left as it is.
    pub fn skip_leading(&mut self, skip: impl Fn(&StackFrame) -> bool)
    {
        let count = self.frames.iter().take_while(|&frame| skip(frame)).count();
        if count == 0 || count == self.frames.len() {
            return;
        }
        self.frames.drain(..count);
        for (index, frame) in self.frames.iter_mut().enumerate() {
            frame.index = index;
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::symbols::SymbolLanguage;

    #[test]
    fn test_push_stops_at_cap()
    {
        let mut trace = StackTrace::empty();
        for i in 0..(MAX_FRAMES as u64 + 10) {
            trace.push(Address::new(0x1000 + i), Address::ZERO, FrameStatus::Cfi);
        }
        assert_eq!(trace.len(), MAX_FRAMES);
        assert!(trace.is_full());
        assert_eq!(trace.frames()[MAX_FRAMES - 1].index, MAX_FRAMES - 1);
    }

    #[test]
    fn test_skip_leading_renumbers()
    {
        let mut trace = StackTrace::empty();
        for pc in [0x10u64, 0x20, 0x30, 0x40] {
            trace.push(Address::new(pc), Address::ZERO, FrameStatus::Cfi);
        }
        trace.skip_leading(|frame| frame.return_address.value() < 0x30);
        let kept: Vec<(usize, u64)> = trace.frames().iter().map(|f| (f.index, f.return_address.value())).collect();
        assert_eq!(kept, vec![(0, 0x30), (1, 0x40)]);

        trace.skip_leading(|_| true);
        assert_eq!(trace.len(), 2);
    }

    #[test]
    fn test_lookup_address_steps_back_for_callers()
    {
        let inner = StackFrame::new(0, Address::new(0x2000), Address::ZERO, FrameStatus::Context);
        let caller = StackFrame::new(1, Address::new(0x2000), Address::ZERO, FrameStatus::Cfi);
        assert_eq!(inner.lookup_address(), Address::new(0x2000));
        assert_eq!(caller.lookup_address(), Address::new(0x1fff));
    }

    #[test]
    fn test_frame_line_shapes()
    {
        let mut frame = StackFrame::new(3, Address::new(0x55d0_c3a1_b2c4), Address::ZERO, FrameStatus::Cfi);
        assert_eq!(frame.to_string(), "[3] 0x000055d0c3a1b2c4 <unknown>");

        frame.module = Some(ModuleOffset {
            name: "crashkit".into(),
            offset: 0x1b2c4,
        });
        assert_eq!(frame.to_string(), "[3] 0x000055d0c3a1b2c4 crashkit+0x1b2c4");

        frame.symbol = Some(SymbolName::new("main".into(), None, SymbolLanguage::C));
        assert_eq!(frame.to_string(), "[3] 0x000055d0c3a1b2c4 main");

        frame.location = Some(SourceLocation::new("src/main.rs", Some(42)));
        assert_eq!(frame.to_string(), "[3] 0x000055d0c3a1b2c4 main(src/main.rs:42)");
    }
}
