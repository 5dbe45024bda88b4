//! The diagnostic sink: the process's standard error, unbuffered.
//!
//! Crash reports are written with plain `write` calls on the raw descriptor
//! (or handle), bypassing `std::io::stderr()` and its lock, which the
//! crashing thread may already hold. The descriptor is borrowed, never
//! closed.

use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;

/// Unbuffered writer over the standard error descriptor.
pub struct DiagnosticSink
{
    file: ManuallyDrop<File>,
}

impl DiagnosticSink
{
    /// Borrow fd 2.
    #[cfg(unix)]
    pub fn stderr() -> Self
    {
        use std::os::unix::io::FromRawFd;

        // SAFETY: fd 2 stays open for the life of the process, and the
        // ManuallyDrop keeps this File from closing it.
        let file = unsafe { File::from_raw_fd(libc::STDERR_FILENO) };
        Self {
            file: ManuallyDrop::new(file),
        }
    }

    /// Borrow the `STD_ERROR_HANDLE`.
    #[cfg(windows)]
    pub fn stderr() -> Self
    {
        use std::os::windows::io::FromRawHandle;

        use windows_sys::Win32::System::Console::{GetStdHandle, STD_ERROR_HANDLE};

        // SAFETY: the standard handle is owned by the process; the
        // ManuallyDrop keeps this File from closing it.
        let file = unsafe { File::from_raw_handle(GetStdHandle(STD_ERROR_HANDLE)) };
        Self {
            file: ManuallyDrop::new(file),
        }
    }
}

impl Write for DiagnosticSink
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>
    {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()>
    {
        Ok(())
    }
}
