//! Best-effort process snapshot for the report.

use std::io::{self, Write};

use crate::platform::{self, MemoryUsage};
use crate::types::ModuleInfo;

/// Memory and thread figures, each optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSnapshot
{
    pub memory: Option<MemoryUsage>,
    pub threads: Option<usize>,
}

impl ProcessSnapshot
{
    /// Gather what the platform can tell us right now.
    pub fn capture() -> Self
    {
        Self {
            memory: platform::memory_usage(),
            threads: platform::thread_count(),
        }
    }

    /// Write the snapshot section. Parts that were not captured are left out.
    pub fn write_to<W: Write>(&self, out: &mut W, modules: &[ModuleInfo], max_modules: usize) -> io::Result<()>
    {
        writeln!(out, "=== PROCESS SNAPSHOT ===")?;
        if let Some(memory) = self.memory {
            if let Some(line) = memory_line(&memory) {
                writeln!(out, "Memory: {line}")?;
            }
        }
        if let Some(threads) = self.threads {
            writeln!(out, "Threads: {threads}")?;
        }
        if !modules.is_empty() {
            writeln!(out, "Modules ({} loaded):", modules.len())?;
            for module in modules.iter().take(max_modules) {
                writeln!(out, "  {} {}", module.base, module.path)?;
            }
            if modules.len() > max_modules {
                writeln!(out, "  ... and {} more modules", modules.len() - max_modules)?;
            }
        }
        Ok(())
    }
}

fn memory_line(memory: &MemoryUsage) -> Option<String>
{
    let pair = |label: &str, current: Option<u64>, peak: Option<u64>| match (current, peak) {
        (Some(current), Some(peak)) => Some(format!("{label} {} (peak {})", format_bytes(current), format_bytes(peak))),
        (Some(current), None) => Some(format!("{label} {}", format_bytes(current))),
        (None, Some(peak)) => Some(format!("{label} peak {}", format_bytes(peak))),
        (None, None) => None,
    };
    let parts: Vec<String> = [
        pair("resident", memory.resident, memory.peak_resident),
        pair("virtual", memory.virtual_size, memory.peak_virtual),
    ]
    .into_iter()
    .flatten()
    .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Render a byte count with a binary unit.
pub fn format_bytes(bytes: u64) -> String
{
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::Address;

    fn module(index: u64) -> ModuleInfo
    {
        ModuleInfo {
            path: format!("/usr/lib/lib{index}.so"),
            base: Address::new(0x7f00_0000_0000 + index * 0x10_0000),
            size: 0x1000,
            bias: 0x7f00_0000_0000 + index * 0x10_0000,
            eh_frame_hdr: None,
        }
    }

    fn render(snapshot: &ProcessSnapshot, modules: &[ModuleInfo], cap: usize) -> String
    {
        let mut out = Vec::new();
        snapshot.write_to(&mut out, modules, cap).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_bytes()
    {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_module_list_is_capped()
    {
        let modules: Vec<ModuleInfo> = (0..25).map(module).collect();
        let text = render(&ProcessSnapshot::default(), &modules, 20);
        assert!(text.contains("Modules (25 loaded):"));
        assert!(text.contains("lib19.so"));
        assert!(!text.contains("lib20.so"));
        assert!(text.contains("... and 5 more modules"));
    }

    #[test]
    fn test_missing_parts_are_omitted()
    {
        let text = render(&ProcessSnapshot::default(), &[], 20);
        assert_eq!(text, "=== PROCESS SNAPSHOT ===\n");

        let snapshot = ProcessSnapshot {
            memory: Some(MemoryUsage {
                resident: Some(2048),
                ..MemoryUsage::default()
            }),
            threads: Some(4),
        };
        let text = render(&snapshot, &[], 20);
        assert!(text.contains("Memory: resident 2.0 KiB\n"));
        assert!(text.contains("Threads: 4\n"));
    }
}
