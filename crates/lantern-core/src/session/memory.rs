//! Available-memory probing for load-time admission checks

/// Source of the "available memory" figure used before loading a model
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> u64;
}

/// Probe backed by `/proc/meminfo`; permissive on platforms or failures
/// where the figure cannot be read (the backend still reports its own
/// resource errors)
#[derive(Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_bytes(&self) -> u64 {
        read_meminfo_available().unwrap_or(u64::MAX)
    }
}

fn read_meminfo_available() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_available(&contents)
}

fn parse_meminfo_available(contents: &str) -> Option<u64> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}

/// Fixed-value probe for tests and configuration overrides
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_bytes(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo_available() {
        let contents = "MemTotal:       16318428 kB\nMemFree:         1168488 kB\nMemAvailable:    8643048 kB\n";
        assert_eq!(parse_meminfo_available(contents), Some(8_643_048 * 1024));
    }

    #[test]
    fn test_parse_meminfo_missing_field() {
        assert_eq!(parse_meminfo_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_fixed_probe_returns_value() {
        assert_eq!(FixedMemoryProbe(2048).available_bytes(), 2048);
    }
}
