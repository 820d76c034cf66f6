//! System resource monitoring
//!
//! Reports RAM usage before and after the engine gives memory back.

/// System resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
}

impl ResourceUsage {
    pub fn is_known(&self) -> bool {
        self.ram_total_mb > 0
    }
}

/// Get system memory usage (best effort)
pub fn get_resource_usage() -> ResourceUsage {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .map(|meminfo| parse_meminfo(&meminfo))
            .unwrap_or_default()
    }

    #[cfg(not(target_os = "linux"))]
    {
        ResourceUsage::default()
    }
}

/// Parse `/proc/meminfo` ("MemTotal:  16318412 kB")
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(meminfo: &str) -> ResourceUsage {
    let mut total_kb: Option<u64> = None;
    let mut available_kb: Option<u64> = None;

    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match (key, value) {
            (Some("MemTotal:"), Some(v)) => total_kb = Some(v),
            (Some("MemAvailable:"), Some(v)) => available_kb = Some(v),
            _ => {}
        }
    }

    match (total_kb, available_kb) {
        (Some(total), Some(available)) if total > 0 => ResourceUsage {
            ram_used_mb: total.saturating_sub(available) / 1024,
            ram_total_mb: total / 1024,
        },
        _ => ResourceUsage::default(),
    }
}
