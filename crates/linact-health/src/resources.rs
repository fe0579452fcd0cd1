//! Host resource sampling.

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// CPU and memory usage, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl ResourceUsage {
    /// Whether either value is above `threshold`.
    pub fn exceeds(&self, cpu_threshold: f64, memory_threshold: f64) -> bool {
        self.cpu_percent > cpu_threshold || self.memory_percent > memory_threshold
    }
}

/// Source of resource usage samples.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> ResourceUsage;
}

/// Samples the host through `sysinfo`.
///
/// CPU usage is measured between two refreshes, so the very first sample
/// reports 0% CPU.
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> ResourceUsage {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };
        ResourceUsage {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_exclusive() {
        let at = ResourceUsage {
            cpu_percent: 80.0,
            memory_percent: 80.0,
        };
        assert!(!at.exceeds(80.0, 80.0));

        let memory = ResourceUsage {
            cpu_percent: 10.0,
            memory_percent: 80.5,
        };
        assert!(memory.exceeds(80.0, 80.0));
    }

    #[test]
    fn test_sysinfo_sample_in_range() {
        let mut sampler = SysinfoSampler::new();
        let usage = sampler.sample();
        assert!((0.0..=100.0).contains(&usage.memory_percent));
        assert!(usage.cpu_percent >= 0.0);
    }
}
