//! Test doubles for downstream crates.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::resources::{ResourceSampler, ResourceUsage};

/// Sampler returning a value that can be changed from outside.
#[derive(Clone, Default)]
pub struct FixedSampler {
    usage: Arc<Mutex<ResourceUsage>>,
}

impl FixedSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            usage: Arc::new(Mutex::new(ResourceUsage {
                cpu_percent,
                memory_percent,
            })),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
        *self.usage.lock() = ResourceUsage {
            cpu_percent,
            memory_percent,
        };
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&mut self) -> ResourceUsage {
        *self.usage.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sampler_follows_updates() {
        let handle = FixedSampler::new(5.0, 20.0);
        let mut sampler = handle.clone();
        assert_eq!(sampler.sample().cpu_percent, 5.0);

        handle.set(95.0, 20.0);
        assert_eq!(sampler.sample().cpu_percent, 95.0);
    }
}
