//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_SAMPLE_VALUE: f32 = 255.0;

/// Tuning knobs for the page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Delay between a source change and the re-attach (default: 100 ms)
    pub reattach_delay_ms: u64,
    /// Settle time after a client-side navigation before rescanning (default: 1000 ms)
    pub navigation_settle_ms: u64,
    /// How long a removed element must stay out of the document before the
    /// host releases it (default: 1000 ms)
    pub removal_settle_ms: u64,
    /// FFT size of both analysis taps (default: 256)
    pub fft_size: u32,
    /// Largest value a tap magnitude byte can take (default: 255)
    pub max_sample_value: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reattach_delay_ms: 100,
            navigation_settle_ms: 1000,
            removal_settle_ms: 1000,
            fft_size: 256,
            max_sample_value: DEFAULT_MAX_SAMPLE_VALUE,
        }
    }
}

impl AgentConfig {
    pub fn reattach_delay(&self) -> Duration {
        Duration::from_millis(self.reattach_delay_ms)
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn removal_settle(&self) -> Duration {
        Duration::from_millis(self.removal_settle_ms)
    }

    /// Tap magnitude scale; falls back to 255 unless finite and positive
    pub fn sample_scale(&self) -> f32 {
        if self.max_sample_value.is_finite() && self.max_sample_value > 0.0 {
            self.max_sample_value
        } else {
            DEFAULT_MAX_SAMPLE_VALUE
        }
    }

    /// Analyser FFT sizes must be a power of two in 32..=32768
    pub fn analyser_fft_size(&self) -> u32 {
        self.fft_size.clamp(32, 32768).next_power_of_two().min(32768)
    }
}
