//! Level Sampler
//!
//! Reduces the two analysis taps to a pair of loudness estimates once per
//! frame. Buffers are sized from the taps' bin count and reused; the
//! published sample is a plain copy, so queries never wait on sampling.

use crate::graph::ProcessingGraph;
use crate::host::{AudioEngine, NodeKey};
use serde::{Deserialize, Serialize};

/// Normalized RMS levels of the input and output taps, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "wasm", derive(tsify::Tsify))]
#[cfg_attr(feature = "wasm", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase")]
pub struct LevelSample {
    pub input_level: f32,
    pub output_level: f32,
}

impl LevelSample {
    pub const SILENT: LevelSample = LevelSample {
        input_level: 0.0,
        output_level: 0.0,
    };

    /// Output relative to input in dB, `None` while either side is silent
    pub fn gain_change_db(&self) -> Option<f32> {
        if self.input_level <= 0.0 || self.output_level <= 0.0 {
            return None;
        }
        Some(level_db(self.output_level) - level_db(self.input_level))
    }
}

/// `sqrt(mean(x²)) / max_value`, clamped to [0, 1]; 0 for an empty buffer
pub fn normalized_rms(magnitudes: &[u8], max_value: f32) -> f32 {
    if magnitudes.is_empty() || !max_value.is_finite() || max_value <= 0.0 {
        return 0.0;
    }
    let sum_sq: f32 = magnitudes
        .iter()
        .map(|&m| {
            let m = m as f32;
            m * m
        })
        .sum();
    let rms = libm::sqrtf(sum_sq / magnitudes.len() as f32);
    (rms / max_value).clamp(0.0, 1.0)
}

/// Convert a normalized level to decibels (`-inf` for silence)
pub fn level_db(level: f32) -> f32 {
    if level > 0.0 {
        20.0 * libm::log10f(level)
    } else {
        f32::NEG_INFINITY
    }
}

/// Frame-driven sampler for the two taps
#[derive(Debug)]
pub struct LevelSampler {
    input_buf: Vec<u8>,
    output_buf: Vec<u8>,
    max_value: f32,
    current: LevelSample,
    frames: u64,
}

impl LevelSampler {
    pub fn new(max_value: f32) -> Self {
        Self {
            input_buf: Vec::new(),
            output_buf: Vec::new(),
            max_value,
            current: LevelSample::SILENT,
            frames: 0,
        }
    }

    /// The most recently published sample
    pub fn current(&self) -> LevelSample {
        self.current
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Sample both taps and publish; publishes silence without a graph
    pub fn sample<E: AudioEngine>(&mut self, engine: &E, graph: &ProcessingGraph) -> LevelSample {
        self.frames += 1;
        self.current = match graph.nodes() {
            Some(nodes) if graph.is_live(engine) => LevelSample {
                input_level: read_tap(engine, nodes.input_tap, &mut self.input_buf, self.max_value),
                output_level: read_tap(
                    engine,
                    nodes.output_tap,
                    &mut self.output_buf,
                    self.max_value,
                ),
            },
            _ => LevelSample::SILENT,
        };
        self.current
    }

    /// Capacity currently held by the tap buffers
    pub fn buffer_capacity(&self) -> usize {
        self.input_buf.capacity() + self.output_buf.capacity()
    }
}

fn read_tap<E: AudioEngine>(engine: &E, tap: NodeKey, buf: &mut Vec<u8>, max_value: f32) -> f32 {
    let bins = engine.frequency_bin_count(tap);
    // Resizing to the bin count keeps the buffer bounded by the FFT size
    buf.resize(bins, 0);
    engine.byte_frequency_data(tap, buf);
    normalized_rms(buf, max_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;
    use crate::sim::SimEngine;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalized_rms() {
        assert_relative_eq!(normalized_rms(&[], 255.0), 0.0);
        assert_relative_eq!(normalized_rms(&[0, 0, 0], 255.0), 0.0);
        assert_relative_eq!(normalized_rms(&[255; 64], 255.0), 1.0);
        assert_relative_eq!(normalized_rms(&[255; 64], f32::NAN), 0.0);
        // sqrt((3² + 4²) / 2) = sqrt(12.5)
        assert_relative_eq!(
            normalized_rms(&[3, 4], 255.0),
            12.5f32.sqrt() / 255.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_level_db() {
        assert_relative_eq!(level_db(1.0), 0.0);
        assert_relative_eq!(level_db(0.1), -20.0, epsilon = 1e-4);
        assert_eq!(level_db(0.0), f32::NEG_INFINITY);

        let sample = LevelSample {
            input_level: 0.5,
            output_level: 0.25,
        };
        assert_relative_eq!(sample.gain_change_db().unwrap(), -6.0206, epsilon = 1e-3);
        assert_eq!(LevelSample::SILENT.gain_change_db(), None);
    }

    #[test]
    fn test_silent_without_graph() {
        let engine = SimEngine::new();
        let graph = ProcessingGraph::new(256);
        let mut sampler = LevelSampler::new(255.0);
        assert_eq!(sampler.sample(&engine, &graph), LevelSample::SILENT);
        assert_eq!(sampler.frames(), 1);
    }

    #[test]
    fn test_samples_both_taps() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let nodes = graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap()
            .nodes();
        engine.set_magnitudes(nodes.input_tap, vec![255; 128]);
        engine.set_magnitudes(nodes.output_tap, vec![51; 128]);

        let mut sampler = LevelSampler::new(255.0);
        let sample = sampler.sample(&engine, &graph);
        assert_relative_eq!(sample.input_level, 1.0);
        assert_relative_eq!(sample.output_level, 0.2, epsilon = 1e-6);
        assert_eq!(sampler.current(), sample);
    }

    #[test]
    fn test_buffers_do_not_grow() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap();
        let mut sampler = LevelSampler::new(255.0);
        sampler.sample(&engine, &graph);
        let capacity = sampler.buffer_capacity();
        for _ in 0..1000 {
            sampler.sample(&engine, &graph);
        }
        assert_eq!(sampler.buffer_capacity(), capacity);
    }

    #[test]
    fn test_closed_context_publishes_silence() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let nodes = graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap()
            .nodes();
        engine.set_magnitudes(nodes.input_tap, vec![200; 128]);
        let mut sampler = LevelSampler::new(255.0);
        assert!(sampler.sample(&engine, &graph).input_level > 0.0);

        engine.close();
        assert_eq!(sampler.sample(&engine, &graph), LevelSample::SILENT);
    }
}
