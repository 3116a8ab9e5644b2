//! Processing Graph
//!
//! The fixed chain every captured media element feeds into:
//!
//! ```text
//! sources → input tap → dynamics → gain → output tap → destination
//! ```
//!
//! The topology is built once per rendering context and never rewired.
//! Disabling compression re-parameterizes the dynamics stage to a
//! transparent 0 dB / 1:1 setting instead of removing it from the path.

use crate::error::EngineError;
use crate::host::{AudioEngine, ContextState, NodeKey, ParamKind, StageKind};
use crate::params::ParameterSet;
use log::{debug, info, warn};

/// Node handles of a built graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNodes {
    /// Pre-processing analysis tap, where sources connect
    pub input_tap: NodeKey,
    pub compressor: NodeKey,
    pub gain: NodeKey,
    /// Post-processing analysis tap, connected to the destination
    pub output_tap: NodeKey,
}

/// Result of [`ProcessingGraph::ensure_created`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// A live graph already existed
    Existing(GraphNodes),
    /// A new context and topology were built
    Created(GraphNodes),
}

impl Creation {
    pub fn nodes(self) -> GraphNodes {
        match self {
            Creation::Existing(nodes) | Creation::Created(nodes) => nodes,
        }
    }
}

/// The per-document processing graph
#[derive(Debug)]
pub struct ProcessingGraph {
    nodes: Option<GraphNodes>,
    fft_size: u32,
    generation: u32,
}

impl ProcessingGraph {
    pub fn new(fft_size: u32) -> Self {
        Self {
            nodes: None,
            fft_size,
            generation: 0,
        }
    }

    /// Node handles, if a graph has been built
    pub fn nodes(&self) -> Option<GraphNodes> {
        self.nodes
    }

    /// Whether a graph exists and its context is not closed
    pub fn is_live<E: AudioEngine>(&self, engine: &E) -> bool {
        self.nodes.is_some() && engine.context_state() != ContextState::Closed
    }

    /// Number of contexts this graph has been built on
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Build the context and topology unless a live graph exists
    ///
    /// On failure nothing is kept, so the next call starts over.
    pub fn ensure_created<E: AudioEngine>(
        &mut self,
        engine: &mut E,
        params: &ParameterSet,
    ) -> Result<Creation, EngineError> {
        if let Some(nodes) = self.nodes {
            if engine.context_state() != ContextState::Closed {
                return Ok(Creation::Existing(nodes));
            }
            warn!("audio context closed, rebuilding processing graph");
            self.nodes = None;
        }

        engine.create_context()?;
        let nodes = self.build(engine)?;
        self.nodes = Some(nodes);
        self.generation += 1;
        self.apply_parameters(engine, params);
        info!(
            "audio context and processing chain created ({:?})",
            engine.context_state()
        );
        Ok(Creation::Created(nodes))
    }

    fn build<E: AudioEngine>(&self, engine: &mut E) -> Result<GraphNodes, EngineError> {
        let input_tap = engine.create_stage(StageKind::Analyser)?;
        let compressor = engine.create_stage(StageKind::Compressor)?;
        let gain = engine.create_stage(StageKind::Gain)?;
        let output_tap = engine.create_stage(StageKind::Analyser)?;

        engine.set_fft_size(input_tap, self.fft_size)?;
        engine.set_fft_size(output_tap, self.fft_size)?;

        engine.connect(input_tap, compressor)?;
        engine.connect(compressor, gain)?;
        engine.connect(gain, output_tap)?;
        engine.connect_to_destination(output_tap)?;

        Ok(GraphNodes {
            input_tap,
            compressor,
            gain,
            output_tap,
        })
    }

    /// Schedule every stage control at the context's current time
    ///
    /// A no-op without a graph. Individual scheduling failures are logged
    /// and the remaining controls are still applied.
    pub fn apply_parameters<E: AudioEngine>(&self, engine: &mut E, params: &ParameterSet) {
        let Some(nodes) = self.nodes else {
            return;
        };
        let now = engine.current_time();
        let dynamics = params.dynamics();

        let controls = [
            (nodes.gain, ParamKind::Gain, params.linear_gain()),
            (nodes.compressor, ParamKind::Threshold, dynamics.threshold_db),
            (nodes.compressor, ParamKind::Ratio, dynamics.ratio),
            (nodes.compressor, ParamKind::Attack, dynamics.attack_seconds),
            (nodes.compressor, ParamKind::Release, dynamics.release_seconds),
        ];
        for (node, param, value) in controls {
            if let Err(e) = engine.set_param_at_time(node, param, value, now) {
                warn!("failed to schedule {:?} = {}: {}", param, value, e);
            }
        }
        debug!(
            "parameters applied at t={:.3}s (gain {:.2}, compression {})",
            now,
            params.linear_gain(),
            params.compression_enabled
        );
    }

    /// Connect a source node into the input tap
    pub fn connect_source<E: AudioEngine>(
        &self,
        engine: &mut E,
        source: NodeKey,
    ) -> Result<(), EngineError> {
        let nodes = self.nodes.ok_or(EngineError::NoContext)?;
        engine.connect(source, nodes.input_tap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterPatch;
    use crate::sim::SimEngine;
    use approx::assert_relative_eq;

    #[test]
    fn test_ensure_created_is_idempotent() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let params = ParameterSet::default();

        let first = graph.ensure_created(&mut engine, &params).unwrap();
        assert!(matches!(first, Creation::Created(_)));
        let second = graph.ensure_created(&mut engine, &params).unwrap();
        assert_eq!(second, Creation::Existing(first.nodes()));
        assert_eq!(engine.contexts_created(), 1);
        assert_eq!(graph.generation(), 1);
    }

    #[test]
    fn test_topology() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let nodes = graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap()
            .nodes();

        assert_eq!(engine.outputs(nodes.input_tap), vec![nodes.compressor]);
        assert_eq!(engine.outputs(nodes.compressor), vec![nodes.gain]);
        assert_eq!(engine.outputs(nodes.gain), vec![nodes.output_tap]);
        assert!(engine.reaches_destination(nodes.output_tap));
        assert_eq!(engine.frequency_bin_count(nodes.input_tap), 128);
    }

    #[test]
    fn test_failed_creation_leaves_nothing_and_retries() {
        let mut engine = SimEngine::new();
        engine.fail_next_contexts(1);
        let mut graph = ProcessingGraph::new(256);
        let params = ParameterSet::default();

        let err = graph.ensure_created(&mut engine, &params).unwrap_err();
        assert!(err.is_unavailable());
        assert!(graph.nodes().is_none());

        assert!(matches!(
            graph.ensure_created(&mut engine, &params),
            Ok(Creation::Created(_))
        ));
    }

    #[test]
    fn test_closed_context_is_rebuilt() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let params = ParameterSet::default();
        graph.ensure_created(&mut engine, &params).unwrap();

        engine.close();
        assert!(!graph.is_live(&engine));
        assert!(matches!(
            graph.ensure_created(&mut engine, &params),
            Ok(Creation::Created(_))
        ));
        assert_eq!(graph.generation(), 2);
    }

    #[test]
    fn test_latest_parameters_win() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let nodes = graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap()
            .nodes();

        let p1 = ParameterSet::from_patch(
            &ParameterPatch::default()
                .with_volume(180.0)
                .with_compression(true)
                .with_threshold(-40.0),
        );
        let p2 = ParameterSet::from_patch(&ParameterPatch::default().with_volume(50.0));
        graph.apply_parameters(&mut engine, &p1);
        graph.apply_parameters(&mut engine, &p2);

        assert_relative_eq!(engine.param(nodes.gain, ParamKind::Gain).unwrap(), 0.5);
        assert_relative_eq!(
            engine.param(nodes.compressor, ParamKind::Threshold).unwrap(),
            0.0
        );
        assert_relative_eq!(engine.param(nodes.compressor, ParamKind::Ratio).unwrap(), 1.0);
    }

    #[test]
    fn test_parameters_scheduled_at_current_time() {
        let mut engine = SimEngine::new();
        let mut graph = ProcessingGraph::new(256);
        let nodes = graph
            .ensure_created(&mut engine, &ParameterSet::default())
            .unwrap()
            .nodes();

        engine.set_current_time(12.5);
        graph.apply_parameters(&mut engine, &ParameterSet::default());
        assert_relative_eq!(engine.param_time(nodes.gain, ParamKind::Gain).unwrap(), 12.5);
    }

    #[test]
    fn test_apply_without_graph_is_noop() {
        let mut engine = SimEngine::new();
        let graph = ProcessingGraph::new(256);
        graph.apply_parameters(&mut engine, &ParameterSet::default());
        assert_eq!(engine.contexts_created(), 0);
    }
}
