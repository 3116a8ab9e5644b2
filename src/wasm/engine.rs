//! WebEngine - Web Audio implementation of [`AudioEngine`]

use super::document::ElementTable;
use super::error::describe_js;
use crate::error::EngineError;
use crate::host::{AudioEngine, ContextState, ElementId, NodeKey, ParamKind, StageKind};
use js_sys::{Object, WeakMap};
use log::{error, trace};
use slotmap::SlotMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    AnalyserNode, AudioContext, AudioContextState, AudioNode, AudioParam, DynamicsCompressorNode,
    GainNode, MediaElementAudioSourceNode,
};

enum WebNode {
    Gain(GainNode),
    Compressor(DynamicsCompressorNode),
    Analyser(AnalyserNode),
    Source(MediaElementAudioSourceNode),
}

impl WebNode {
    fn audio_node(&self) -> &AudioNode {
        match self {
            WebNode::Gain(n) => n.as_ref(),
            WebNode::Compressor(n) => n.as_ref(),
            WebNode::Analyser(n) => n.as_ref(),
            WebNode::Source(n) => n.as_ref(),
        }
    }

    fn param(&self, kind: ParamKind) -> Option<AudioParam> {
        match (self, kind) {
            (WebNode::Gain(n), ParamKind::Gain) => Some(n.gain()),
            (WebNode::Compressor(n), ParamKind::Threshold) => Some(n.threshold()),
            (WebNode::Compressor(n), ParamKind::Ratio) => Some(n.ratio()),
            (WebNode::Compressor(n), ParamKind::Attack) => Some(n.attack()),
            (WebNode::Compressor(n), ParamKind::Release) => Some(n.release()),
            _ => None,
        }
    }
}

fn call_failed(e: JsValue) -> EngineError {
    EngineError::Call(describe_js(&e))
}

/// Audio engine backed by one `AudioContext`
///
/// The browser lets an element be captured by a context only once, so
/// source nodes are kept in a `WeakMap` keyed by the element and handed out
/// again on re-attach. The map holds nothing alive once the element is
/// gone, and is dropped together with its context.
pub struct WebEngine {
    context: Option<AudioContext>,
    nodes: SlotMap<NodeKey, WebNode>,
    /// Source node handles of elements still in the page
    sources: HashMap<ElementId, NodeKey>,
    captured: WeakMap,
    elements: Rc<RefCell<ElementTable>>,
}

impl WebEngine {
    pub fn new(elements: Rc<RefCell<ElementTable>>) -> Self {
        Self {
            context: None,
            nodes: SlotMap::with_key(),
            sources: HashMap::new(),
            captured: WeakMap::new(),
            elements,
        }
    }

    fn context(&self) -> Result<&AudioContext, EngineError> {
        self.context.as_ref().ok_or(EngineError::NoContext)
    }

    fn node(&self, key: NodeKey) -> Result<&WebNode, EngineError> {
        self.nodes.get(key).ok_or(EngineError::UnknownNode)
    }
}

impl AudioEngine for WebEngine {
    fn create_context(&mut self) -> Result<(), EngineError> {
        let context =
            AudioContext::new().map_err(|e| EngineError::Unavailable(describe_js(&e)))?;
        if let Some(old) = self.context.replace(context) {
            let _ = old.close();
        }
        self.nodes.clear();
        self.sources.clear();
        self.captured = WeakMap::new();
        Ok(())
    }

    fn context_state(&self) -> ContextState {
        match &self.context {
            None => ContextState::Absent,
            Some(ctx) => match ctx.state() {
                AudioContextState::Suspended => ContextState::Suspended,
                AudioContextState::Running => ContextState::Running,
                _ => ContextState::Closed,
            },
        }
    }

    fn current_time(&self) -> f64 {
        self.context.as_ref().map(|ctx| ctx.current_time()).unwrap_or(0.0)
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        let promise = self
            .context()?
            .resume()
            .map_err(|e| EngineError::Resume(describe_js(&e)))?;
        spawn_local(async move {
            if let Err(e) = JsFuture::from(promise).await {
                error!("error resuming audio context: {}", describe_js(&e));
            }
        });
        Ok(())
    }

    fn create_stage(&mut self, kind: StageKind) -> Result<NodeKey, EngineError> {
        let ctx = self.context()?;
        let node = match kind {
            StageKind::Gain => ctx.create_gain().map(WebNode::Gain),
            StageKind::Compressor => ctx.create_dynamics_compressor().map(WebNode::Compressor),
            StageKind::Analyser => ctx.create_analyser().map(WebNode::Analyser),
        }
        .map_err(call_failed)?;
        Ok(self.nodes.insert(node))
    }

    fn set_fft_size(&mut self, node: NodeKey, size: u32) -> Result<(), EngineError> {
        match self.node(node)? {
            WebNode::Analyser(analyser) => {
                analyser.set_fft_size(size);
                Ok(())
            }
            _ => Err(EngineError::Call("not an analyser".into())),
        }
    }

    fn connect(&mut self, from: NodeKey, to: NodeKey) -> Result<(), EngineError> {
        let target = self.node(to)?.audio_node();
        self.node(from)?
            .audio_node()
            .connect_with_audio_node(target)
            .map(|_| ())
            .map_err(call_failed)
    }

    fn connect_to_destination(&mut self, from: NodeKey) -> Result<(), EngineError> {
        let destination = self.context()?.destination();
        self.node(from)?
            .audio_node()
            .connect_with_audio_node(&destination)
            .map(|_| ())
            .map_err(call_failed)
    }

    fn disconnect(&mut self, node: NodeKey) -> Result<(), EngineError> {
        self.node(node)?
            .audio_node()
            .disconnect()
            .map_err(call_failed)
    }

    fn set_param_at_time(
        &mut self,
        node: NodeKey,
        param: ParamKind,
        value: f32,
        at: f64,
    ) -> Result<(), EngineError> {
        let audio_param = self.node(node)?.param(param).ok_or_else(|| {
            EngineError::Call(format!("{:?} is not a control of this node", param))
        })?;
        audio_param
            .set_value_at_time(value, at)
            .map(|_| ())
            .map_err(call_failed)
    }

    fn create_media_source(&mut self, element: ElementId) -> Result<NodeKey, EngineError> {
        if let Some(&key) = self.sources.get(&element) {
            if self.nodes.contains_key(key) {
                return Ok(key);
            }
        }
        let media = self
            .elements
            .borrow()
            .get(element)
            .ok_or_else(|| EngineError::SourceCreation {
                element,
                reason: "element is no longer tracked".into(),
            })?;
        let media_key: &Object = media.as_ref();
        let cached = self.captured.get(media_key);
        let source = if cached.is_undefined() {
            let source = self
                .context()?
                .create_media_element_source(&media)
                .map_err(|e| EngineError::SourceCreation {
                    element,
                    reason: describe_js(&e),
                })?;
            let value: &JsValue = source.as_ref();
            self.captured.set(media_key, value);
            source
        } else {
            cached.unchecked_into::<MediaElementAudioSourceNode>()
        };
        let key = self.nodes.insert(WebNode::Source(source));
        self.sources.insert(element, key);
        Ok(key)
    }

    fn release_element(&mut self, element: ElementId) {
        if let Some(key) = self.sources.remove(&element) {
            self.nodes.remove(key);
            trace!("released source node of {}", element);
        }
    }

    fn frequency_bin_count(&self, node: NodeKey) -> usize {
        match self.nodes.get(node) {
            Some(WebNode::Analyser(analyser)) => analyser.frequency_bin_count() as usize,
            _ => 0,
        }
    }

    fn byte_frequency_data(&self, node: NodeKey, out: &mut [u8]) {
        if let Some(WebNode::Analyser(analyser)) = self.nodes.get(node) {
            analyser.get_byte_frequency_data(out);
        }
    }
}
