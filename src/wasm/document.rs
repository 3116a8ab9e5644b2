//! WebDocument - live-document implementation of [`MediaDocument`]

use super::error::describe_js;
use super::runtime::Inbox;
use crate::agent::AgentEvent;
use crate::host::{ElementId, InsertedSubtree, MediaDocument};
use js_sys::{Object, WeakMap};
use log::{trace, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlMediaElement, Node};

/// Selector for qualifying media elements
pub const MEDIA_SELECTOR: &str = "audio, video";

/// Maps element objects to stable [`ElementId`]s
///
/// Ids live in a `WeakMap` keyed by the element itself, so an element that
/// leaves and re-enters the document keeps its id. Strong references are
/// held only until the element is released after leaving the document.
pub struct ElementTable {
    ids: WeakMap,
    elements: HashMap<ElementId, HtmlMediaElement>,
    next_id: u64,
}

impl ElementTable {
    pub fn new() -> Self {
        Self {
            ids: WeakMap::new(),
            elements: HashMap::new(),
            next_id: 0,
        }
    }

    /// Id for an element, assigning one on first sight
    pub fn id_for(&mut self, element: &HtmlMediaElement) -> ElementId {
        let key: &Object = element.as_ref();
        let id = match self.known(element) {
            Some(id) => id,
            None => {
                self.next_id += 1;
                let id = ElementId(self.next_id);
                self.ids.set(key, &JsValue::from_f64(id.0 as f64));
                id
            }
        };
        self.elements.entry(id).or_insert_with(|| element.clone());
        id
    }

    /// Id of an element seen before, without assigning one
    pub fn known(&self, element: &HtmlMediaElement) -> Option<ElementId> {
        let key: &Object = element.as_ref();
        self.ids.get(key).as_f64().map(|raw| ElementId(raw as u64))
    }

    pub fn get(&self, id: ElementId) -> Option<HtmlMediaElement> {
        self.elements.get(&id).cloned()
    }

    /// Forget the strong reference; the id survives in the weak map
    pub fn release(&mut self, id: ElementId) {
        self.elements.remove(&id);
    }

    /// Qualifying elements inside an inserted node, the node itself first
    pub fn subtree(&mut self, node: &Node) -> InsertedSubtree {
        let root = node
            .dyn_ref::<HtmlMediaElement>()
            .map(|media| self.id_for(media));
        let descendants = match node.dyn_ref::<Element>() {
            Some(element) => self.query(element.query_selector_all(MEDIA_SELECTOR)),
            None => Vec::new(),
        };
        InsertedSubtree { root, descendants }
    }

    /// Already known media elements inside a removed node
    pub fn removed(&self, node: &Node) -> Vec<HtmlMediaElement> {
        let mut found = Vec::new();
        if let Some(media) = node.dyn_ref::<HtmlMediaElement>() {
            found.push(media.clone());
        }
        if let Some(element) = node.dyn_ref::<Element>() {
            if let Ok(list) = element.query_selector_all(MEDIA_SELECTOR) {
                found.extend(
                    (0..list.length())
                        .filter_map(|i| list.item(i))
                        .filter_map(|node| node.dyn_into::<HtmlMediaElement>().ok()),
                );
            }
        }
        found.retain(|media| self.known(media).is_some());
        found
    }

    fn query(&mut self, result: Result<web_sys::NodeList, JsValue>) -> Vec<ElementId> {
        let list = match result {
            Ok(list) => list,
            Err(e) => {
                warn!("media query failed: {}", describe_js(&e));
                return Vec::new();
            }
        };
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<HtmlMediaElement>().ok())
            .map(|media| self.id_for(&media))
            .collect()
    }
}

impl Default for ElementTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Event listeners registered on one element; removed on drop
struct LifecycleListeners {
    target: HtmlMediaElement,
    callbacks: Vec<(&'static str, Closure<dyn FnMut()>)>,
}

impl Drop for LifecycleListeners {
    fn drop(&mut self) {
        for (event_type, callback) in &self.callbacks {
            let _ = self
                .target
                .remove_event_listener_with_callback(event_type, callback.as_ref().unchecked_ref());
        }
    }
}

/// The page's document
pub struct WebDocument {
    document: Document,
    elements: Rc<RefCell<ElementTable>>,
    inbox: Rc<Inbox>,
    listeners: HashMap<ElementId, LifecycleListeners>,
}

impl WebDocument {
    pub(crate) fn new(
        document: Document,
        elements: Rc<RefCell<ElementTable>>,
        inbox: Rc<Inbox>,
    ) -> Self {
        Self {
            document,
            elements,
            inbox,
            listeners: HashMap::new(),
        }
    }
}

impl MediaDocument for WebDocument {
    fn media_elements(&mut self) -> Vec<ElementId> {
        let result = self.document.query_selector_all(MEDIA_SELECTOR);
        self.elements.borrow_mut().query(result)
    }

    fn location(&self) -> String {
        self.document
            .location()
            .and_then(|location| location.href().ok())
            .unwrap_or_default()
    }

    fn watch_lifecycle(&mut self, element: ElementId) {
        if self.listeners.contains_key(&element) {
            return;
        }
        let Some(target) = self.elements.borrow().get(element) else {
            return;
        };
        let events: [(&'static str, fn(ElementId) -> AgentEvent); 3] = [
            ("ended", AgentEvent::MediaEnded),
            ("play", AgentEvent::MediaPlay),
            ("pause", AgentEvent::MediaPause),
        ];
        let mut callbacks = Vec::with_capacity(events.len());
        for (event_type, make_event) in events {
            let inbox = Rc::clone(&self.inbox);
            let callback = Closure::<dyn FnMut()>::new(move || inbox.push(make_event(element)));
            if let Err(e) = target
                .add_event_listener_with_callback(event_type, callback.as_ref().unchecked_ref())
            {
                warn!("cannot listen for {} on {}: {}", event_type, element, describe_js(&e));
                continue;
            }
            callbacks.push((event_type, callback));
        }
        trace!("watching lifecycle of {}", element);
        self.listeners
            .insert(element, LifecycleListeners { target, callbacks });
    }

    fn release(&mut self, element: ElementId) {
        self.listeners.remove(&element);
        self.elements.borrow_mut().release(element);
    }

    fn describe(&self, element: ElementId) -> String {
        match self.elements.borrow().get(element) {
            Some(media) => format!(
                "<{}> {}",
                media.tag_name().to_lowercase(),
                media.current_src()
            ),
            None => element.to_string(),
        }
    }
}
