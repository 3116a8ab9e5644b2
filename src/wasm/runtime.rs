//! Browser plumbing around the page agent
//!
//! Observers, listeners, timers and animation frames push [`AgentEvent`]s
//! into an [`Inbox`]; every push wakes the runtime, which drains the inbox
//! into the agent on the same thread and re-arms the single wake-up timer
//! for the agent's next deadline.
//!
//! Media elements removed from the document are checked again once the
//! removal settle time has passed. Those still disconnected are reported as
//! [`AgentEvent::ElementRemoved`], which releases every reference the host
//! holds for them. Elements moved within the document reconnect before the
//! check and are left alone.

use super::document::{ElementTable, WebDocument};
use super::engine::WebEngine;
use super::error::describe_js;
use crate::agent::{AgentEvent, PageAgent};
use crate::config::AgentConfig;
use crate::control::Response;
use crate::host::{ElementId, GestureKind};
use log::{debug, info, warn};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    AddEventListenerOptions, Document, HtmlMediaElement, MutationObserver, MutationObserverInit,
    MutationRecord, Performance, Window,
};

type WebAgent = PageAgent<WebEngine, WebDocument>;
type MutationCallback = Closure<dyn FnMut(js_sys::Array, MutationObserver)>;

// =============================================================================
// Inbox
// =============================================================================

/// Events waiting for the agent
pub(crate) struct Inbox {
    events: RefCell<VecDeque<AgentEvent>>,
    waker: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Inbox {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            events: RefCell::new(VecDeque::new()),
            waker: RefCell::new(None),
        })
    }

    /// Queue an event and wake the runtime
    pub(crate) fn push(&self, event: AgentEvent) {
        self.events.borrow_mut().push_back(event);
        let waker = self.waker.borrow().clone();
        if let Some(wake) = waker {
            wake();
        }
    }

    fn set_waker(&self, waker: Rc<dyn Fn()>) {
        *self.waker.borrow_mut() = Some(waker);
    }

    fn drain(&self) -> Vec<AgentEvent> {
        self.events.borrow_mut().drain(..).collect()
    }
}

// =============================================================================
// Runtime
// =============================================================================

pub(crate) struct Runtime {
    agent: RefCell<WebAgent>,
    inbox: Rc<Inbox>,
    elements: Rc<RefCell<ElementTable>>,
    window: Window,
    document: Document,
    performance: Option<Performance>,
    wake_handle: Cell<Option<i32>>,
    wake_callback: RefCell<Option<Closure<dyn FnMut()>>>,
    frame_handle: Cell<Option<i32>>,
    frame_callback: RefCell<Option<Closure<dyn FnMut()>>>,
    observer: RefCell<Option<(MutationObserver, MutationCallback)>>,
    gestures: RefCell<Vec<(GestureKind, Closure<dyn FnMut()>)>>,
    removal_settle: Duration,
    /// Removed elements with the time they become eligible for release
    removals: RefCell<VecDeque<(Duration, HtmlMediaElement)>>,
    sweep_handle: Cell<Option<i32>>,
    sweep_callback: RefCell<Option<Closure<dyn FnMut()>>>,
}

impl Runtime {
    /// Build the agent, install every host hook, and queue the startup scan
    pub(crate) fn start(config: AgentConfig) -> Result<Rc<Runtime>, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;

        let elements = Rc::new(RefCell::new(ElementTable::new()));
        let inbox = Inbox::new();
        let engine = WebEngine::new(Rc::clone(&elements));
        let page = WebDocument::new(document.clone(), Rc::clone(&elements), Rc::clone(&inbox));
        let removal_settle = config.removal_settle();

        let runtime = Rc::new(Runtime {
            agent: RefCell::new(PageAgent::new(engine, page, config)),
            inbox: Rc::clone(&inbox),
            elements,
            performance: window.performance(),
            window,
            document,
            wake_handle: Cell::new(None),
            wake_callback: RefCell::new(None),
            frame_handle: Cell::new(None),
            frame_callback: RefCell::new(None),
            observer: RefCell::new(None),
            gestures: RefCell::new(Vec::new()),
            removal_settle,
            removals: RefCell::new(VecDeque::new()),
            sweep_handle: Cell::new(None),
            sweep_callback: RefCell::new(None),
        });

        let weak = Rc::downgrade(&runtime);
        inbox.set_waker(Rc::new(move || {
            if let Some(runtime) = weak.upgrade() {
                runtime.pump();
            }
        }));

        runtime.install_wake_timer();
        runtime.install_sweep_timer();
        runtime.install_observer()?;
        runtime.install_gestures();
        runtime.start_frames();

        info!("page agent started");
        inbox.push(AgentEvent::Startup);
        Ok(runtime)
    }

    fn now(&self) -> Duration {
        let millis = match &self.performance {
            Some(performance) => performance.now(),
            None => js_sys::Date::now(),
        };
        Duration::from_secs_f64(millis.max(0.0) / 1000.0)
    }

    /// Drain the inbox into the agent
    ///
    /// A wake-up while the agent is already borrowed leaves the events in
    /// the inbox for the outer drain loop.
    fn pump(&self) {
        let Ok(mut agent) = self.agent.try_borrow_mut() else {
            return;
        };
        let now = self.now();
        agent.run_until_idle(now);
        loop {
            let events = self.inbox.drain();
            if events.is_empty() {
                break;
            }
            for event in events {
                agent.enqueue(event);
            }
            agent.run_until_idle(now);
        }
        let deadline = agent.next_deadline();
        drop(agent);
        self.arm_wake(deadline, now);
    }

    /// Answer a control message
    pub(crate) fn handle_message(&self, message: &Value) -> Value {
        let reply = match self.agent.try_borrow_mut() {
            Ok(mut agent) => agent.handle_message(message, self.now()),
            Err(_) => Response::Error {
                error: "agent busy".into(),
            }
            .to_message(),
        };
        self.pump();
        reply
    }

    pub(crate) fn with_agent<R>(&self, f: impl FnOnce(&WebAgent) -> R) -> Option<R> {
        self.agent.try_borrow().ok().map(|agent| f(&agent))
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn install_wake_timer(self: &Rc<Self>) {
        let weak: Weak<Runtime> = Rc::downgrade(self);
        let callback = Closure::<dyn FnMut()>::new(move || {
            if let Some(runtime) = weak.upgrade() {
                runtime.wake_handle.set(None);
                runtime.pump();
            }
        });
        *self.wake_callback.borrow_mut() = Some(callback);
    }

    fn arm_wake(&self, deadline: Option<Duration>, now: Duration) {
        if let Some(handle) = self.wake_handle.take() {
            self.window.clear_timeout_with_handle(handle);
        }
        let Some(deadline) = deadline else {
            return;
        };
        let handle = self.set_timeout(&self.wake_callback, deadline.saturating_sub(now));
        self.wake_handle.set(handle);
    }

    fn set_timeout(
        &self,
        callback: &RefCell<Option<Closure<dyn FnMut()>>>,
        delay: Duration,
    ) -> Option<i32> {
        // Round up so the timer never fires early
        let millis = ((delay.as_micros() + 999) / 1000).min(i32::MAX as u128) as i32;
        let callback = callback.borrow();
        let callback = callback.as_ref()?;
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                callback.as_ref().unchecked_ref(),
                millis,
            ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("cannot arm timer: {}", describe_js(&e));
                None
            }
        }
    }

    // =========================================================================
    // Removal Sweep
    // =========================================================================

    fn install_sweep_timer(self: &Rc<Self>) {
        let weak: Weak<Runtime> = Rc::downgrade(self);
        let callback = Closure::<dyn FnMut()>::new(move || {
            if let Some(runtime) = weak.upgrade() {
                runtime.sweep_handle.set(None);
                runtime.sweep_removals();
            }
        });
        *self.sweep_callback.borrow_mut() = Some(callback);
    }

    fn queue_removals(&self, removed: Vec<HtmlMediaElement>) {
        if removed.is_empty() {
            return;
        }
        let due = self.now() + self.removal_settle;
        self.removals
            .borrow_mut()
            .extend(removed.into_iter().map(|media| (due, media)));
        self.arm_sweep();
    }

    fn arm_sweep(&self) {
        if self.sweep_handle.get().is_some() {
            return;
        }
        let Some(due) = self.removals.borrow().front().map(|(due, _)| *due) else {
            return;
        };
        let handle = self.set_timeout(&self.sweep_callback, due.saturating_sub(self.now()));
        self.sweep_handle.set(handle);
    }

    /// Release elements that stayed out of the document past their settle time
    fn sweep_removals(&self) {
        let now = self.now();
        let mut gone = BTreeSet::new();
        {
            let mut removals = self.removals.borrow_mut();
            let table = self.elements.borrow();
            while removals.front().is_some_and(|(due, _)| *due <= now) {
                let Some((_, media)) = removals.pop_front() else {
                    break;
                };
                if media.is_connected() {
                    continue;
                }
                if let Some(id) = table.known(&media) {
                    gone.insert(id);
                }
            }
        }
        if !gone.is_empty() {
            debug!("releasing {} removed media elements", gone.len());
        }
        for element in gone {
            self.inbox.push(AgentEvent::ElementRemoved(element));
        }
        self.arm_sweep();
    }

    // =========================================================================
    // Animation Frames
    // =========================================================================

    fn start_frames(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let callback = Closure::<dyn FnMut()>::new(move || {
            if let Some(runtime) = weak.upgrade() {
                runtime.frame_handle.set(None);
                runtime.inbox.push(AgentEvent::FrameTick);
                runtime.request_frame();
            }
        });
        *self.frame_callback.borrow_mut() = Some(callback);
        self.request_frame();
    }

    fn request_frame(&self) {
        let callback = self.frame_callback.borrow();
        if let Some(callback) = callback.as_ref() {
            match self
                .window
                .request_animation_frame(callback.as_ref().unchecked_ref())
            {
                Ok(handle) => self.frame_handle.set(Some(handle)),
                Err(e) => warn!("cannot request animation frame: {}", describe_js(&e)),
            }
        }
    }

    // =========================================================================
    // Document Observation
    // =========================================================================

    fn install_observer(self: &Rc<Self>) -> Result<(), JsValue> {
        let inbox = Rc::clone(&self.inbox);
        let elements = Rc::clone(&self.elements);
        let document = self.document.clone();
        let weak: Weak<Runtime> = Rc::downgrade(self);

        let callback: MutationCallback = Closure::new(
            move |records: js_sys::Array, _observer: MutationObserver| {
                let mut inserted = Vec::new();
                let mut removed = Vec::new();
                let mut changed: Vec<ElementId> = Vec::new();
                {
                    let mut table = elements.borrow_mut();
                    for record in records.iter() {
                        let Ok(record) = record.dyn_into::<MutationRecord>() else {
                            continue;
                        };
                        match record.type_().as_str() {
                            "childList" => {
                                let added = record.added_nodes();
                                for i in 0..added.length() {
                                    if let Some(node) = added.item(i) {
                                        let subtree = table.subtree(&node);
                                        if subtree.iter().next().is_some() {
                                            inserted.push(subtree);
                                        }
                                    }
                                }
                                let gone = record.removed_nodes();
                                for i in 0..gone.length() {
                                    if let Some(node) = gone.item(i) {
                                        removed.extend(table.removed(&node));
                                    }
                                }
                            }
                            "attributes" => {
                                let media = record
                                    .target()
                                    .and_then(|node| node.dyn_into::<HtmlMediaElement>().ok());
                                if let Some(media) = media {
                                    changed.push(table.id_for(&media));
                                }
                            }
                            _ => {}
                        }
                    }
                }

                if let Some(runtime) = weak.upgrade() {
                    runtime.queue_removals(removed);
                }
                if !inserted.is_empty() {
                    inbox.push(AgentEvent::ElementsInserted(inserted));
                }
                for element in changed {
                    inbox.push(AgentEvent::SourceChanged(element));
                }
                let href = document
                    .location()
                    .and_then(|location| location.href().ok())
                    .unwrap_or_default();
                inbox.push(AgentEvent::LocationObserved(href));
            },
        );

        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        init.set_attributes(true);
        init.set_attribute_filter(&js_sys::Array::of1(&JsValue::from_str("src")));

        let root = self
            .document
            .document_element()
            .ok_or_else(|| JsValue::from_str("no document element"))?;
        observer.observe_with_options(&root, &init)?;
        *self.observer.borrow_mut() = Some((observer, callback));
        Ok(())
    }

    fn install_gestures(&self) {
        let options = AddEventListenerOptions::new();
        options.set_passive(true);
        options.set_capture(true);

        let mut gestures = self.gestures.borrow_mut();
        for kind in GestureKind::ALL {
            let inbox = Rc::clone(&self.inbox);
            let callback =
                Closure::<dyn FnMut()>::new(move || inbox.push(AgentEvent::Gesture(kind)));
            match self
                .window
                .add_event_listener_with_callback_and_add_event_listener_options(
                    kind.event_type(),
                    callback.as_ref().unchecked_ref(),
                    &options,
                ) {
                Ok(()) => gestures.push((kind, callback)),
                Err(e) => warn!(
                    "cannot listen for {}: {}",
                    kind.event_type(),
                    describe_js(&e)
                ),
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some((observer, _)) = self.observer.get_mut().take() {
            observer.disconnect();
        }
        for (kind, callback) in self.gestures.get_mut().drain(..) {
            let _ = self.window.remove_event_listener_with_callback_and_bool(
                kind.event_type(),
                callback.as_ref().unchecked_ref(),
                true,
            );
        }
        if let Some(handle) = self.wake_handle.take() {
            self.window.clear_timeout_with_handle(handle);
        }
        if let Some(handle) = self.sweep_handle.take() {
            self.window.clear_timeout_with_handle(handle);
        }
        if let Some(handle) = self.frame_handle.take() {
            let _ = self.window.cancel_animation_frame(handle);
        }
    }
}

