//! Browser surface backed by the page's DOM.
//!
//! `DomSurface` resolves media with `querySelector`, `DomMedia` wraps an
//! `HtmlMediaElement` and `DomTrigger` wraps the clicked control. The
//! [`PlayTrigger`] type is the JavaScript-facing entry point:
//!
//! ```text
//! import init, { PlayTrigger } from "./playtrigger.js";
//! await init();
//! const trigger = new PlayTrigger("video#gnome", "playing", undefined);
//! trigger.bind(); // attach click handlers to every [data-play-trigger]
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{AddEventListenerOptions, Document, Element, Event, HtmlMediaElement};

use crate::surface::{
    EndedCallback, ListenerId, MediaElement, RejectedCallback, Surface, TriggerElement,
};
use crate::{Activation, CycleId, Error, Result, TriggerConfig, TriggerController};

fn describe(value: &JsValue) -> String {
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return format!("{}: {}", String::from(err.name()), String::from(err.message()));
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

struct EndedListener {
    closure: Closure<dyn FnMut(Event)>,
    fired: Rc<Cell<bool>>,
}

/// Media element in the page
#[derive(Clone)]
pub struct DomMedia {
    element: HtmlMediaElement,
    listeners: Rc<RefCell<HashMap<ListenerId, EndedListener>>>,
    next_listener: Rc<Cell<ListenerId>>,
}

impl DomMedia {
    pub fn new(element: HtmlMediaElement) -> Self {
        Self {
            element,
            listeners: Rc::new(RefCell::new(HashMap::new())),
            next_listener: Rc::new(Cell::new(1)),
        }
    }

    pub fn element(&self) -> &HtmlMediaElement {
        &self.element
    }
}

impl MediaElement for DomMedia {
    fn play(&self, on_rejected: RejectedCallback) -> Result<()> {
        let promise = self
            .element
            .play()
            .map_err(|e| Error::PlaybackRejected(describe(&e)))?;

        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = JsFuture::from(promise).await {
                on_rejected(describe(&err));
            }
        });
        Ok(())
    }

    fn add_class(&self, class: &str) -> Result<()> {
        self.element.class_list().add_1(class)?;
        Ok(())
    }

    fn remove_class(&self, class: &str) -> Result<()> {
        self.element.class_list().remove_1(class)?;
        Ok(())
    }

    fn has_class(&self, class: &str) -> bool {
        self.element.class_list().contains(class)
    }

    fn on_ended_once(&self, cb: EndedCallback) -> Result<ListenerId> {
        // Fired listeners are dropped here rather than from inside their own call.
        self.listeners.borrow_mut().retain(|_, l| !l.fired.get());

        let id = self.next_listener.get();
        self.next_listener.set(id + 1);

        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let mut cb = Some(cb);
        let closure = Closure::<dyn FnMut(Event)>::new(move |_ev: Event| {
            if let Some(cb) = cb.take() {
                flag.set(true);
                cb();
            }
        });

        let options = AddEventListenerOptions::new();
        options.set_once(true);
        self.element
            .add_event_listener_with_callback_and_add_event_listener_options(
                "ended",
                closure.as_ref().unchecked_ref(),
                &options,
            )?;

        self.listeners
            .borrow_mut()
            .insert(id, EndedListener { closure, fired });
        Ok(id)
    }

    fn remove_ended_listener(&self, id: ListenerId) {
        let mut listeners = self.listeners.borrow_mut();
        let Some(listener) = listeners.get(&id) else {
            return;
        };
        if listener.fired.get() {
            return;
        }
        let _ = self.element.remove_event_listener_with_callback(
            "ended",
            listener.closure.as_ref().unchecked_ref(),
        );
        listeners.remove(&id);
    }
}

/// The control the user clicked
#[derive(Clone)]
pub struct DomTrigger(Element);

impl DomTrigger {
    pub fn new(element: Element) -> Self {
        Self(element)
    }
}

impl TriggerElement for DomTrigger {
    fn remove(&self) {
        self.0.remove();
    }

    fn is_connected(&self) -> bool {
        self.0.is_connected()
    }
}

/// The current document
#[derive(Clone)]
pub struct DomSurface {
    document: Document,
}

impl DomSurface {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    pub fn from_window() -> Result<Self> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| Error::SurfaceError("No document available".to_string()))?;
        Ok(Self::new(document))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl Surface for DomSurface {
    type Media = DomMedia;
    type Trigger = DomTrigger;

    fn find_media(&self, selector: &str) -> Option<DomMedia> {
        let element = self.document.query_selector(selector).ok().flatten()?;
        match element.dyn_into::<HtmlMediaElement>() {
            Ok(media) => Some(DomMedia::new(media)),
            Err(_) => {
                warn!("{} is not a media element", selector);
                None
            }
        }
    }
}

fn schedule_expiry(controller: TriggerController<DomSurface>, cycle: CycleId, ms: u64) -> Result<()> {
    let window =
        web_sys::window().ok_or_else(|| Error::SurfaceError("No window object available".into()))?;
    let cb = Closure::once_into_js(move || {
        if controller.expire(cycle) {
            debug!("cycle {} expired after {}ms", cycle, ms);
        }
    });
    window.set_timeout_with_callback_and_timeout_and_arguments_0(
        cb.unchecked_ref(),
        ms.min(i32::MAX as u64) as i32,
    )?;
    Ok(())
}

fn activate_and_arm(controller: &TriggerController<DomSurface>, trigger: &DomTrigger) -> Result<bool> {
    match controller.activate(trigger)? {
        Activation::Started { cycle } => {
            if let Some(ms) = controller.config().ended_timeout_ms {
                schedule_expiry(controller.clone(), cycle, ms)?;
            }
            Ok(true)
        }
        Activation::AlreadyPlaying => Ok(false),
    }
}

/// JavaScript entry point owning one controller for the document
#[wasm_bindgen]
pub struct PlayTrigger {
    controller: TriggerController<DomSurface>,
}

#[wasm_bindgen]
impl PlayTrigger {
    #[wasm_bindgen(constructor)]
    pub fn new(
        video_selector: Option<String>,
        playing_class: Option<String>,
        ended_timeout_ms: Option<u32>,
    ) -> std::result::Result<PlayTrigger, JsValue> {
        let defaults = TriggerConfig::default();
        let config = TriggerConfig {
            video_selector: video_selector.unwrap_or(defaults.video_selector),
            playing_class: playing_class.unwrap_or(defaults.playing_class),
            trigger_selector: defaults.trigger_selector,
            ended_timeout_ms: ended_timeout_ms.map(u64::from),
        };
        let controller = TriggerController::new(DomSurface::from_window()?, config)?;
        controller.on_error(|e| warn!("play trigger: {}", e));
        Ok(Self { controller })
    }

    /// Handle a click on `trigger`. Returns true when playback started.
    pub fn activate(&self, trigger: Element) -> std::result::Result<bool, JsValue> {
        Ok(activate_and_arm(&self.controller, &DomTrigger::new(trigger))?)
    }

    /// Attach click handlers to every element matching the trigger selector.
    /// Returns the number of controls bound.
    pub fn bind(&self) -> std::result::Result<u32, JsValue> {
        let nodes = self
            .controller
            .surface()
            .document()
            .query_selector_all(&self.controller.config().trigger_selector)?;

        let mut bound = 0;
        for i in 0..nodes.length() {
            let Some(element) = nodes.item(i).and_then(|n| n.dyn_into::<Element>().ok()) else {
                continue;
            };
            let controller = self.controller.clone();
            let trigger = DomTrigger::new(element.clone());
            let on_click = Closure::<dyn FnMut(Event)>::new(move |_ev: Event| {
                if let Err(e) = activate_and_arm(&controller, &trigger) {
                    warn!("play trigger activation failed: {}", e);
                }
            });
            element.add_event_listener_with_callback("click", on_click.as_ref().unchecked_ref())?;
            // Handlers live as long as the page.
            on_click.forget();
            bound += 1;
        }
        Ok(bound)
    }

    #[wasm_bindgen(js_name = isPlaying)]
    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// Force the controller back to idle
    pub fn reset(&self) -> bool {
        self.controller.reset()
    }
}
