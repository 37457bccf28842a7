//! In-memory surface for deterministic playback control in tests and the CLI

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::surface::{
    EndedCallback, ListenerId, MediaElement, RejectedCallback, Surface, TriggerElement,
};
use crate::{Error, Result};

/// Playback state of an in-memory media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Playing,
    Paused,
    Ended,
}

struct MediaInner {
    state: MediaState,
    classes: BTreeSet<String>,
    play_calls: u64,
    listeners: Vec<(ListenerId, EndedCallback)>,
    next_listener: ListenerId,
    refuse_next: Option<String>,
    pending_rejection: Option<RejectedCallback>,
}

/// Media element that records every command it receives.
///
/// Clones share the same element, so a test can keep a handle while the
/// surface hands others to a controller.
#[derive(Clone)]
pub struct MemoryMedia {
    inner: Rc<RefCell<MediaInner>>,
}

impl MemoryMedia {
    pub fn new() -> Self {
        MemoryMedia {
            inner: Rc::new(RefCell::new(MediaInner {
                state: MediaState::Paused,
                classes: BTreeSet::new(),
                play_calls: 0,
                listeners: Vec::new(),
                next_listener: 1,
                refuse_next: None,
                pending_rejection: None,
            })),
        }
    }

    pub fn state(&self) -> MediaState {
        self.inner.borrow().state
    }

    /// Number of accepted `play` commands
    pub fn play_count(&self) -> u64 {
        self.inner.borrow().play_calls
    }

    /// Number of end-of-playback listeners still attached
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn classes(&self) -> Vec<String> {
        self.inner.borrow().classes.iter().cloned().collect()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.inner.borrow().classes.contains(class)
    }

    /// Whether both handles refer to the same element
    pub fn same_element(&self, other: &MemoryMedia) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Refuse the next `play` synchronously with `reason`
    pub fn fail_next_play(&self, reason: impl Into<String>) {
        self.inner.borrow_mut().refuse_next = Some(reason.into());
    }

    /// Deliver an asynchronous rejection for the last accepted `play`.
    ///
    /// Returns false when no play is awaiting a verdict.
    pub fn reject_playback(&self, reason: impl Into<String>) -> bool {
        let cb = {
            let mut inner = self.inner.borrow_mut();
            let cb = inner.pending_rejection.take();
            if cb.is_some() {
                inner.state = MediaState::Paused;
            }
            cb
        };
        match cb {
            Some(cb) => {
                cb(reason.into());
                true
            }
            None => false,
        }
    }

    /// Fire the end-of-playback event, returning how many listeners ran
    pub fn fire_ended(&self) -> usize {
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            inner.state = MediaState::Ended;
            inner.pending_rejection = None;
            std::mem::take(&mut inner.listeners)
        };
        let count = listeners.len();
        for (_, cb) in listeners {
            cb();
        }
        count
    }
}

impl Default for MemoryMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryMedia")
            .field("state", &inner.state)
            .field("classes", &inner.classes)
            .field("play_calls", &inner.play_calls)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl MediaElement for MemoryMedia {
    fn play(&self, on_rejected: RejectedCallback) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(reason) = inner.refuse_next.take() {
            return Err(Error::PlaybackRejected(reason));
        }
        inner.play_calls += 1;
        inner.state = MediaState::Playing;
        inner.pending_rejection = Some(on_rejected);
        Ok(())
    }

    fn add_class(&self, class: &str) -> Result<()> {
        if class.is_empty() || class.contains(char::is_whitespace) {
            return Err(Error::SurfaceError(format!("invalid class token {:?}", class)));
        }
        self.inner.borrow_mut().classes.insert(class.to_string());
        Ok(())
    }

    fn remove_class(&self, class: &str) -> Result<()> {
        self.inner.borrow_mut().classes.remove(class);
        Ok(())
    }

    fn has_class(&self, class: &str) -> bool {
        MemoryMedia::has_class(self, class)
    }

    fn on_ended_once(&self, cb: EndedCallback) -> Result<ListenerId> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((id, cb));
        Ok(id)
    }

    fn remove_ended_listener(&self, id: ListenerId) {
        self.inner.borrow_mut().listeners.retain(|(l, _)| *l != id);
    }
}

/// Trigger control that only tracks whether it is still connected
#[derive(Debug, Clone)]
pub struct MemoryTrigger {
    label: Rc<str>,
    connected: Rc<Cell<bool>>,
}

impl MemoryTrigger {
    pub fn new(label: &str) -> Self {
        MemoryTrigger {
            label: Rc::from(label),
            connected: Rc::new(Cell::new(true)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl TriggerElement for MemoryTrigger {
    fn remove(&self) {
        self.connected.set(false);
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

/// Surface keyed by exact selector string
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    media: Rc<RefCell<HashMap<String, MemoryMedia>>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with a single media element under `selector`
    pub fn with_media(selector: &str, media: MemoryMedia) -> Self {
        let surface = Self::new();
        surface.insert_media(selector, media);
        surface
    }

    pub fn insert_media(&self, selector: &str, media: MemoryMedia) {
        self.media.borrow_mut().insert(selector.to_string(), media);
    }

    /// Drop the element registered under `selector`, simulating a destroyed resource
    pub fn remove_media(&self, selector: &str) -> Option<MemoryMedia> {
        self.media.borrow_mut().remove(selector)
    }

    pub fn media(&self, selector: &str) -> Option<MemoryMedia> {
        self.media.borrow().get(selector).cloned()
    }
}

impl Surface for MemorySurface {
    type Media = MemoryMedia;
    type Trigger = MemoryTrigger;

    fn find_media(&self, selector: &str) -> Option<MemoryMedia> {
        self.media(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_media_transitions_state() {
        let m = MemoryMedia::new();
        assert_eq!(m.state(), MediaState::Paused);
        m.play(Box::new(|_: String| {})).unwrap();
        assert_eq!(m.state(), MediaState::Playing);
        assert_eq!(m.play_count(), 1);
        m.fire_ended();
        assert_eq!(m.state(), MediaState::Ended);
    }

    #[test]
    fn refused_play_is_not_counted() {
        let m = MemoryMedia::new();
        m.fail_next_play("NotAllowedError");
        let err = m.play(Box::new(|_: String| {})).unwrap_err();
        assert_eq!(err, Error::PlaybackRejected("NotAllowedError".into()));
        assert_eq!(m.play_count(), 0);
        assert_eq!(m.state(), MediaState::Paused);

        // only the next play is refused
        m.play(Box::new(|_: String| {})).unwrap();
        assert_eq!(m.play_count(), 1);
    }

    #[test]
    fn async_rejection_runs_once() {
        let m = MemoryMedia::new();
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        m.play(Box::new(move |r: String| *s.borrow_mut() = Some(r))).unwrap();
        assert!(m.reject_playback("AbortError"));
        assert!(!m.reject_playback("AbortError"));
        assert_eq!(seen.borrow().as_deref(), Some("AbortError"));
        assert_eq!(m.state(), MediaState::Paused);
    }

    #[test]
    fn class_list_rejects_whitespace_tokens() {
        let m = MemoryMedia::new();
        assert!(m.add_class("is playing").is_err());
        m.add_class("playing").unwrap();
        assert!(m.has_class("playing"));
        m.remove_class("playing").unwrap();
        assert!(m.classes().is_empty());
    }

    #[test]
    fn surface_resolves_by_selector() {
        let media = MemoryMedia::new();
        let s = MemorySurface::with_media("video#gnome", media.clone());
        assert!(s.find_media("video#gnome").unwrap().same_element(&media));
        assert!(s.find_media("video#other").is_none());
        s.remove_media("video#gnome");
        assert!(s.find_media("video#gnome").is_none());
    }

    #[test]
    fn trigger_removal_disconnects() {
        let t = MemoryTrigger::new("play");
        assert!(t.is_connected());
        t.remove();
        t.remove();
        assert!(!t.is_connected());
        assert_eq!(t.label(), "play");
    }
}
