//! Surface traits: the collaborators a trigger controller commands.
//!
//! A surface resolves media elements by selector and owns the trigger
//! controls that start playback. Backends implement these traits over an
//! in-memory model (`memory`), a scanned HTML page (`page`) or the browser
//! DOM (`web`).

use crate::Result;

/// Identifier of an end-of-playback listener registered on a media element
pub type ListenerId = u64;

/// Callback invoked at most once when playback ends
pub type EndedCallback = Box<dyn FnOnce()>;

/// Callback invoked at most once when the environment rejects playback
/// after `play` has already returned
pub type RejectedCallback = Box<dyn FnOnce(String)>;

/// A playable media element owned by the surface.
///
/// Handles are cheap to clone and refer to the same underlying element.
pub trait MediaElement: Clone + 'static {
    /// Begin playback.
    ///
    /// A refusal known synchronously is returned as `Err`. A refusal that
    /// arrives later (e.g. a rejected play promise) is delivered through
    /// `on_rejected`, never from inside this call.
    fn play(&self, on_rejected: RejectedCallback) -> Result<()>;

    /// Attach a presentation class
    fn add_class(&self, class: &str) -> Result<()>;

    /// Remove a presentation class
    fn remove_class(&self, class: &str) -> Result<()>;

    /// Whether the element currently carries `class`
    fn has_class(&self, class: &str) -> bool;

    /// Register a listener fired once on the next end-of-playback event
    fn on_ended_once(&self, cb: EndedCallback) -> Result<ListenerId>;

    /// Detach a listener; unknown or already-fired ids are ignored
    fn remove_ended_listener(&self, id: ListenerId);
}

/// The control that activates a trigger
pub trait TriggerElement {
    /// Remove the control from the interactive surface
    fn remove(&self);

    /// Whether the control is still present on the surface
    fn is_connected(&self) -> bool;
}

/// Environment that resolves media elements and hosts triggers
pub trait Surface {
    type Media: MediaElement;
    type Trigger: TriggerElement;

    /// Resolve the media element matching `selector`, if any
    fn find_media(&self, selector: &str) -> Option<Self::Media>;
}
