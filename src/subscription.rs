//! One-time end-of-playback subscriptions.

use std::cell::Cell;
use std::rc::Rc;

use crate::surface::{ListenerId, MediaElement};
use crate::Result;

/// Token for a listener registered with [`MediaElement::on_ended_once`].
///
/// The listener is detached when the token is cancelled or dropped, unless
/// it already fired. Holding the token keeps the media handle alive; once
/// released nothing in the controller references the element.
pub struct Subscription<M: MediaElement> {
    media: Option<M>,
    id: ListenerId,
    fired: Rc<Cell<bool>>,
}

impl<M: MediaElement> Subscription<M> {
    /// Register `cb` on `media` and return the token guarding it.
    pub fn ended_once<F>(media: &M, cb: F) -> Result<Self>
    where
        F: FnOnce() + 'static,
    {
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let id = media.on_ended_once(Box::new(move || {
            flag.set(true);
            cb();
        }))?;

        Ok(Self {
            media: Some(media.clone()),
            id,
            fired,
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener has been invoked
    pub fn has_fired(&self) -> bool {
        self.fired.get()
    }

    /// Whether the token still holds a live registration
    pub fn is_active(&self) -> bool {
        self.media.is_some() && !self.fired.get()
    }

    /// Detach the listener if it has not fired yet. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(media) = self.media.take() {
            if !self.fired.get() {
                media.remove_ended_listener(self.id);
            }
        }
    }
}

impl<M: MediaElement> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<M: MediaElement> std::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("fired", &self.fired.get())
            .field("attached", &self.media.is_some())
            .finish()
    }
}
