//! Trigger controller: the re-entrancy guarded play handler.
//!
//! A controller owns the playback state for one UI surface. Activations
//! consume their trigger unconditionally; only an idle controller starts a
//! new cycle. A cycle ends on the media's end-of-playback event, an
//! asynchronous playback rejection, the optional watchdog, or `reset`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use web_time::Instant;

use crate::subscription::Subscription;
use crate::surface::{MediaElement, Surface, TriggerElement};
use crate::{Activation, CycleEnd, CycleId, Error, PlaybackState, Result, TriggerConfig};

type OnErrorHandler = Rc<dyn Fn(&Error)>;

struct Cycle<M: MediaElement> {
    id: CycleId,
    media: M,
    started_at: Instant,
    ended: Option<Subscription<M>>,
}

struct Shared<M: MediaElement> {
    playing_class: String,
    state: Cell<PlaybackState>,
    cycle: RefCell<Option<Cycle<M>>>,
    next_cycle: Cell<u64>,
    started: Cell<u64>,
    waiters: RefCell<Vec<oneshot::Sender<CycleEnd>>>,
    on_error: RefCell<Option<OnErrorHandler>>,
}

impl<M: MediaElement> Shared<M> {
    /// Return to idle if `id` is the cycle in progress. Returns false for
    /// stale notifications.
    fn finish(&self, id: CycleId, end: CycleEnd) -> bool {
        let cycle = {
            let mut slot = self.cycle.borrow_mut();
            match slot.as_ref() {
                Some(current) if current.id == id => slot.take(),
                _ => None,
            }
        };
        let Some(mut cycle) = cycle else {
            debug!("ignoring {:?} for cycle {}: not in progress", end, id);
            return false;
        };

        if let Some(mut sub) = cycle.ended.take() {
            sub.cancel();
        }
        if let Err(e) = cycle.media.remove_class(&self.playing_class) {
            warn!("cycle {}: failed to remove presentation marker: {}", id, e);
        }
        self.state.set(PlaybackState::Idle);
        info!("cycle {} finished: {:?}", id, end);

        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for tx in waiters {
            let _ = tx.send(end);
        }
        true
    }

    fn report(&self, err: &Error) {
        let handler = self.on_error.borrow().clone();
        match handler {
            Some(h) => h(err),
            None => warn!("unhandled trigger error: {}", err),
        }
    }
}

/// Controller for one surface's play trigger.
///
/// State is single-threaded (`Rc`/`Cell`), matching a UI event loop. Clones
/// share the same state.
pub struct TriggerController<S: Surface> {
    surface: S,
    config: TriggerConfig,
    shared: Rc<Shared<S::Media>>,
}

impl<S: Surface + Clone> Clone for TriggerController<S> {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S: Surface> TriggerController<S> {
    pub fn new(surface: S, config: TriggerConfig) -> Result<Self> {
        config.validate()?;
        let shared = Rc::new(Shared {
            playing_class: config.playing_class.clone(),
            state: Cell::new(PlaybackState::Idle),
            cycle: RefCell::new(None),
            next_cycle: Cell::new(1),
            started: Cell::new(0),
            waiters: RefCell::new(Vec::new()),
            on_error: RefCell::new(None),
        });
        Ok(Self {
            surface,
            config,
            shared,
        })
    }

    /// Handle one activation of `trigger`.
    ///
    /// The trigger is removed from the surface whatever the outcome. On
    /// error the controller stays idle so a fresh trigger can retry.
    pub fn activate(&self, trigger: &S::Trigger) -> Result<Activation> {
        trigger.remove();

        if self.shared.state.get() == PlaybackState::Playing {
            debug!("activation ignored: cycle {:?} in progress", self.current_cycle());
            return Ok(Activation::AlreadyPlaying);
        }
        self.shared.state.set(PlaybackState::Playing);

        match self.start_cycle() {
            Ok(cycle) => Ok(Activation::Started { cycle }),
            Err(err) => {
                self.shared.state.set(PlaybackState::Idle);
                warn!("activation failed: {}", err);
                Err(err)
            }
        }
    }

    fn start_cycle(&self) -> Result<CycleId> {
        let selector = &self.config.video_selector;
        let media = self
            .surface
            .find_media(selector)
            .ok_or_else(|| Error::ResourceNotFound(selector.clone()))?;

        // Failed attempts consume their id so their late callbacks stay stale.
        let id = CycleId(self.shared.next_cycle.get());
        self.shared.next_cycle.set(id.0 + 1);

        let weak = Rc::downgrade(&self.shared);
        media.play(Box::new(move |reason| {
            if let Some(shared) = weak.upgrade() {
                if shared.finish(id, CycleEnd::Rejected) {
                    shared.report(&Error::PlaybackRejected(reason));
                }
            }
        }))?;

        if let Err(e) = media.add_class(&self.config.playing_class) {
            warn!("cycle {}: failed to add presentation marker: {}", id, e);
        }

        let weak = Rc::downgrade(&self.shared);
        let ended = match Subscription::ended_once(&media, move || {
            if let Some(shared) = weak.upgrade() {
                shared.finish(id, CycleEnd::Ended);
            }
        }) {
            Ok(sub) => sub,
            Err(e) => {
                if let Err(err) = media.remove_class(&self.config.playing_class) {
                    warn!("cycle {}: failed to remove presentation marker: {}", id, err);
                }
                warn!(
                    "cycle {}: playback on {} was accepted but has no end listener; abandoning it",
                    id, selector
                );
                return Err(e);
            }
        };

        *self.shared.cycle.borrow_mut() = Some(Cycle {
            id,
            media,
            started_at: Instant::now(),
            ended: Some(ended),
        });
        self.shared.started.set(self.shared.started.get() + 1);
        info!("cycle {} started on {}", id, selector);
        Ok(id)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.get()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// The cycle in progress, if any
    pub fn current_cycle(&self) -> Option<CycleId> {
        self.shared.cycle.borrow().as_ref().map(|c| c.id)
    }

    /// Number of cycles that reached playback
    pub fn cycles_started(&self) -> u64 {
        self.shared.started.get()
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Force the current cycle back to idle. Returns false when already idle.
    pub fn reset(&self) -> bool {
        match self.current_cycle() {
            Some(id) => self.shared.finish(id, CycleEnd::Reset),
            None => false,
        }
    }

    /// Time out `cycle` if it is still in progress
    pub fn expire(&self, cycle: CycleId) -> bool {
        self.shared.finish(cycle, CycleEnd::TimedOut)
    }

    /// Time out the current cycle when `ended_timeout_ms` has elapsed at `now`
    pub fn expire_stale(&self, now: Instant) -> bool {
        let Some(limit) = self.config.ended_timeout() else {
            return false;
        };
        let due = self.shared.cycle.borrow().as_ref().and_then(|c| {
            let elapsed = now.checked_duration_since(c.started_at)?;
            (elapsed >= limit).then_some(c.id)
        });
        match due {
            Some(id) => self.expire(id),
            None => false,
        }
    }

    /// Completion of the current cycle; `None` when idle
    pub fn wait_idle(&self) -> Option<oneshot::Receiver<CycleEnd>> {
        if self.current_cycle().is_none() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.shared.waiters.borrow_mut();
        waiters.retain(|tx| !tx.is_closed());
        waiters.push(tx);
        Some(rx)
    }

    /// Number of live receivers handed out by `wait_idle` for the current cycle
    pub fn pending_waiters(&self) -> usize {
        self.shared
            .waiters
            .borrow()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Register a callback for errors raised after `activate` returned
    pub fn on_error<F>(&self, cb: F)
    where
        F: Fn(&Error) + 'static,
    {
        *self.shared.on_error.borrow_mut() = Some(Rc::new(cb));
    }

    /// Remove previously registered on_error callback if any
    pub fn clear_on_error(&self) {
        *self.shared.on_error.borrow_mut() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMedia, MemorySurface, MemoryTrigger};
    use std::time::Duration;

    fn setup(config: TriggerConfig) -> (TriggerController<MemorySurface>, MemoryMedia) {
        let media = MemoryMedia::new();
        let surface = MemorySurface::with_media(&config.video_selector, media.clone());
        (TriggerController::new(surface, config).unwrap(), media)
    }

    #[test]
    fn single_activation_then_end() {
        let (c, media) = setup(TriggerConfig::default());
        let trigger = MemoryTrigger::new("play");

        let outcome = c.activate(&trigger).unwrap();
        assert_eq!(outcome, Activation::Started { cycle: CycleId(1) });
        assert!(!trigger.is_connected());
        assert_eq!(media.play_count(), 1);
        assert!(media.has_class("playing"));
        assert!(c.is_playing());

        media.fire_ended();
        assert_eq!(c.state(), PlaybackState::Idle);
        assert!(!media.has_class("playing"));
        assert_eq!(c.current_cycle(), None);
        assert_eq!(media.listener_count(), 0);
    }

    #[test]
    fn reentrant_activation_is_ignored() {
        let (c, media) = setup(TriggerConfig::default());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        let second = MemoryTrigger::new("b");
        assert_eq!(c.activate(&second).unwrap(), Activation::AlreadyPlaying);
        assert!(!second.is_connected());
        assert_eq!(media.play_count(), 1);
        assert_eq!(media.listener_count(), 1);
    }

    #[test]
    fn missing_media_leaves_controller_idle() {
        let c = TriggerController::new(MemorySurface::new(), TriggerConfig::default()).unwrap();
        let trigger = MemoryTrigger::new("play");
        let err = c.activate(&trigger).unwrap_err();
        assert_eq!(err, Error::ResourceNotFound("video#gnome".into()));
        assert_eq!(c.state(), PlaybackState::Idle);
        assert!(!trigger.is_connected());
        assert_eq!(c.cycles_started(), 0);
    }

    #[test]
    fn refused_play_rolls_back() {
        let (c, media) = setup(TriggerConfig::default());
        media.fail_next_play("NotAllowedError");
        let err = c.activate(&MemoryTrigger::new("a")).unwrap_err();
        assert!(matches!(err, Error::PlaybackRejected(_)));
        assert!(!c.is_playing());
        assert!(!media.has_class("playing"));
        assert_eq!(media.listener_count(), 0);

        // the refused attempt used up cycle 1
        let outcome = c.activate(&MemoryTrigger::new("b")).unwrap();
        assert_eq!(outcome, Activation::Started { cycle: CycleId(2) });
        assert_eq!(c.cycles_started(), 1);
    }

    #[test]
    fn async_rejection_reports_and_resets() {
        let (c, media) = setup(TriggerConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        c.on_error(move |e| s.borrow_mut().push(e.clone()));

        c.activate(&MemoryTrigger::new("a")).unwrap();
        assert!(media.reject_playback("NotAllowedError"));

        assert!(!c.is_playing());
        assert!(!media.has_class("playing"));
        assert_eq!(media.listener_count(), 0);
        assert_eq!(
            seen.borrow().as_slice(),
            &[Error::PlaybackRejected("NotAllowedError".into())]
        );
    }

    #[test]
    fn watchdog_expires_stale_cycle_and_ignores_late_end() {
        let (c, media) = setup(TriggerConfig {
            ended_timeout_ms: Some(500),
            ..Default::default()
        });
        c.activate(&MemoryTrigger::new("a")).unwrap();
        let started = Instant::now();

        assert!(!c.expire_stale(started));
        assert!(c.is_playing());

        assert!(c.expire_stale(started + Duration::from_secs(1)));
        assert!(!c.is_playing());
        assert!(!media.has_class("playing"));

        // the listener was released on expiry, so a late end is a no-op
        assert_eq!(media.fire_ended(), 0);
        assert_eq!(c.state(), PlaybackState::Idle);
    }

    #[test]
    fn expire_without_timeout_config_is_noop() {
        let (c, _media) = setup(TriggerConfig::default());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        assert!(!c.expire_stale(Instant::now() + Duration::from_secs(3600)));
        assert!(c.is_playing());
    }

    #[test]
    fn stale_cycle_ids_are_ignored() {
        let (c, media) = setup(TriggerConfig::default());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        media.fire_ended();
        c.activate(&MemoryTrigger::new("b")).unwrap();

        assert!(!c.expire(CycleId(1)));
        assert!(c.is_playing());
        assert!(c.expire(CycleId(2)));
    }

    #[test]
    fn reset_releases_listener() {
        let (c, media) = setup(TriggerConfig::default());
        assert!(!c.reset());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        assert!(c.reset());
        assert_eq!(media.listener_count(), 0);
        assert!(!media.has_class("playing"));
    }

    #[test]
    fn dropping_controller_detaches_listener() {
        let (c, media) = setup(TriggerConfig::default());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        assert_eq!(media.listener_count(), 1);
        drop(c);
        assert_eq!(media.listener_count(), 0);
        // the rejection callback outlives the controller and must be inert
        assert!(media.reject_playback("late"));
    }

    #[test]
    fn custom_marker_class() {
        let (c, media) = setup(TriggerConfig {
            playing_class: "is-running".into(),
            ..Default::default()
        });
        c.activate(&MemoryTrigger::new("a")).unwrap();
        assert_eq!(media.classes(), vec!["is-running".to_string()]);
    }

    /// Media whose first listener registration fails and which keeps every
    /// rejection callback so a test can deliver it late
    #[derive(Clone)]
    struct FlakyMedia {
        inner: MemoryMedia,
        failures_left: Rc<Cell<u32>>,
        rejections: Rc<RefCell<Vec<crate::surface::RejectedCallback>>>,
    }

    impl MediaElement for FlakyMedia {
        fn play(&self, on_rejected: crate::surface::RejectedCallback) -> Result<()> {
            self.inner.play(Box::new(|_: String| {}))?;
            self.rejections.borrow_mut().push(on_rejected);
            Ok(())
        }
        fn add_class(&self, class: &str) -> Result<()> {
            self.inner.add_class(class)
        }
        fn remove_class(&self, class: &str) -> Result<()> {
            self.inner.remove_class(class)
        }
        fn has_class(&self, class: &str) -> bool {
            self.inner.has_class(class)
        }
        fn on_ended_once(&self, cb: crate::surface::EndedCallback) -> Result<crate::surface::ListenerId> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(Error::SurfaceError("listener registration failed".into()));
            }
            self.inner.on_ended_once(cb)
        }
        fn remove_ended_listener(&self, id: crate::surface::ListenerId) {
            self.inner.remove_ended_listener(id)
        }
    }

    struct FlakySurface(FlakyMedia);

    impl Surface for FlakySurface {
        type Media = FlakyMedia;
        type Trigger = MemoryTrigger;

        fn find_media(&self, _selector: &str) -> Option<FlakyMedia> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn failed_attempt_rejection_does_not_end_next_cycle() {
        let media = FlakyMedia {
            inner: MemoryMedia::new(),
            failures_left: Rc::new(Cell::new(1)),
            rejections: Rc::new(RefCell::new(Vec::new())),
        };
        let c = TriggerController::new(FlakySurface(media.clone()), TriggerConfig::default()).unwrap();

        let first = c.activate(&MemoryTrigger::new("a")).unwrap_err();
        assert!(matches!(first, Error::SurfaceError(_)));
        assert!(!c.is_playing());
        assert!(!media.has_class("playing"));
        assert_eq!(c.cycles_started(), 0);

        let second = c.activate(&MemoryTrigger::new("b")).unwrap();
        assert_eq!(second, Activation::Started { cycle: CycleId(2) });
        assert_eq!(c.cycles_started(), 1);

        // the failed attempt's play promise rejects late
        let stale = media.rejections.borrow_mut().remove(0);
        stale("AbortError".into());
        assert!(c.is_playing());
        assert_eq!(c.current_cycle(), Some(CycleId(2)));
        assert!(media.has_class("playing"));
    }

    #[test]
    fn dropped_waiters_are_pruned() {
        let (c, _media) = setup(TriggerConfig::default());
        c.activate(&MemoryTrigger::new("a")).unwrap();
        for _ in 0..100 {
            drop(c.wait_idle());
        }
        let _kept = c.wait_idle().unwrap();
        assert_eq!(c.pending_waiters(), 1);
        assert_eq!(c.shared.waiters.borrow().len(), 1);
    }
}
