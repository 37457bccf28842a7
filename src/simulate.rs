//! Scripted simulation of a trigger controller over an in-memory surface.
//!
//! Used by the `playtrigger` binary (`simulate` and `worker` commands) and by
//! tests that want a compact event script instead of hand-driven doubles.

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::memory::{MemoryMedia, MemorySurface, MemoryTrigger};
use crate::{Activation, CycleEnd, CycleId, Error, PlaybackState, Result, TriggerConfig, TriggerController};

/// One environment event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Activate a freshly supplied trigger
    Activate,
    /// The media fires its end-of-playback event
    Ended,
    /// The pending play is rejected asynchronously
    Reject {
        #[serde(default = "default_reason")]
        reason: String,
    },
    /// The next play is refused synchronously
    Refuse {
        #[serde(default = "default_reason")]
        reason: String,
    },
    /// The watchdog fires for the current cycle
    Expire,
    /// The caller resets the controller
    Reset,
    /// The media element is removed from the surface
    RemoveMedia,
    /// Report state without changing anything
    State,
}

fn default_reason() -> String {
    "NotAllowedError".to_string()
}

impl FromStr for Event {
    type Err = Error;

    /// Parse the CLI form: `activate`, `ended`, `reject[:reason]`,
    /// `refuse[:reason]`, `expire`, `reset`, `remove-media`, `state`
    fn from_str(s: &str) -> Result<Self> {
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n, Some(a.to_string())),
            None => (s, None),
        };
        let reason = || arg.clone().unwrap_or_else(default_reason);
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "activate" => Ok(Event::Activate),
            "ended" | "end" => Ok(Event::Ended),
            "reject" => Ok(Event::Reject { reason: reason() }),
            "refuse" => Ok(Event::Refuse { reason: reason() }),
            "expire" => Ok(Event::Expire),
            "reset" => Ok(Event::Reset),
            "remove-media" => Ok(Event::RemoveMedia),
            "state" => Ok(Event::State),
            other => Err(Error::Other(format!("unknown event {:?}", other))),
        }
    }
}

/// Effect of a single event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Activated(Activation),
    Finished { end: CycleEnd },
    Failed { error: String },
    Unchanged,
}

/// Report produced after each event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub seq: u64,
    pub event: Event,
    pub outcome: Outcome,
    pub state: PlaybackState,
    pub cycle: Option<CycleId>,
    /// Total accepted play commands on the media element
    pub plays: u64,
    /// Whether the presentation marker is present
    pub marker: bool,
    /// Errors reported asynchronously while handling the event
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Drives a controller with [`Event`]s
pub struct Simulator {
    controller: TriggerController<MemorySurface>,
    media: MemoryMedia,
    seq: u64,
    errors: Rc<RefCell<Vec<String>>>,
    // One completion receiver per cycle, taken when the cycle starts
    pending: Option<(CycleId, oneshot::Receiver<CycleEnd>)>,
}

impl Simulator {
    pub fn new(config: TriggerConfig) -> Result<Self> {
        let media = MemoryMedia::new();
        let surface = MemorySurface::with_media(&config.video_selector, media.clone());
        let controller = TriggerController::new(surface, config)?;

        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        controller.on_error(move |e| sink.borrow_mut().push(e.to_string()));

        Ok(Self {
            controller,
            media,
            seq: 0,
            errors,
            pending: None,
        })
    }

    pub fn controller(&self) -> &TriggerController<MemorySurface> {
        &self.controller
    }

    pub fn media(&self) -> &MemoryMedia {
        &self.media
    }

    pub fn apply(&mut self, event: Event) -> Step {
        self.seq += 1;
        self.track_cycle();

        let mut outcome = match &event {
            Event::Activate => {
                let trigger = MemoryTrigger::new(&format!("trigger-{}", self.seq));
                match self.controller.activate(&trigger) {
                    Ok(a) => Outcome::Activated(a),
                    Err(e) => Outcome::Failed {
                        error: e.to_string(),
                    },
                }
            }
            Event::Ended => {
                self.media.fire_ended();
                Outcome::Unchanged
            }
            Event::Reject { reason } => {
                self.media.reject_playback(reason.clone());
                Outcome::Unchanged
            }
            Event::Refuse { reason } => {
                self.media.fail_next_play(reason.clone());
                Outcome::Unchanged
            }
            Event::Expire => {
                if let Some(cycle) = self.controller.current_cycle() {
                    self.controller.expire(cycle);
                }
                Outcome::Unchanged
            }
            Event::Reset => {
                self.controller.reset();
                Outcome::Unchanged
            }
            Event::RemoveMedia => {
                self.controller
                    .surface()
                    .remove_media(&self.controller.config().video_selector);
                Outcome::Unchanged
            }
            Event::State => Outcome::Unchanged,
        };

        if let Some((_, rx)) = self.pending.as_mut() {
            if let Ok(end) = rx.try_recv() {
                outcome = Outcome::Finished { end };
                self.pending = None;
            }
        }
        self.track_cycle();

        Step {
            seq: self.seq,
            event,
            outcome,
            state: self.controller.state(),
            cycle: self.controller.current_cycle(),
            plays: self.media.play_count(),
            marker: self.media.has_class(&self.controller.config().playing_class),
            errors: std::mem::take(&mut *self.errors.borrow_mut()),
        }
    }

    fn track_cycle(&mut self) {
        let current = self.controller.current_cycle();
        let tracked = self.pending.as_ref().map(|(id, _)| *id);
        if current != tracked {
            self.pending = self.controller.wait_idle().zip(current).map(|(rx, id)| (id, rx));
        }
    }

    /// Apply every event in order
    pub fn run<I>(&mut self, events: I) -> Vec<Step>
    where
        I: IntoIterator<Item = Event>,
    {
        events.into_iter().map(|e| self.apply(e)).collect()
    }
}
