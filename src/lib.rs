//! Playtrigger
//!
//! One-shot play triggers for media elements. Activating a trigger removes
//! the control from the surface, starts playback of a designated media
//! element and marks it with a presentation class until playback ends.
//! Re-entrant activations while a cycle is in progress are ignored.
//!
//! # Features
//!
//! - **In-memory surface** (always): deterministic doubles for tests and the CLI
//! - **`html`** (default): scan an HTML page for the media element and its triggers
//! - **`web`**: drive a real `<video>` through `web-sys` from WebAssembly
//!
//! # Example
//!
//! ```
//! use playtrigger::memory::{MemoryMedia, MemorySurface, MemoryTrigger};
//! use playtrigger::{Activation, PlaybackState, TriggerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TriggerConfig::default();
//! let video = MemoryMedia::new();
//! let surface = MemorySurface::with_media(&config.video_selector, video.clone());
//! let controller = playtrigger::new_controller(surface, config)?;
//!
//! let outcome = controller.activate(&MemoryTrigger::new("play"))?;
//! assert!(matches!(outcome, Activation::Started { .. }));
//! assert!(video.has_class("playing"));
//!
//! video.fire_ended();
//! assert_eq!(controller.state(), PlaybackState::Idle);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod controller;
pub mod memory;
pub mod simulate;
pub mod subscription;
pub mod surface;

// Page scanning backend (parses HTML, no script execution)
#[cfg(feature = "html")]
pub mod page;

// Browser backend over web-sys
#[cfg(feature = "web")]
pub mod web;

pub use controller::TriggerController;
pub use subscription::Subscription;
pub use surface::{MediaElement, Surface, TriggerElement};

/// Configuration for a trigger controller
///
/// The defaults match a page with a single `<video id="gnome">` and buttons
/// tagged with `data-play-trigger`. No end-of-playback timeout is set, so a
/// cycle only ends on a real end event, a rejection or an explicit reset.
///
/// # Examples
///
/// ```
/// let cfg = playtrigger::TriggerConfig::default();
/// assert_eq!(cfg.video_selector, "video#gnome");
/// assert!(cfg.ended_timeout_ms.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Selector resolving the media element at activation time
    pub video_selector: String,
    /// Presentation class attached while playback is active
    pub playing_class: String,
    /// Selector for trigger controls when scanning or binding a page
    pub trigger_selector: String,
    /// Force the cycle back to idle when no end event arrives in time
    pub ended_timeout_ms: Option<u64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            video_selector: "video#gnome".to_string(),
            playing_class: "playing".to_string(),
            trigger_selector: "[data-play-trigger]".to_string(),
            ended_timeout_ms: None,
        }
    }
}

impl TriggerConfig {
    /// Check the configuration before a controller is built
    pub fn validate(&self) -> Result<()> {
        if self.video_selector.trim().is_empty() {
            return Err(Error::ConfigError("video_selector must not be empty".into()));
        }
        if self.trigger_selector.trim().is_empty() {
            return Err(Error::ConfigError("trigger_selector must not be empty".into()));
        }
        if self.playing_class.is_empty() || self.playing_class.contains(char::is_whitespace) {
            return Err(Error::ConfigError(format!(
                "playing_class must be a single class token, got {:?}",
                self.playing_class
            )));
        }
        if self.ended_timeout_ms == Some(0) {
            return Err(Error::ConfigError("ended_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn ended_timeout(&self) -> Option<Duration> {
        self.ended_timeout_ms.map(Duration::from_millis)
    }
}

/// Identifier of one `Idle -> Playing -> Idle` round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub u64);

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Re-entrancy state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
}

/// What an activation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Activation {
    /// Playback was requested and a new cycle began
    Started { cycle: CycleId },
    /// A cycle was already in progress; only the trigger was consumed
    AlreadyPlaying,
}

/// Why a playing cycle returned to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEnd {
    /// The media fired its end-of-playback event
    Ended,
    /// The environment rejected playback after it was requested
    Rejected,
    /// No end event arrived within `ended_timeout_ms`
    TimedOut,
    /// The caller reset the controller
    Reset,
}

/// Create a controller over `surface` after validating `config`
pub fn new_controller<S: Surface>(surface: S, config: TriggerConfig) -> Result<TriggerController<S>> {
    TriggerController::new(surface, config)
}
