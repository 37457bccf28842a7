//! Page scanning: find the media element and trigger controls in an HTML document.

use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::memory::{MemoryMedia, MemorySurface, MemoryTrigger};
use crate::{Error, Result, TriggerConfig, TriggerController};

/// A trigger control discovered on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    /// Element tag name (e.g. `button`)
    pub tag: String,
    /// `id` attribute when present
    pub id: Option<String>,
    /// Visible text, falling back to the id or tag
    pub label: String,
}

/// What a page offers to a trigger controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageBindings {
    /// Selector used to resolve the media element
    pub media_selector: String,
    /// Whether the selector resolved to a `<video>` or `<audio>` element
    pub media_found: bool,
    /// Trigger controls in document order
    pub triggers: Vec<TriggerInfo>,
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| Error::ConfigError(format!("invalid selector {:?}: {:?}", selector, e)))
}

fn describe_trigger(el: ElementRef<'_>) -> TriggerInfo {
    let tag = el.value().name().to_string();
    let id = el.value().attr("id").map(|s| s.to_string());
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let label = if !text.is_empty() {
        text
    } else if let Some(ref id) = id {
        id.clone()
    } else {
        tag.clone()
    };
    TriggerInfo { tag, id, label }
}

impl PageBindings {
    /// Scan `html` using the selectors from `config`
    pub fn scan(html: &str, config: &TriggerConfig) -> Result<Self> {
        config.validate()?;
        let media_sel = parse_selector(&config.video_selector)?;
        let trigger_sel = parse_selector(&config.trigger_selector)?;

        let document = Html::parse_document(html);

        let media_found = match document.select(&media_sel).next() {
            Some(el) => {
                let name = el.value().name();
                let is_media = name == "video" || name == "audio";
                if !is_media {
                    warn!(
                        "{} matched a <{}> element, which cannot play",
                        config.video_selector, name
                    );
                }
                is_media
            }
            None => false,
        };

        let triggers: Vec<TriggerInfo> = document.select(&trigger_sel).map(describe_trigger).collect();
        debug!(
            "scanned page: media_found={} triggers={}",
            media_found,
            triggers.len()
        );

        Ok(Self {
            media_selector: config.video_selector.clone(),
            media_found,
            triggers,
        })
    }

    /// Build an in-memory surface mirroring the page, plus one trigger per control
    pub fn to_surface(&self) -> (MemorySurface, Vec<MemoryTrigger>) {
        let surface = MemorySurface::new();
        if self.media_found {
            surface.insert_media(&self.media_selector, MemoryMedia::new());
        }
        let triggers = self
            .triggers
            .iter()
            .map(|t| MemoryTrigger::new(&t.label))
            .collect();
        (surface, triggers)
    }

    /// Build a controller wired to the page's surface
    pub fn controller(
        &self,
        config: TriggerConfig,
    ) -> Result<(TriggerController<MemorySurface>, Vec<MemoryTrigger>)> {
        if config.video_selector != self.media_selector {
            return Err(Error::ConfigError(format!(
                "page was scanned for {:?}, not {:?}",
                self.media_selector, config.video_selector
            )));
        }
        let (surface, triggers) = self.to_surface();
        Ok((TriggerController::new(surface, config)?, triggers))
    }
}
