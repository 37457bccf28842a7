//! Error types for play triggers

use thiserror::Error;

/// Result type alias for trigger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a play trigger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The media element could not be resolved on the surface
    #[error("Media resource not found: {0}")]
    ResourceNotFound(String),

    /// The environment refused to start playback
    #[error("Playback rejected: {0}")]
    PlaybackRejected(String),

    /// A surface operation (class list, listener registration) failed
    #[error("Surface operation failed: {0}")]
    SurfaceError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "web")]
impl From<wasm_bindgen::JsValue> for Error {
    fn from(value: wasm_bindgen::JsValue) -> Self {
        Error::SurfaceError(format!("{:?}", value))
    }
}

#[cfg(feature = "web")]
impl From<Error> for wasm_bindgen::JsValue {
    fn from(err: Error) -> Self {
        wasm_bindgen::JsValue::from_str(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = Error::ResourceNotFound("video#gnome".into());
        assert_eq!(e.to_string(), "Media resource not found: video#gnome");
        let e = Error::PlaybackRejected("NotAllowedError".into());
        assert!(e.to_string().contains("NotAllowedError"));
    }
}
