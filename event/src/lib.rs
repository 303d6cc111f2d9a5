//! Native media engine event bridge and dispatch pump.
//!
//! The native engine delivers tagged-union event records on threads it owns,
//! pointing into memory it owns. This crate turns those records into owned
//! [`PlayerEvent`] values on the delivering thread, queues them, and delivers
//! them to registered listeners from one dedicated pump thread: FIFO, one
//! listener at a time, with per-listener panic isolation.
//!
//! # Usage
//!
//! ```ignore
//! use playkit_event::{EventBridge, PlayerEvent, PlayerEventListener};
//!
//! struct Printer;
//! impl PlayerEventListener for Printer {
//!     fn notify(&self, event: &PlayerEvent) {
//!         println!("{event:?}");
//!     }
//! }
//!
//! let bridge = EventBridge::new(source)?;
//! let id = bridge.add_listener(std::sync::Arc::new(Printer));
//! // ... playback ...
//! bridge.remove_listener(id);
//! // Dropping the bridge detaches from the source, then drains the pump.
//! ```

#![warn(missing_docs)]

mod bridge;
mod decode;
mod pump;
pub mod raw;
mod registry;

pub use bridge::EventBridge;
pub use decode::{DecodeError, PlayerEvent, TrackKind, decode};
pub use raw::{AttachHandle, EventRange, EventSink, EventSource, RawEvent};
pub use registry::{ListenerId, ListenerRegistry, PlayerEventListener};

/// Errors that can occur while setting up the event bridge.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The native event source rejected the callback registration.
    #[error("failed to attach to the native event source: {0}")]
    AttachFailed(String),
    /// The dispatch pump thread could not be spawned.
    #[error("failed to spawn the dispatch pump thread: {0}")]
    PumpSpawn(std::io::Error),
}
