//! # Playkit
//!
//! A safe bridge between Rust applications and a native media playback engine.
//!
//! The native engine invokes application code on threads the application does
//! not control, handing over pointers into memory whose lifetime is governed
//! by the native side. Playkit turns those callbacks into safe, ordered,
//! application-visible behavior:
//!
//! - `event`: decodes tagged native event records into owned event values and
//!   delivers them to registered listeners on a dedicated dispatch thread,
//!   FIFO and one at a time.
//! - `surface`: negotiates pixel buffer layouts with the engine, allocates
//!   aligned (optionally page-locked) multi-plane frame buffers, and drives
//!   the lock/fill/unlock/display render cycle.
//!
//! ## Features
//!
//! Playkit is modular. Enable only what you need:
//!
//! - `event`: native event bridge and dispatch pump.
//! - `surface`: buffer format negotiation, frame buffer pool, render cycle.
//!
//! Use the `full` feature to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! playkit = { version = "0.1", features = ["full"] }
//! ```

#[cfg(feature = "event")]
pub use playkit_event as event;

#[cfg(feature = "surface")]
pub use playkit_surface as surface;
