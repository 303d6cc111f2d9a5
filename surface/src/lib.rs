//! Frame buffer pipeline for a native media engine's video output.
//!
//! The engine asks the application for a pixel buffer layout whenever the
//! source dimensions become known or change, then fills application-owned
//! buffers one frame at a time through a lock/fill/unlock/display cycle.
//! This crate provides the three pieces that make that safe:
//!
//! - [`BufferFormat`] / [`FormatNegotiator`]: validated layouts and policy-
//!   driven negotiation that never hands the engine a zero-area buffer.
//! - [`FrameBufferPool`]: 32-byte-aligned, optionally page-locked plane
//!   allocation, with old buffers retired (not freed) across format changes.
//! - [`RenderCycle`] / [`VideoPipeline`]: the per-frame state machine and the
//!   engine-facing callback table, with panic isolation at every
//!   foreign-function entry point.
//!
//! # Usage
//!
//! ```ignore
//! use playkit_surface::{SourceSizePolicy, VideoPipeline};
//!
//! let pipeline = std::sync::Arc::new(VideoPipeline::new(
//!     Box::new(SourceSizePolicy),
//!     Box::new(renderer),
//!     /* pin_memory */ true,
//! ));
//! engine.set_video_callbacks(pipeline.callbacks());
//! ```

#![warn(missing_docs)]

mod cycle;
mod format;
mod pipeline;
mod pool;
mod sys;

pub use cycle::{CycleState, RenderCallback, RenderCycle};
pub use format::{
    BufferFormat, FormatError, FormatNegotiator, FourCc, MAX_PLANES, SizingPolicy,
    SourceSizePolicy,
};
pub use pipeline::{SurfaceCallbacks, VideoPipeline};
pub use pool::{AllocError, FrameBuffer, FrameBufferPool, PLANE_ALIGNMENT, PlaneBuffer};

/// Errors surfaced by the video pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// A buffer layout failed validation.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// An aligned frame buffer could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
