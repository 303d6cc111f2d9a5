//! Raw native event records and the event source contract.
//!
//! Everything in this module mirrors the native engine's ABI. A [`RawEvent`]
//! is only valid for the duration of the callback that delivered it; reading
//! it after the callback returns is undefined behavior, which is why the
//! decoder copies every referenced payload before returning.

use std::ffi::{c_char, c_void};
use std::fmt;

/// Numeric event type tags, as emitted by the native engine.
///
/// Player events occupy a contiguous range starting at `0x100`; the bridge
/// attaches a single callback for the whole range.
pub mod kind {
    /// The player switched to a different media item.
    pub const MEDIA_CHANGED: u32 = 0x100;
    /// The player started opening a media item.
    pub const OPENING: u32 = 0x101;
    /// Stream cache fill level changed.
    pub const BUFFERING: u32 = 0x102;
    /// Playback started or resumed.
    pub const PLAYING: u32 = 0x103;
    /// Playback paused.
    pub const PAUSED: u32 = 0x104;
    /// Playback stopped.
    pub const STOPPED: u32 = 0x105;
    /// Playback entered fast-forward.
    pub const FORWARD: u32 = 0x106;
    /// Playback entered rewind.
    pub const BACKWARD: u32 = 0x107;
    /// The end of the media was reached.
    pub const END_REACHED: u32 = 0x108;
    /// The engine encountered an unrecoverable playback error.
    pub const ENCOUNTERED_ERROR: u32 = 0x109;
    /// Playback time advanced.
    pub const TIME_CHANGED: u32 = 0x10A;
    /// Playback position (fraction of the media) changed.
    pub const POSITION_CHANGED: u32 = 0x10B;
    /// Seekability of the current media changed.
    pub const SEEKABLE_CHANGED: u32 = 0x10C;
    /// Pausability of the current media changed.
    pub const PAUSABLE_CHANGED: u32 = 0x10D;
    /// A different title was selected.
    pub const TITLE_SELECTION_CHANGED: u32 = 0x10E;
    /// A snapshot was written to disk.
    pub const SNAPSHOT_TAKEN: u32 = 0x10F;
    /// The media length estimate changed.
    pub const LENGTH_CHANGED: u32 = 0x110;
    /// The number of active video outputs changed.
    pub const VOUT_CHANGED: u32 = 0x111;
    /// An elementary stream was added.
    pub const ES_ADDED: u32 = 0x112;
    /// An elementary stream was deleted.
    pub const ES_DELETED: u32 = 0x113;
    /// An elementary stream was selected.
    pub const ES_SELECTED: u32 = 0x114;
    /// Audio output was corked by the system.
    pub const CORKED: u32 = 0x115;
    /// Audio output was uncorked.
    pub const UNCORKED: u32 = 0x116;
    /// Audio was muted.
    pub const MUTED: u32 = 0x117;
    /// Audio was unmuted.
    pub const UNMUTED: u32 = 0x118;
    /// Audio volume changed.
    pub const AUDIO_VOLUME: u32 = 0x119;
    /// The audio output device changed.
    pub const AUDIO_DEVICE: u32 = 0x11A;
    /// A different chapter was selected.
    pub const CHAPTER_CHANGED: u32 = 0x11B;
}

/// Payload for [`kind::MEDIA_CHANGED`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMediaChanged {
    /// MRL of the new media item, a native-owned C string.
    pub mrl: *const c_char,
}

/// Payload for [`kind::BUFFERING`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBuffering {
    /// Cache fill level in percent, `0.0..=100.0`.
    pub cache: f32,
}

/// Payload for [`kind::TIME_CHANGED`] and [`kind::LENGTH_CHANGED`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawTime {
    /// Time value in milliseconds.
    pub millis: i64,
}

/// Payload for [`kind::POSITION_CHANGED`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPosition {
    /// Position as a fraction of the media, `0.0..=1.0`.
    pub position: f32,
}

/// Payload for boolean state changes (seekable, pausable).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFlag {
    /// Non-zero means enabled.
    pub value: i32,
}

/// Payload carrying a single native index (title, chapter, vout count).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawIndex {
    /// The new index or count.
    pub value: i32,
}

/// Payload for [`kind::SNAPSHOT_TAKEN`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSnapshot {
    /// Filesystem path of the snapshot, a native-owned C string.
    pub path: *const c_char,
}

/// Payload for elementary stream events.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawTrack {
    /// Native track category code.
    pub kind: i32,
    /// Engine-assigned track identifier.
    pub id: i32,
}

/// Payload for [`kind::AUDIO_VOLUME`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawVolume {
    /// Software volume, `0.0..=1.0`.
    pub volume: f32,
}

/// Payload for [`kind::AUDIO_DEVICE`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAudioDevice {
    /// Identifier of the new output device, a native-owned C string.
    pub device: *const c_char,
}

/// The type-dependent payload region of a [`RawEvent`].
///
/// Which field is live is selected by [`RawEvent::kind`]; reading any other
/// field is undefined behavior. Events without a payload (playing, paused,
/// corked, ...) leave the union uninitialized and it must not be read.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawEventPayload {
    /// Live for [`kind::MEDIA_CHANGED`].
    pub media_changed: RawMediaChanged,
    /// Live for [`kind::BUFFERING`].
    pub buffering: RawBuffering,
    /// Live for [`kind::TIME_CHANGED`] and [`kind::LENGTH_CHANGED`].
    pub time: RawTime,
    /// Live for [`kind::POSITION_CHANGED`].
    pub position: RawPosition,
    /// Live for [`kind::SEEKABLE_CHANGED`] and [`kind::PAUSABLE_CHANGED`].
    pub flag: RawFlag,
    /// Live for title, chapter and vout-count events.
    pub index: RawIndex,
    /// Live for [`kind::SNAPSHOT_TAKEN`].
    pub snapshot: RawSnapshot,
    /// Live for [`kind::ES_ADDED`], [`kind::ES_DELETED`], [`kind::ES_SELECTED`].
    pub track: RawTrack,
    /// Live for [`kind::AUDIO_VOLUME`].
    pub volume: RawVolume,
    /// Live for [`kind::AUDIO_DEVICE`].
    pub audio_device: RawAudioDevice,
    /// Uninterpreted view of the payload region.
    pub opaque: [u8; 16],
}

impl fmt::Debug for RawEventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawEventPayload { .. }")
    }
}

/// A tagged-union event record as delivered by the native engine.
///
/// Native-owned; valid only while the delivering callback is on the stack.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    /// Numeric type tag, one of the [`kind`] constants.
    pub kind: u32,
    /// Opaque pointer to the emitting native object. Never dereferenced.
    pub source: *mut c_void,
    /// Type-dependent payload, selected by `kind`.
    pub payload: RawEventPayload,
}

/// An inclusive range of event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRange {
    /// First tag in the range.
    pub first: u32,
    /// Last tag in the range, inclusive.
    pub last: u32,
}

impl EventRange {
    /// The full player event range the bridge subscribes to.
    pub const PLAYER: Self = Self {
        first: kind::MEDIA_CHANGED,
        last: kind::CHAPTER_CHANGED,
    };

    /// Whether `kind` falls inside this range.
    #[must_use]
    pub const fn contains(&self, kind: u32) -> bool {
        self.first <= kind && kind <= self.last
    }
}

/// The foreign-function entry point invoked by the native engine.
///
/// # Safety
/// The engine must pass a valid `event` pointer that stays valid for the
/// duration of the call, and the `opaque` pointer it was given at attach
/// time, unchanged.
pub type RawEventCallback = unsafe extern "C" fn(event: *const RawEvent, opaque: *mut c_void);

/// A callback plus its opaque context, handed to an [`EventSource`] on attach.
#[derive(Debug, Clone, Copy)]
pub struct EventSink {
    /// The foreign-function entry point.
    pub callback: RawEventCallback,
    /// Context pointer passed back verbatim on every delivery.
    pub opaque: *mut c_void,
}

// The opaque pointer is only ever handed back to the callback; the sink
// itself carries no state that could be raced.
unsafe impl Send for EventSink {}

/// Token returned by [`EventSource::attach`], required for detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachHandle(u64);

impl AttachHandle {
    /// Wrap a source-defined registration token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The source-defined registration token.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A native event source the bridge can subscribe to.
///
/// Implementations wrap the engine's attach/detach entry points; the engine
/// delivers [`RawEvent`]s to the sink synchronously on its own threads.
pub trait EventSource: Send + Sync {
    /// Attach `sink` for every event whose tag falls in `range`.
    ///
    /// # Errors
    /// Returns [`crate::EventError::AttachFailed`] if the native registration
    /// is rejected.
    fn attach(&self, range: EventRange, sink: EventSink) -> Result<AttachHandle, crate::EventError>;

    /// Detach a previously attached sink.
    ///
    /// After this returns the source must no longer invoke the sink.
    fn detach(&self, handle: AttachHandle);
}
