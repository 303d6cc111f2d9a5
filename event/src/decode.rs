//! Decoding raw tagged-union records into owned event values.

use std::ffi::{CStr, c_char};

use crate::raw::{RawEvent, kind};

/// Category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio stream.
    Audio,
    /// Video stream.
    Video,
    /// Subtitle or other text stream.
    Text,
    /// A category this bridge does not recognize.
    Unknown,
}

impl TrackKind {
    /// Map the native category code onto a track kind.
    #[must_use]
    pub const fn from_native(code: i32) -> Self {
        match code {
            0 => Self::Audio,
            1 => Self::Video,
            2 => Self::Text,
            _ => Self::Unknown,
        }
    }
}

/// An immutable, fully-owned media player event.
///
/// Every variant carries only owned values; no reference into native memory
/// survives decoding. Values are freely shareable across threads.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PlayerEvent {
    /// The player switched to a different media item.
    MediaChanged {
        /// MRL of the new media item.
        mrl: String,
    },
    /// The player started opening a media item.
    Opening,
    /// Stream cache fill level changed.
    Buffering {
        /// Fill level in percent, `0.0..=100.0`.
        cache: f32,
    },
    /// Playback started or resumed.
    Playing,
    /// Playback paused.
    Paused,
    /// Playback stopped.
    Stopped,
    /// Playback entered fast-forward.
    Forward,
    /// Playback entered rewind.
    Backward,
    /// The end of the media was reached.
    EndReached,
    /// The engine reported an unrecoverable playback error.
    Error,
    /// Playback time advanced.
    TimeChanged {
        /// New playback time in milliseconds.
        time: i64,
    },
    /// Playback position changed.
    PositionChanged {
        /// New position as a fraction of the media, `0.0..=1.0`.
        position: f32,
    },
    /// Seekability of the current media changed.
    SeekableChanged(bool),
    /// Pausability of the current media changed.
    PausableChanged(bool),
    /// A different title was selected.
    TitleSelectionChanged {
        /// Index of the new title.
        title: i32,
    },
    /// A snapshot was written to disk.
    SnapshotTaken {
        /// Filesystem path of the snapshot.
        path: String,
    },
    /// The media length estimate changed.
    LengthChanged {
        /// New length in milliseconds.
        length: i64,
    },
    /// The number of active video outputs changed.
    VideoOutputChanged {
        /// New output count.
        count: i32,
    },
    /// An elementary stream was added.
    TrackAdded {
        /// Stream category.
        kind: TrackKind,
        /// Engine-assigned track identifier.
        id: i32,
    },
    /// An elementary stream was deleted.
    TrackDeleted {
        /// Stream category.
        kind: TrackKind,
        /// Engine-assigned track identifier.
        id: i32,
    },
    /// An elementary stream was selected.
    TrackSelected {
        /// Stream category.
        kind: TrackKind,
        /// Engine-assigned track identifier.
        id: i32,
    },
    /// Audio output was corked by the system.
    Corked,
    /// Audio output was uncorked.
    Uncorked,
    /// Audio was muted.
    Muted,
    /// Audio was unmuted.
    Unmuted,
    /// Audio volume changed.
    VolumeChanged {
        /// New software volume, `0.0..=1.0`.
        volume: f32,
    },
    /// The audio output device changed.
    AudioDeviceChanged {
        /// Identifier of the new output device.
        device: String,
    },
    /// A different chapter was selected.
    ChapterChanged {
        /// Index of the new chapter.
        chapter: i32,
    },
}

/// Why a raw event record could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The type tag does not match any supported event kind.
    #[error("unknown event kind 0x{0:x}")]
    UnknownKind(u32),
    /// A payload string pointer was null.
    #[error("null payload pointer in event kind 0x{kind:x}")]
    NullPayload {
        /// Tag of the offending event.
        kind: u32,
    },
}

/// Copy a native-owned C string into owned storage.
unsafe fn copy_string(ptr: *const c_char, kind: u32) -> Result<String, DecodeError> {
    if ptr.is_null() {
        return Err(DecodeError::NullPayload { kind });
    }
    // Invalid UTF-8 from the engine is replaced, not rejected.
    Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Decode a raw tagged-union record into an owned [`PlayerEvent`].
///
/// Must be called while the record is still valid, i.e. from inside the
/// native callback that delivered it. All native-owned strings are copied
/// before this function returns.
///
/// # Errors
/// Returns [`DecodeError`] for an unknown tag or a null payload pointer.
/// Decode failures are recoverable: the caller logs and drops the event.
///
/// # Safety
/// `event.kind` must correctly select the live union field, per the native
/// ABI contract documented on [`crate::raw::RawEventPayload`].
pub unsafe fn decode(event: &RawEvent) -> Result<PlayerEvent, DecodeError> {
    let p = &event.payload;
    // Only the field selected by the tag is read.
    let decoded = unsafe {
        match event.kind {
            kind::MEDIA_CHANGED => PlayerEvent::MediaChanged {
                mrl: copy_string(p.media_changed.mrl, event.kind)?,
            },
            kind::OPENING => PlayerEvent::Opening,
            kind::BUFFERING => PlayerEvent::Buffering {
                cache: p.buffering.cache,
            },
            kind::PLAYING => PlayerEvent::Playing,
            kind::PAUSED => PlayerEvent::Paused,
            kind::STOPPED => PlayerEvent::Stopped,
            kind::FORWARD => PlayerEvent::Forward,
            kind::BACKWARD => PlayerEvent::Backward,
            kind::END_REACHED => PlayerEvent::EndReached,
            kind::ENCOUNTERED_ERROR => PlayerEvent::Error,
            kind::TIME_CHANGED => PlayerEvent::TimeChanged {
                time: p.time.millis,
            },
            kind::POSITION_CHANGED => PlayerEvent::PositionChanged {
                position: p.position.position,
            },
            kind::SEEKABLE_CHANGED => PlayerEvent::SeekableChanged(p.flag.value != 0),
            kind::PAUSABLE_CHANGED => PlayerEvent::PausableChanged(p.flag.value != 0),
            kind::TITLE_SELECTION_CHANGED => PlayerEvent::TitleSelectionChanged {
                title: p.index.value,
            },
            kind::SNAPSHOT_TAKEN => PlayerEvent::SnapshotTaken {
                path: copy_string(p.snapshot.path, event.kind)?,
            },
            kind::LENGTH_CHANGED => PlayerEvent::LengthChanged {
                length: p.time.millis,
            },
            kind::VOUT_CHANGED => PlayerEvent::VideoOutputChanged {
                count: p.index.value,
            },
            kind::ES_ADDED => PlayerEvent::TrackAdded {
                kind: TrackKind::from_native(p.track.kind),
                id: p.track.id,
            },
            kind::ES_DELETED => PlayerEvent::TrackDeleted {
                kind: TrackKind::from_native(p.track.kind),
                id: p.track.id,
            },
            kind::ES_SELECTED => PlayerEvent::TrackSelected {
                kind: TrackKind::from_native(p.track.kind),
                id: p.track.id,
            },
            kind::CORKED => PlayerEvent::Corked,
            kind::UNCORKED => PlayerEvent::Uncorked,
            kind::MUTED => PlayerEvent::Muted,
            kind::UNMUTED => PlayerEvent::Unmuted,
            kind::AUDIO_VOLUME => PlayerEvent::VolumeChanged {
                volume: p.volume.volume,
            },
            kind::AUDIO_DEVICE => PlayerEvent::AudioDeviceChanged {
                device: copy_string(p.audio_device.device, event.kind)?,
            },
            kind::CHAPTER_CHANGED => PlayerEvent::ChapterChanged {
                chapter: p.index.value,
            },
            other => return Err(DecodeError::UnknownKind(other)),
        }
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawEventPayload, RawPosition, RawSnapshot, RawTrack};
    use std::ffi::CString;
    use std::ptr;

    fn event(kind: u32, payload: RawEventPayload) -> RawEvent {
        RawEvent {
            kind,
            source: ptr::null_mut(),
            payload,
        }
    }

    #[test]
    fn decodes_position_changed() {
        let raw = event(
            kind::POSITION_CHANGED,
            RawEventPayload {
                position: RawPosition { position: 0.42 },
            },
        );
        let decoded = unsafe { decode(&raw) }.unwrap();
        assert_eq!(decoded, PlayerEvent::PositionChanged { position: 0.42 });
    }

    #[test]
    fn copies_native_string_out() {
        let path = CString::new("/tmp/snap.png").unwrap();
        let raw = event(
            kind::SNAPSHOT_TAKEN,
            RawEventPayload {
                snapshot: RawSnapshot { path: path.as_ptr() },
            },
        );
        let decoded = unsafe { decode(&raw) }.unwrap();
        // The CString can be freed now; the decoded event owns its copy.
        drop(path);
        assert_eq!(
            decoded,
            PlayerEvent::SnapshotTaken {
                path: "/tmp/snap.png".into()
            }
        );
    }

    #[test]
    fn null_string_is_a_decode_error() {
        let raw = event(
            kind::SNAPSHOT_TAKEN,
            RawEventPayload {
                snapshot: RawSnapshot { path: ptr::null() },
            },
        );
        assert_eq!(
            unsafe { decode(&raw) },
            Err(DecodeError::NullPayload {
                kind: kind::SNAPSHOT_TAKEN
            })
        );
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let raw = event(0xDEAD, RawEventPayload { opaque: [0; 16] });
        assert_eq!(unsafe { decode(&raw) }, Err(DecodeError::UnknownKind(0xDEAD)));
    }

    #[test]
    fn decodes_track_events() {
        let raw = event(
            kind::ES_ADDED,
            RawEventPayload {
                track: RawTrack { kind: 1, id: 7 },
            },
        );
        assert_eq!(
            unsafe { decode(&raw) }.unwrap(),
            PlayerEvent::TrackAdded {
                kind: TrackKind::Video,
                id: 7
            }
        );
    }
}
