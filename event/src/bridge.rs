//! The bridge object tying a native event source to the dispatch pump.

use std::ffi::c_void;
use std::fmt;
use std::panic;
use std::sync::Arc;

use async_channel::Sender;

use crate::EventError;
use crate::decode::{self, PlayerEvent};
use crate::pump::DispatchPump;
use crate::raw::{AttachHandle, EventRange, EventSink, EventSource, RawEvent};
use crate::registry::{ListenerId, ListenerRegistry, PlayerEventListener};

/// State shared between the bridge and the foreign-function callback.
///
/// The callback receives a borrowed pointer to this struct as its opaque
/// context; the bridge keeps the owning `Arc` alive until after it has
/// detached from the source, so the pointer never dangles.
struct Shared {
    queue: Sender<PlayerEvent>,
}

impl Shared {
    /// Handle one raw event on the native thread: decode, copy out, enqueue.
    ///
    /// Runs in bounded time and never blocks or re-enters the engine.
    fn on_raw_event(&self, event: &RawEvent) {
        // Decoding is cheap, so events are decoded and queued even when no
        // listener is currently registered.
        match unsafe { decode::decode(event) } {
            Ok(decoded) => {
                if self.queue.try_send(decoded).is_err() {
                    log::trace!("event arrived during bridge teardown; dropped");
                }
            }
            Err(err) => log::warn!("dropping undecodable native event: {err}"),
        }
    }
}

/// The foreign-function entry point handed to the native event source.
///
/// # Safety
/// `event` must point to a record that stays valid for the duration of the
/// call, and `opaque` must be the pointer supplied at attach time.
unsafe extern "C" fn raw_event_callback(event: *const RawEvent, opaque: *mut c_void) {
    // Nothing may unwind across the foreign-function boundary.
    let caught = panic::catch_unwind(|| {
        if event.is_null() || opaque.is_null() {
            return;
        }
        let shared = unsafe { &*opaque.cast::<Shared>() };
        shared.on_raw_event(unsafe { &*event });
    });
    if caught.is_err() {
        log::error!("panic in native event callback suppressed");
    }
}

/// Safe, ordered delivery of native engine events to listeners.
///
/// On construction the bridge attaches exactly one callback for the player
/// event range and spawns its dispatch pump. On drop it detaches from the
/// source first, then drains and stops the pump, so no decoded-but-undelivered
/// callback can race freed state.
pub struct EventBridge {
    source: Arc<dyn EventSource>,
    attachment: Option<AttachHandle>,
    registry: Arc<ListenerRegistry>,
    pump: DispatchPump,
    shared: Arc<Shared>,
}

impl EventBridge {
    /// Attach to `source` and start the dispatch pump.
    ///
    /// # Errors
    /// Returns [`EventError::AttachFailed`] if the source rejects the
    /// registration, or [`EventError::PumpSpawn`] if the pump thread cannot
    /// be created. On either failure nothing stays registered.
    pub fn new(source: Arc<dyn EventSource>) -> Result<Self, EventError> {
        let registry = Arc::new(ListenerRegistry::new());
        let pump = DispatchPump::spawn(Arc::clone(&registry))?;
        let shared = Arc::new(Shared {
            queue: pump.sender(),
        });

        let sink = EventSink {
            callback: raw_event_callback,
            opaque: Arc::as_ptr(&shared).cast::<c_void>().cast_mut(),
        };
        // If attach fails the pump is torn down by drop before returning.
        let attachment = source.attach(EventRange::PLAYER, sink)?;

        Ok(Self {
            source,
            attachment: Some(attachment),
            registry,
            pump,
            shared,
        })
    }

    /// Register a listener. Events decoded from now on will reach it.
    pub fn add_listener(&self, listener: Arc<dyn PlayerEventListener>) -> ListenerId {
        self.registry.add(listener)
    }

    /// Remove a listener from future deliveries.
    ///
    /// An in-flight notification using an older snapshot is not interrupted.
    /// Returns whether the listener was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        // Detach before anything else is torn down: after this returns the
        // source no longer invokes the callback, so `shared` may be freed.
        if let Some(handle) = self.attachment.take() {
            self.source.detach(handle);
        }
        self.pump.shutdown();
        // `shared` and `registry` drop afterwards, in field order.
    }
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("attached", &self.attachment.is_some())
            .field("listeners", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawEventPayload, RawPosition, kind};
    use std::ptr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSource {
        sink: Mutex<Option<(EventRange, EventSink)>>,
        attaches: AtomicUsize,
        detaches: AtomicUsize,
    }

    impl EventSource for FakeSource {
        fn attach(&self, range: EventRange, sink: EventSink) -> Result<AttachHandle, EventError> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some((range, sink));
            Ok(AttachHandle::new(1))
        }

        fn detach(&self, _handle: AttachHandle) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = None;
        }
    }

    impl FakeSource {
        fn fire(&self, event: &RawEvent) {
            let guard = self.sink.lock().unwrap();
            if let Some((range, sink)) = guard.as_ref() {
                if range.contains(event.kind) {
                    unsafe { (sink.callback)(event, sink.opaque) };
                }
            }
        }
    }

    struct Collect {
        seen: Arc<Mutex<Vec<PlayerEvent>>>,
        done: mpsc::Sender<()>,
    }

    impl PlayerEventListener for Collect {
        fn notify(&self, event: &PlayerEvent) {
            self.seen.lock().unwrap().push(event.clone());
            let _ = self.done.send(());
        }
    }

    #[test]
    fn position_changed_reaches_listener_exactly_once() {
        let source = Arc::new(FakeSource::default());
        let bridge = EventBridge::new(Arc::clone(&source) as Arc<dyn EventSource>).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done, done_rx) = mpsc::channel();
        bridge.add_listener(Arc::new(Collect {
            seen: Arc::clone(&seen),
            done,
        }));

        source.fire(&RawEvent {
            kind: kind::POSITION_CHANGED,
            source: ptr::null_mut(),
            payload: RawEventPayload {
                position: RawPosition { position: 0.42 },
            },
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("event was not delivered");
        // Allow a hypothetical duplicate to surface before asserting.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![PlayerEvent::PositionChanged { position: 0.42 }]
        );
    }

    #[test]
    fn attaches_once_and_detaches_once_on_drop() {
        let source = Arc::new(FakeSource::default());
        let bridge = EventBridge::new(Arc::clone(&source) as Arc<dyn EventSource>).unwrap();
        assert_eq!(source.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(source.detaches.load(Ordering::SeqCst), 0);

        drop(bridge);
        assert_eq!(source.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(source.detaches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undecodable_events_are_dropped_without_crashing() {
        let source = Arc::new(FakeSource::default());
        let bridge = EventBridge::new(Arc::clone(&source) as Arc<dyn EventSource>).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done, done_rx) = mpsc::channel();
        bridge.add_listener(Arc::new(Collect {
            seen: Arc::clone(&seen),
            done,
        }));

        // Inside the attached range but with a null string payload.
        source.fire(&RawEvent {
            kind: kind::SNAPSHOT_TAKEN,
            source: ptr::null_mut(),
            payload: RawEventPayload { opaque: [0; 16] },
        });
        // A good event afterwards still comes through.
        source.fire(&RawEvent {
            kind: kind::PLAYING,
            source: ptr::null_mut(),
            payload: RawEventPayload { opaque: [0; 16] },
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("event was not delivered");
        assert_eq!(*seen.lock().unwrap(), vec![PlayerEvent::Playing]);
    }

    #[test]
    fn events_outside_the_range_are_never_delivered() {
        let source = Arc::new(FakeSource::default());
        let bridge = EventBridge::new(Arc::clone(&source) as Arc<dyn EventSource>).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done, _done_rx) = mpsc::channel();
        bridge.add_listener(Arc::new(Collect {
            seen: Arc::clone(&seen),
            done,
        }));

        source.fire(&RawEvent {
            kind: 0x5000,
            source: ptr::null_mut(),
            payload: RawEventPayload { opaque: [0; 16] },
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(seen.lock().unwrap().is_empty());
    }
}
