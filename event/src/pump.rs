//! The dispatch pump: a single worker thread that serializes delivery.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender};

use crate::EventError;
use crate::decode::PlayerEvent;
use crate::registry::ListenerRegistry;

/// A single-consumer FIFO that delivers decoded events to listeners.
///
/// One dedicated worker thread pulls one event at a time, snapshots the
/// registry and invokes each listener in registration order, synchronously.
/// Only one event is in flight through listeners at any instant, so listeners
/// never observe concurrent deliveries from the same bridge.
pub(crate) struct DispatchPump {
    sender: Sender<PlayerEvent>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchPump {
    /// Spawn the pump thread for `registry`.
    pub(crate) fn spawn(registry: Arc<ListenerRegistry>) -> Result<Self, EventError> {
        let (sender, receiver) = async_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("playkit-event-pump".into())
            .spawn(move || run(&receiver, &registry))
            .map_err(EventError::PumpSpawn)?;
        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// A handle for enqueuing events from the native callback side.
    ///
    /// The queue is unbounded; the only failure mode of a send is a closed
    /// queue during teardown, in which case the event may be dropped (the
    /// bridge has already detached from the source by then).
    pub(crate) fn sender(&self) -> Sender<PlayerEvent> {
        self.sender.clone()
    }

    /// Close the queue and wait for the worker to drain and exit.
    pub(crate) fn shutdown(&mut self) {
        self.sender.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("event pump thread panicked");
            }
        }
    }
}

impl Drop for DispatchPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DispatchPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPump")
            .field("queued", &self.sender.len())
            .finish_non_exhaustive()
    }
}

/// Worker loop: drain events one at a time until the queue closes.
fn run(receiver: &Receiver<PlayerEvent>, registry: &ListenerRegistry) {
    while let Ok(event) = receiver.recv_blocking() {
        deliver(&event, registry);
    }
    log::trace!("event pump exiting");
}

/// Deliver one event to every listener in the current snapshot.
fn deliver(event: &PlayerEvent, registry: &ListenerRegistry) {
    for listener in registry.snapshot() {
        let call = panic::catch_unwind(AssertUnwindSafe(|| listener.notify(event)));
        if call.is_err() {
            // Isolated per listener: the pump continues with the next one.
            log::error!("listener panicked handling {event:?}; skipping");
        }
    }
}
