//! The video pipeline: negotiation, allocation and the render cycle glued
//! together behind the engine's callback table.

use std::ffi::c_void;
use std::fmt;
use std::panic;
use std::sync::{Arc, Mutex};

use crate::SurfaceError;
use crate::cycle::{CycleState, RenderCallback, RenderCycle};
use crate::format::{BufferFormat, FormatNegotiator, SizingPolicy};
use crate::pool::FrameBufferPool;

/// One attached video surface: format negotiation, the frame buffer pool and
/// the per-frame render cycle.
///
/// All entry points take `&self` and are safe to invoke from the engine's
/// threads; the pipeline is the opaque object behind the callback table
/// returned by [`callbacks`](Self::callbacks).
pub struct VideoPipeline {
    negotiator: FormatNegotiator,
    pool: Mutex<FrameBufferPool>,
    cycle: RenderCycle,
    render: Box<dyn RenderCallback>,
    format: Mutex<Option<BufferFormat>>,
}

impl VideoPipeline {
    /// Build a pipeline from the application's collaborators.
    ///
    /// `pin_memory` requests page-locking of every allocated plane; pinning
    /// failures degrade to unpinned memory.
    #[must_use]
    pub fn new(
        policy: Box<dyn SizingPolicy>,
        render: Box<dyn RenderCallback>,
        pin_memory: bool,
    ) -> Self {
        Self {
            negotiator: FormatNegotiator::new(policy),
            pool: Mutex::new(FrameBufferPool::new(pin_memory)),
            cycle: RenderCycle::new(),
            render,
            format: Mutex::new(None),
        }
    }

    /// Negotiate a layout for the reported source size and (re)allocate.
    ///
    /// Called by the engine once per format change. Any previously allocated
    /// buffer is retired, not freed: it survives until [`cleanup`] fires for
    /// the old format.
    ///
    /// [`cleanup`]: Self::cleanup
    ///
    /// # Errors
    /// Returns [`SurfaceError::Alloc`] if the negotiated layout cannot be
    /// allocated; playback cannot proceed without a frame buffer.
    pub fn configure(
        &self,
        source_width: u32,
        source_height: u32,
    ) -> Result<BufferFormat, SurfaceError> {
        let format = self.negotiator.negotiate(source_width, source_height);
        self.lock_pool().allocate(&format)?;
        *self.lock_format() = Some(format.clone());
        log::debug!(
            "negotiated {} {}x{} ({} planes)",
            format.chroma(),
            format.width(),
            format.height(),
            format.plane_count()
        );
        Ok(format)
    }

    /// Writer side of the render cycle: block until the buffer is free and
    /// return the writable plane addresses for the native decoder.
    ///
    /// Returns an empty list if no buffer is configured, which the callback
    /// table reports to the engine as a lock failure.
    pub fn lock(&self) -> Vec<*mut u8> {
        self.cycle.lock();
        self.lock_pool()
            .current_mut()
            .map(super::pool::FrameBuffer::plane_ptrs)
            .unwrap_or_else(|| {
                log::error!("lock invoked with no frame buffer configured");
                Vec::new()
            })
    }

    /// Writer side: the decoder finished writing the frame.
    pub fn unlock(&self) {
        self.cycle.unlock();
    }

    /// Deliver the finished frame to the application render callback.
    ///
    /// Runs synchronously on the calling (engine) thread; panics in the
    /// callback are caught and logged and the cycle still returns to idle.
    pub fn display(&self) {
        let Some(format) = self.lock_format().clone() else {
            log::error!("display invoked with no frame buffer configured");
            return;
        };
        // Plane addresses stay valid without holding the pool lock: a
        // concurrent format change retires the buffer instead of freeing it.
        let planes: Vec<*const u8> = self
            .lock_pool()
            .current()
            .map(super::pool::FrameBuffer::plane_ptrs_const)
            .unwrap_or_default();
        self.cycle.display(self.render.as_ref(), &planes, &format);
    }

    /// Engine cleanup hook: the engine is done with the previous format.
    ///
    /// After a format change this releases the retired buffers; on surface
    /// detach (no retired buffers pending) it frees the active buffer.
    pub fn cleanup(&self) {
        self.cycle.reset();
        let mut pool = self.lock_pool();
        if pool.retired_count() > 0 {
            pool.release_retired();
        } else {
            pool.free();
            *self.lock_format() = None;
        }
    }

    /// The currently negotiated layout, if any.
    #[must_use]
    pub fn format(&self) -> Option<BufferFormat> {
        self.lock_format().clone()
    }

    /// Current render cycle state.
    #[must_use]
    pub fn cycle_state(&self) -> CycleState {
        self.cycle.state()
    }

    /// The engine-facing callback table for this pipeline.
    ///
    /// The pipeline must outlive every use of the returned table: the opaque
    /// pointer borrows from `self`, and the engine must be told to stop
    /// invoking the callbacks (surface detach) before the `Arc` is dropped.
    #[must_use]
    pub fn callbacks(self: &Arc<Self>) -> SurfaceCallbacks {
        SurfaceCallbacks {
            setup: raw_setup,
            lock: raw_lock,
            unlock: raw_unlock,
            display: raw_display,
            cleanup: raw_cleanup,
            opaque: Arc::as_ptr(self).cast::<c_void>().cast_mut(),
        }
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, FrameBufferPool> {
        self.pool
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_format(&self) -> std::sync::MutexGuard<'_, Option<BufferFormat>> {
        self.format
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for VideoPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoPipeline")
            .field("format", &self.format())
            .field("cycle", &self.cycle_state())
            .finish_non_exhaustive()
    }
}

/// The engine-facing callback table, vmem style.
///
/// Every function pointer expects `opaque` to be the pointer stored in this
/// table. No callback ever lets a panic unwind back into the engine.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SurfaceCallbacks {
    /// Format negotiation: reads the source size from `width`/`height`,
    /// writes the negotiated layout into all five out-parameters and returns
    /// the plane count, or 0 on a hard failure.
    pub setup: unsafe extern "C" fn(
        opaque: *mut c_void,
        chroma: *mut u8,
        width: *mut u32,
        height: *mut u32,
        pitches: *mut u32,
        lines: *mut u32,
    ) -> u32,
    /// Pre-write hook: fills `planes` with writable plane base addresses.
    pub lock: unsafe extern "C" fn(opaque: *mut c_void, planes: *mut *mut u8),
    /// Post-write hook.
    pub unlock: unsafe extern "C" fn(opaque: *mut c_void),
    /// Frame-ready hook.
    pub display: unsafe extern "C" fn(opaque: *mut c_void),
    /// Old-format teardown hook.
    pub cleanup: unsafe extern "C" fn(opaque: *mut c_void),
    /// Pointer to the owning [`VideoPipeline`].
    pub opaque: *mut c_void,
}

// The opaque pointer targets a Sync pipeline shared with the engine.
unsafe impl Send for SurfaceCallbacks {}

fn with_pipeline<R>(opaque: *mut c_void, default: R, f: impl FnOnce(&VideoPipeline) -> R) -> R {
    if opaque.is_null() {
        return default;
    }
    let pipeline = unsafe { &*opaque.cast::<VideoPipeline>() };
    // Nothing may unwind across the foreign-function boundary.
    match panic::catch_unwind(panic::AssertUnwindSafe(|| f(pipeline))) {
        Ok(value) => value,
        Err(_) => {
            log::error!("panic in video surface callback suppressed");
            default
        }
    }
}

unsafe extern "C" fn raw_setup(
    opaque: *mut c_void,
    chroma: *mut u8,
    width: *mut u32,
    height: *mut u32,
    pitches: *mut u32,
    lines: *mut u32,
) -> u32 {
    with_pipeline(opaque, 0, |pipeline| {
        let (source_width, source_height) = unsafe { (*width, *height) };
        match pipeline.configure(source_width, source_height) {
            Ok(format) => {
                unsafe {
                    format.write_to_native(chroma.cast::<[u8; 4]>(), width, height, pitches, lines);
                }
                u32::try_from(format.plane_count()).unwrap_or(0)
            }
            Err(err) => {
                log::error!("format negotiation failed: {err}");
                0
            }
        }
    })
}

unsafe extern "C" fn raw_lock(opaque: *mut c_void, planes: *mut *mut u8) {
    with_pipeline(opaque, (), |pipeline| {
        let ptrs = pipeline.lock();
        for (i, ptr) in ptrs.into_iter().enumerate() {
            unsafe { *planes.add(i) = ptr };
        }
    });
}

unsafe extern "C" fn raw_unlock(opaque: *mut c_void) {
    with_pipeline(opaque, (), VideoPipeline::unlock);
}

unsafe extern "C" fn raw_display(opaque: *mut c_void) {
    with_pipeline(opaque, (), VideoPipeline::display);
}

unsafe extern "C" fn raw_cleanup(opaque: *mut c_void) {
    with_pipeline(opaque, (), VideoPipeline::cleanup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatError, FourCc, MAX_PLANES, SourceSizePolicy};
    use crate::pool::PLANE_ALIGNMENT;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRender {
        frames: AtomicUsize,
        planes_seen: AtomicUsize,
    }

    impl RenderCallback for CountingRender {
        fn on_frame(&self, planes: &[*const u8], _format: &BufferFormat) {
            self.frames.fetch_add(1, Ordering::SeqCst);
            self.planes_seen.store(planes.len(), Ordering::SeqCst);
        }
    }

    fn pipeline_with(render: Box<dyn RenderCallback>) -> VideoPipeline {
        VideoPipeline::new(Box::new(SourceSizePolicy), render, false)
    }

    #[test]
    fn configure_then_full_frame_cycle() {
        let render = Arc::new(CountingRender::default());
        let pipeline = pipeline_with(Box::new(SharedRender(Arc::clone(&render))));

        let format = pipeline.configure(640, 480).unwrap();
        assert_eq!(format.plane_count(), 1);

        let planes = pipeline.lock();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0] as usize % PLANE_ALIGNMENT, 0);
        pipeline.unlock();
        pipeline.display();

        assert_eq!(pipeline.cycle_state(), CycleState::Idle);
        assert_eq!(render.frames.load(Ordering::SeqCst), 1);
        assert_eq!(render.planes_seen.load(Ordering::SeqCst), 1);
    }

    struct SharedRender(Arc<CountingRender>);

    impl RenderCallback for SharedRender {
        fn on_frame(&self, planes: &[*const u8], format: &BufferFormat) {
            self.0.on_frame(planes, format);
        }
    }

    #[test]
    fn zero_source_configures_nonzero_buffer() {
        let pipeline = pipeline_with(Box::new(CountingRender::default()));
        let format = pipeline.configure(0, 0).unwrap();
        assert!(format.width() >= 1 && format.height() >= 1);
        assert!(pipeline.lock().iter().all(|p| !p.is_null()));
        pipeline.unlock();
        pipeline.display();
    }

    #[test]
    fn format_change_keeps_old_buffers_until_cleanup() {
        let pipeline = pipeline_with(Box::new(CountingRender::default()));
        pipeline.configure(320, 240).unwrap();
        let old_planes = pipeline.lock();
        pipeline.unlock();
        pipeline.display();

        // Resolution change: old plane memory must remain valid.
        pipeline.configure(640, 480).unwrap();
        unsafe { old_planes[0].write_volatile(0xFF) };

        // The engine acknowledges the old format; now it may be freed.
        pipeline.cleanup();
        assert!(pipeline.format().is_some());
        assert_eq!(pipeline.format().unwrap().width(), 640);
    }

    #[test]
    fn detach_cleanup_frees_the_surface() {
        let pipeline = pipeline_with(Box::new(CountingRender::default()));
        pipeline.configure(320, 240).unwrap();
        pipeline.cleanup();
        assert!(pipeline.format().is_none());
    }

    struct TriPlanePolicy;

    impl SizingPolicy for TriPlanePolicy {
        fn choose_format(&self, w: u32, h: u32) -> Result<BufferFormat, FormatError> {
            BufferFormat::new(
                FourCc::I420,
                w,
                h,
                vec![w, w.div_ceil(2), w.div_ceil(2)],
                vec![h, h.div_ceil(2), h.div_ceil(2)],
            )
        }
    }

    #[test]
    fn callback_table_round_trip() {
        let pipeline = Arc::new(VideoPipeline::new(
            Box::new(TriPlanePolicy),
            Box::new(CountingRender::default()),
            false,
        ));
        let callbacks = pipeline.callbacks();

        let mut chroma = [0u8; 4];
        let mut width = 640u32;
        let mut height = 480u32;
        let mut pitches = [0u32; MAX_PLANES];
        let mut lines = [0u32; MAX_PLANES];
        let plane_count = unsafe {
            (callbacks.setup)(
                callbacks.opaque,
                chroma.as_mut_ptr(),
                &raw mut width,
                &raw mut height,
                pitches.as_mut_ptr(),
                lines.as_mut_ptr(),
            )
        };
        assert_eq!(plane_count, 3);
        assert_eq!(&chroma, b"I420");
        assert_eq!(pitches[0], 640);
        assert_eq!(lines[1], 240);

        let mut planes = [std::ptr::null_mut::<u8>(); MAX_PLANES];
        unsafe {
            (callbacks.lock)(callbacks.opaque, planes.as_mut_ptr());
            (callbacks.unlock)(callbacks.opaque);
            (callbacks.display)(callbacks.opaque);
            (callbacks.cleanup)(callbacks.opaque);
        }
        assert!(!planes[0].is_null());
        assert_eq!(planes[0] as usize % PLANE_ALIGNMENT, 0);
        assert_eq!(pipeline.cycle_state(), CycleState::Idle);
    }
}
