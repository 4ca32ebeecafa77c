//! Capture session: ties the camera, canvas, pipeline, renderer and store together.
//!
//! A capture always runs draw -> detect -> estimate -> annotate -> record.
//! Captures are serialized on the canvas lock, so overlapping calls queue
//! instead of racing on shared pixels. Camera work (open, frame reads) and
//! inference run on the blocking pool.
//!
//! The live stream follows the store's `is_active` flag: active means a stream
//! is held, inactive means it has been released. [`CaptureSession::follow_store`]
//! keeps that true for actions dispatched by other store owners.

use crate::annotate::annotate;
use crate::canvas::Canvas;
use crate::error::{CaptureError, ErrorPolicy};
use crate::pipeline::DetectionPipeline;
use crate::source::{decode_upload, CameraDevice, LiveStream, SourceError, StreamConstraints};
use crate::store::{CaptureAction, CaptureStore};
use crate::types::CapturedRecord;
use chrono::Utc;
use image::RgbaImage;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

type StreamSlot = Option<Box<dyn LiveStream>>;

pub struct CaptureSession {
    store: Arc<CaptureStore>,
    pipeline: DetectionPipeline,
    stream: Arc<StreamControl>,
    canvas: tokio::sync::Mutex<Canvas>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

/// The camera and the stream it handed out.
///
/// The slot lock is held across acquisition and frame reads, so a release
/// waits for an in-flight read instead of racing it.
struct StreamControl {
    camera: Arc<dyn CameraDevice>,
    constraints: StreamConstraints,
    slot: tokio::sync::Mutex<StreamSlot>,
}

impl StreamControl {
    /// Acquire when active without a stream, release when inactive with one.
    async fn reconcile(&self, store: &CaptureStore) -> Result<(), CaptureError> {
        let mut slot = self.slot.lock().await;
        if !store.is_active() {
            release(&mut slot);
            return Ok(());
        }
        if slot.is_some() {
            return Ok(());
        }

        let camera = Arc::clone(&self.camera);
        let constraints = self.constraints;
        let acquired = tokio::task::spawn_blocking(move || camera.acquire(&constraints))
            .await
            .unwrap_or_else(|e| Err(SourceError::Acquire(format!("acquire task: {e}"))));

        let mut stream = acquired.map_err(CaptureError::DeviceAccessDenied)?;
        if store.is_active() {
            *slot = Some(stream);
            tracing::info!(
                width = constraints.ideal_width,
                height = constraints.ideal_height,
                fps = constraints.frame_rate,
                "webcam stream started"
            );
        } else {
            // Stopped while the camera was opening.
            stream.stop();
        }
        Ok(())
    }

    /// Reconcile, applying the error policy to acquisition failures.
    async fn sync_with(&self, store: &CaptureStore) {
        if let Err(err) = self.reconcile(store).await {
            tracing::error!(error = %err, "error accessing webcam");
            if err.policy() == ErrorPolicy::ResetActive {
                store.dispatch(CaptureAction::Stop);
            }
        }
    }

    /// Next frame from the held stream; `None` when capture is not active.
    async fn read_frame(&self, store: &CaptureStore) -> Result<Option<RgbaImage>, CaptureError> {
        let mut slot = self.slot.lock().await;
        if !store.is_active() {
            release(&mut slot);
            return Ok(None);
        }
        let Some(mut stream) = slot.take() else {
            return Ok(None);
        };

        let (stream, frame) = tokio::task::spawn_blocking(move || {
            let frame = stream.read_frame();
            (stream, frame)
        })
        .await
        .map_err(|e| {
            CaptureError::FrameCaptureFailed(SourceError::Read(format!("frame task: {e}")))
        })?;
        *slot = Some(stream);

        frame.map(Some).map_err(CaptureError::FrameCaptureFailed)
    }
}

/// Release every hardware track, then drop the stream. No-op without a stream.
fn release(slot: &mut StreamSlot) {
    if let Some(mut stream) = slot.take() {
        stream.stop();
        tracing::info!("webcam stream released");
    }
}

impl CaptureSession {
    pub fn new(
        store: Arc<CaptureStore>,
        pipeline: DetectionPipeline,
        camera: Arc<dyn CameraDevice>,
    ) -> Self {
        Self {
            store,
            pipeline,
            stream: Arc::new(StreamControl {
                camera,
                constraints: StreamConstraints::default(),
                slot: tokio::sync::Mutex::new(None),
            }),
            canvas: tokio::sync::Mutex::new(Canvas::new()),
            follower: Mutex::new(None),
        }
    }

    /// Must be called before the session is shared or followed.
    pub fn with_constraints(mut self, constraints: StreamConstraints) -> Self {
        self.stream = Arc::new(StreamControl {
            camera: Arc::clone(&self.stream.camera),
            constraints,
            slot: tokio::sync::Mutex::new(None),
        });
        self
    }

    pub fn with_canvas(mut self, canvas: Canvas) -> Self {
        self.canvas = tokio::sync::Mutex::new(canvas);
        self
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub fn pipeline(&self) -> &DetectionPipeline {
        &self.pipeline
    }

    pub async fn has_stream(&self) -> bool {
        self.stream.slot.lock().await.is_some()
    }

    /// Acquire or release the stream whenever anyone dispatches to the store.
    ///
    /// Runs until the session is dropped. Calling it again replaces the
    /// previous follower. Requires a tokio runtime.
    pub fn follow_store(&self) {
        let control = Arc::clone(&self.stream);
        let store = Arc::clone(&self.store);
        let mut changes = store.subscribe();

        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                control.sync_with(&store).await;
            }
        });

        if let Some(previous) = self.follower_slot().replace(task) {
            previous.abort();
        }
    }

    /// Mark capture active and make sure a stream is held.
    ///
    /// Acquisition failures are logged and flip the state back to inactive.
    pub async fn start_webcam(&self) {
        self.store.dispatch(CaptureAction::Start);
        self.stream.sync_with(&self.store).await;
    }

    /// Mark capture inactive and release the camera.
    pub async fn stop_webcam(&self) {
        self.store.dispatch(CaptureAction::Stop);
        self.stream.sync_with(&self.store).await;
    }

    pub async fn toggle_webcam(&self) {
        if self.store.is_active() {
            self.stop_webcam().await;
        } else {
            self.start_webcam().await;
        }
    }

    /// Release the stream without touching the store. No-op without a stream.
    pub async fn stop_stream(&self) {
        release(&mut *self.stream.slot.lock().await);
    }

    /// Capture the current live frame. Returns `None` when no stream is running.
    pub async fn capture(&self) -> Result<Option<Arc<CapturedRecord>>, CaptureError> {
        let mut canvas = self.canvas.lock().await;
        let Some(frame) = self.stream.read_frame(&self.store).await? else {
            tracing::debug!("capture requested without an active stream");
            return Ok(None);
        };

        let result = self.run_capture(&mut canvas, &frame).await;
        self.settle(result).await
    }

    /// Read, decode and capture an uploaded image.
    pub async fn capture_upload(
        &self,
        path: &Path,
    ) -> Result<Option<Arc<CapturedRecord>>, CaptureError> {
        let frame = decode_upload(path).await?;
        tracing::info!(
            path = %path.display(),
            width = frame.width(),
            height = frame.height(),
            "processing upload"
        );
        self.capture_frame(&frame).await
    }

    /// Draw, detect, annotate and record one frame.
    pub async fn capture_frame(
        &self,
        frame: &RgbaImage,
    ) -> Result<Option<Arc<CapturedRecord>>, CaptureError> {
        let mut canvas = self.canvas.lock().await;
        let result = self.run_capture(&mut canvas, frame).await;
        self.settle(result).await
    }

    async fn run_capture(
        &self,
        canvas: &mut Canvas,
        frame: &RgbaImage,
    ) -> Result<Arc<CapturedRecord>, CaptureError> {
        if canvas.context().is_none() {
            return Err(CaptureError::MissingRenderContext);
        }

        canvas.draw_image(frame);
        let context = canvas.context().ok_or(CaptureError::MissingRenderContext)?;
        let analysis = self.pipeline.process_frame(context, frame).await?;

        let context = canvas.context_mut().ok_or(CaptureError::MissingRenderContext)?;
        annotate(context, analysis.faces());

        let image = canvas.to_data_url()?;
        let faces = analysis.len();
        let record = Arc::new(CapturedRecord::new(image, analysis, Utc::now()));

        let state = self.store.dispatch(CaptureAction::AddResult(Arc::clone(&record)));
        tracing::info!(id = %record.id, faces, history = state.history.len(), "capture recorded");

        Ok(record)
    }

    /// Apply the error policy: propagate, reset active state, or swallow.
    async fn settle<T>(&self, result: Result<T, CaptureError>) -> Result<Option<T>, CaptureError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => match err.policy() {
                ErrorPolicy::Abort => Err(err),
                ErrorPolicy::ResetActive => {
                    tracing::error!(error = %err, "error accessing webcam");
                    self.stop_webcam().await;
                    Ok(None)
                }
                ErrorPolicy::Ignore => {
                    tracing::debug!(error = %err, "capture skipped");
                    Ok(None)
                }
            },
        }
    }

    fn follower_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.follower.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(follower) = self.follower_slot().take() {
            follower.abort();
        }
        match self.stream.slot.try_lock() {
            Ok(mut slot) => release(&mut slot),
            Err(_) => tracing::warn!("webcam stream busy while the session was dropped"),
        }
    }
}
