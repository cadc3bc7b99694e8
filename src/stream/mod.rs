//! Per-source streaming controller.
//!
//! A controller owns one frame source and one session lease. Each `step`
//! checks the stop flag, pulls one frame, aggregates it and produces one
//! output record. Terminal states release the source exactly once.

use crate::error::AppError;
use crate::history::HistoryBuffer;
use crate::occupancy::{Annotation, CountingMode, Detection, FrameMetrics, FrameUpdate};
use crate::session::{SessionRegistry, StreamLease};
use crate::zone::ZoneLayout;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod mock;
pub mod replay;

/// One raw frame plus the tracker output for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInput {
    pub index: u64,
    /// Encoded image bytes; opaque to the core.
    pub image: Vec<u8>,
    pub detections: Vec<Detection>,
}

pub trait FrameSource: Send {
    /// `Ok(None)` marks the end of the sequence.
    fn next_frame(&mut self) -> Result<Option<FrameInput>, AppError>;

    /// Called exactly once when the controller is done with the source.
    fn release(&mut self) {}
}

pub trait Renderer: Send {
    fn render(&self, frame: &FrameInput, update: &FrameUpdate) -> Result<Vec<u8>, AppError>;
}

/// Emits the frame bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn render(&self, frame: &FrameInput, _update: &FrameUpdate) -> Result<Vec<u8>, AppError> {
        Ok(frame.image.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub source: String,
    pub frame_index: u64,
    pub timestamp: SystemTime,
    pub image: Vec<u8>,
    pub metrics: FrameMetrics,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Streaming,
    Stopped,
    Exhausted,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Exhausted | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub source: String,
    pub state: StreamState,
    pub frames_processed: u64,
}

pub struct StreamController {
    lease: StreamLease,
    layout: Arc<ZoneLayout>,
    history: Option<Arc<HistoryBuffer>>,
    renderer: Box<dyn Renderer>,
    source: Option<Box<dyn FrameSource>>,
    state: StreamState,
    frames_processed: u64,
    clock: fn() -> SystemTime,
}

impl StreamController {
    /// Bind a new controller to the session for `key`, creating it on demand.
    ///
    /// Counts persist across controllers; the stop flag does not. If the key
    /// is already streaming the source is released and `SessionBusy` is
    /// returned.
    pub fn bind(
        registry: &SessionRegistry,
        key: &str,
        mode: CountingMode,
        layout: Arc<ZoneLayout>,
        mut source: Box<dyn FrameSource>,
    ) -> Result<Self, AppError> {
        let lease = registry
            .get_or_create_with_mode(key, mode)
            .and_then(|session| session.acquire_lease());
        let lease = match lease {
            Ok(lease) => lease,
            Err(err) => {
                source.release();
                return Err(err);
            }
        };

        Ok(Self {
            lease,
            layout,
            history: None,
            renderer: Box::new(PassthroughRenderer),
            source: Some(source),
            state: StreamState::Idle,
            frames_processed: 0,
            clock: SystemTime::now,
        })
    }

    pub fn with_history(mut self, history: Arc<HistoryBuffer>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> SystemTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn key(&self) -> &str {
        self.lease.session().key()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            source: self.key().to_string(),
            state: self.state,
            frames_processed: self.frames_processed,
        }
    }

    /// Advance by at most one frame.
    ///
    /// Returns `Ok(None)` once the controller is in a terminal state. A source
    /// error moves the controller to `Failed` and is returned once.
    pub fn step(&mut self) -> Result<Option<FrameRecord>, AppError> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        if self.state == StreamState::Idle {
            self.state = StreamState::Streaming;
            info!(source = %self.key(), "Stream started");
        }

        if self.lease.session().stop_requested() {
            info!(
                source = %self.key(),
                frames = self.frames_processed,
                "Stop observed at frame boundary"
            );
            self.finish(StreamState::Stopped);
            return Ok(None);
        }

        let next = match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(
                    source = %self.key(),
                    frames = self.frames_processed,
                    "Frame source exhausted"
                );
                self.finish(StreamState::Exhausted);
                return Ok(None);
            }
            Err(err) => {
                warn!(source = %self.key(), error = %err, "Frame source failed");
                self.finish(StreamState::Failed);
                return Err(err);
            }
        };

        match self.process(frame) {
            Ok(record) => {
                self.frames_processed += 1;
                Ok(Some(record))
            }
            Err(err) => {
                self.finish(StreamState::Failed);
                Err(err)
            }
        }
    }

    /// Drive the controller to a terminal state, handing each record to
    /// `emit`. `emit` returning `false` means the consumer went away and is
    /// treated like a stop request.
    pub fn run<F>(mut self, mut emit: F) -> Result<StreamSummary, AppError>
    where
        F: FnMut(FrameRecord) -> bool,
    {
        while let Some(record) = self.step()? {
            if !emit(record) {
                info!(source = %self.key(), "Stream consumer disconnected");
                self.finish(StreamState::Stopped);
            }
        }
        Ok(self.summary())
    }

    fn process(&mut self, frame: FrameInput) -> Result<FrameRecord, AppError> {
        let session = Arc::clone(self.lease.session());
        let update = session.apply_frame(&self.layout, &frame.detections)?;
        let timestamp = (self.clock)();

        if let Some(history) = &self.history {
            history.record(&update, timestamp)?;
        }

        let image = match self.renderer.render(&frame, &update) {
            Ok(image) => image,
            Err(err) => {
                warn!(
                    source = %session.key(),
                    frame = frame.index,
                    error = %err,
                    "Render failed, emitting raw frame"
                );
                frame.image
            }
        };

        Ok(FrameRecord {
            source: session.key().to_string(),
            frame_index: frame.index,
            timestamp,
            image,
            metrics: update.metrics,
            annotations: update.annotations,
        })
    }

    fn finish(&mut self, state: StreamState) {
        self.state = state;
        self.release_source();
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            debug!(source = %self.key(), "Frame source released");
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.release_source();
    }
}

/// Item delivered to the consumer of a spawned stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(FrameRecord),
    /// Sent once after the last frame, whatever the exit path.
    Finished {
        summary: StreamSummary,
        error: Option<String>,
    },
}

/// Run `controller` on its own thread, delivering events through a bounded
/// channel. A full channel blocks the controller before it pulls the next
/// frame.
pub fn spawn_stream_thread(
    controller: StreamController,
    sender: mpsc::Sender<StreamEvent>,
) -> std::thread::JoinHandle<Result<StreamSummary, AppError>> {
    std::thread::spawn(move || {
        let mut summary = controller.summary();
        let result = controller.run(|record| {
            summary.frames_processed += 1;
            sender.blocking_send(StreamEvent::Frame(record)).is_ok()
        });

        let error = match &result {
            Ok(finished) => {
                info!(
                    source = %finished.source,
                    state = ?finished.state,
                    frames = finished.frames_processed,
                    "Stream finished"
                );
                summary = finished.clone();
                None
            }
            Err(err) => {
                error!(source = %summary.source, error = %err, "Stream terminated with error");
                summary.state = StreamState::Failed;
                Some(err.to_string())
            }
        };
        let _ = sender.blocking_send(StreamEvent::Finished { summary, error });
        result
    })
}
