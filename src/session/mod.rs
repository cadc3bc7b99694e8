use crate::error::AppError;
use crate::occupancy::{self, CountingMode, Detection, FrameUpdate, OccupancyState};
use crate::zone::ZoneLayout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub mod registry;

pub use registry::SessionRegistry;

/// Persistent counting state for one source key.
#[derive(Debug)]
pub struct Session {
    key: String,
    mode: CountingMode,
    occupancy: Mutex<OccupancyState>,
    stop_requested: AtomicBool,
    live: AtomicBool,
}

impl Session {
    pub fn new(key: impl Into<String>, mode: CountingMode) -> Self {
        Self {
            key: key.into(),
            mode,
            occupancy: Mutex::new(OccupancyState::new()),
            stop_requested: AtomicBool::new(false),
            live: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> CountingMode {
        self.mode
    }

    /// Run one frame through the aggregator against this session's sets.
    pub fn apply_frame(
        &self,
        layout: &ZoneLayout,
        detections: &[Detection],
    ) -> Result<FrameUpdate, AppError> {
        let mut guard = self.occupancy.lock().map_err(|_| AppError::StateLock)?;
        Ok(occupancy::aggregate(&mut guard, self.mode, layout, detections))
    }

    pub fn unique_count(&self) -> Result<usize, AppError> {
        let guard = self.occupancy.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.unique_count())
    }

    pub fn zone_count(&self, zone: &str) -> Result<usize, AppError> {
        let guard = self.occupancy.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.zone_count(zone))
    }

    pub fn occupancy(&self) -> Result<OccupancyState, AppError> {
        let guard = self.occupancy.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.clone())
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Claim the session for a single streaming controller.
    ///
    /// Clears any stale stop request; fails if another controller holds the
    /// lease.
    pub fn acquire_lease(self: &Arc<Self>) -> Result<StreamLease, AppError> {
        self.live
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AppError::SessionBusy(self.key.clone()))?;
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(StreamLease {
            session: Arc::clone(self),
        })
    }
}

/// Marks a session live for as long as it is held.
#[derive(Debug)]
pub struct StreamLease {
    session: Arc<Session>,
}

impl StreamLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.session.live.store(false, Ordering::SeqCst);
        debug!(source = %self.session.key, "Stream lease released");
    }
}
