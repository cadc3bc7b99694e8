use crate::error::AppError;
use crate::occupancy::CountingMode;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Owns every live session, keyed by the opaque source key.
///
/// Queries against a key that was never streamed behave like an empty
/// session and return zero values.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: &str) -> Result<Arc<Session>, AppError> {
        self.get_or_create_with_mode(key, CountingMode::Tracked)
    }

    /// Idempotent per key: the first caller's mode wins and every later caller
    /// observes the same session.
    pub fn get_or_create_with_mode(
        &self,
        key: &str,
        mode: CountingMode,
    ) -> Result<Arc<Session>, AppError> {
        if let Some(session) = self.get(key)? {
            return Ok(session);
        }

        let mut guard = self.sessions.write().map_err(|_| AppError::StateLock)?;
        let session = guard.entry(key.to_string()).or_insert_with(|| {
            info!(source = %key, mode = ?mode, "Session created");
            Arc::new(Session::new(key, mode))
        });
        Ok(Arc::clone(session))
    }

    pub fn get(&self, key: &str) -> Result<Option<Arc<Session>>, AppError> {
        let guard = self.sessions.read().map_err(|_| AppError::StateLock)?;
        Ok(guard.get(key).cloned())
    }

    /// Ask the controller streaming `key` to finish at its next frame
    /// boundary. Returns `false` when no such session exists.
    pub fn stop(&self, key: &str) -> Result<bool, AppError> {
        match self.get(key)? {
            Some(session) => {
                session.request_stop();
                info!(source = %key, live = session.is_live(), "Stop requested");
                Ok(true)
            }
            None => {
                debug!(source = %key, "Stop requested for unknown source");
                Ok(false)
            }
        }
    }

    pub fn unique_count(&self, key: &str) -> Result<usize, AppError> {
        match self.get(key)? {
            Some(session) => session.unique_count(),
            None => Ok(0),
        }
    }

    pub fn zone_count(&self, key: &str, zone: &str) -> Result<usize, AppError> {
        match self.get(key)? {
            Some(session) => session.zone_count(zone),
            None => Ok(0),
        }
    }

    /// Drop the session; the next `get_or_create` starts from zero.
    ///
    /// A session with a bound controller cannot be evicted: it fails with
    /// `SessionBusy` so the key stays reachable by `stop`.
    pub fn evict(&self, key: &str) -> Result<bool, AppError> {
        let mut guard = self.sessions.write().map_err(|_| AppError::StateLock)?;
        if guard.get(key).is_some_and(|session| session.is_live()) {
            info!(source = %key, "Refused to evict live session");
            return Err(AppError::SessionBusy(key.to_string()));
        }
        let removed = guard.remove(key).is_some();
        if removed {
            info!(source = %key, "Session evicted");
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Result<Vec<String>, AppError> {
        let guard = self.sessions.read().map_err(|_| AppError::StateLock)?;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn live_count(&self) -> Result<usize, AppError> {
        let guard = self.sessions.read().map_err(|_| AppError::StateLock)?;
        Ok(guard.values().filter(|session| session.is_live()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{BoundingBox, Detection};
    use crate::zone::{Rect, Zone, ZoneLayout};
    use std::thread;

    fn layout() -> Result<ZoneLayout, AppError> {
        Ok(ZoneLayout::new(
            vec![Zone {
                id: "Z1".to_string(),
                rect: Rect::new(0.0, 0.0, 50.0, 50.0),
                threshold: 3,
            }],
            "outside",
        )?)
    }

    #[test]
    fn unknown_key_queries_return_zero() -> Result<(), AppError> {
        let registry = SessionRegistry::new();

        assert_eq!(registry.unique_count("never-seen")?, 0);
        assert_eq!(registry.zone_count("never-seen", "Z1")?, 0);
        assert!(!registry.stop("never-seen")?);
        assert!(!registry.evict("never-seen")?);
        assert!(registry.keys()?.is_empty());
        Ok(())
    }

    #[test]
    fn get_or_create_returns_same_session() -> Result<(), AppError> {
        let registry = SessionRegistry::new();

        let first = registry.get_or_create("video.mp4")?;
        let second = registry.get_or_create_with_mode("video.mp4", CountingMode::Untracked)?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.mode(), CountingMode::Tracked);
        Ok(())
    }

    #[test]
    fn concurrent_get_or_create_yields_one_session() -> Result<(), AppError> {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("webcam"))
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            let session = handle
                .join()
                .map_err(|_| AppError::Source("worker panicked".to_string()))??;
            sessions.push(session);
        }

        assert!(sessions.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.keys()?, vec!["webcam".to_string()]);
        Ok(())
    }

    #[test]
    fn evict_resets_cumulative_count() -> Result<(), AppError> {
        let registry = SessionRegistry::new();
        let layout = layout()?;
        let session = registry.get_or_create("video.mp4")?;
        session.apply_frame(
            &layout,
            &[Detection::new(Some(1), BoundingBox::new(0.0, 0.0, 10.0, 10.0))],
        )?;
        assert_eq!(registry.unique_count("video.mp4")?, 1);

        assert!(registry.evict("video.mp4")?);

        assert_eq!(registry.unique_count("video.mp4")?, 0);
        let fresh = registry.get_or_create("video.mp4")?;
        assert!(!Arc::ptr_eq(&session, &fresh));
        assert_eq!(fresh.unique_count()?, 0);
        Ok(())
    }

    #[test]
    fn live_session_cannot_be_evicted() -> Result<(), AppError> {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("webcam")?;
        let lease = session.acquire_lease()?;

        let result = registry.evict("webcam");

        assert!(matches!(result, Err(AppError::SessionBusy(key)) if key == "webcam"));
        assert!(registry.stop("webcam")?);
        assert!(session.stop_requested());
        assert!(matches!(
            registry.get_or_create("webcam")?.acquire_lease(),
            Err(AppError::SessionBusy(_))
        ));

        drop(lease);
        assert!(registry.evict("webcam")?);
        Ok(())
    }

    #[test]
    fn counts_are_stable_without_new_frames() -> Result<(), AppError> {
        let registry = SessionRegistry::new();
        let layout = layout()?;
        let session = registry.get_or_create("cam")?;
        session.apply_frame(
            &layout,
            &[
                Detection::new(Some(1), BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
                Detection::new(Some(2), BoundingBox::new(100.0, 100.0, 110.0, 110.0)),
            ],
        )?;

        assert_eq!(registry.unique_count("cam")?, registry.unique_count("cam")?);
        assert_eq!(registry.zone_count("cam", "Z1")?, 1);
        assert_eq!(registry.zone_count("cam", "Z1")?, 1);
        assert_eq!(registry.zone_count("cam", "outside")?, 1);
        Ok(())
    }

    #[test]
    fn stop_marks_existing_session() -> Result<(), AppError> {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("webcam")?;

        assert!(registry.stop("webcam")?);

        assert!(session.stop_requested());
        Ok(())
    }

    #[test]
    fn live_count_tracks_leases() -> Result<(), AppError> {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("webcam")?;
        registry.get_or_create("video.mp4")?;

        let lease = session.acquire_lease()?;
        assert_eq!(registry.live_count()?, 1);
        drop(lease);
        assert_eq!(registry.live_count()?, 0);
        Ok(())
    }
}
