use crate::history::HistoryBuffer;
use crate::session::SessionRegistry;
use crate::zone::ZoneLayout;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handles shared by the HTTP layer and every stream it starts.
#[derive(Debug, Clone)]
pub struct AppState {
    layout: Arc<ZoneLayout>,
    registry: Arc<SessionRegistry>,
    history: Arc<HistoryBuffer>,
    stream_channel_capacity: usize,
    replay_root: Option<PathBuf>,
}

impl AppState {
    pub fn new(layout: ZoneLayout, history_capacity: usize) -> Self {
        Self {
            layout: Arc::new(layout),
            registry: Arc::new(SessionRegistry::new()),
            history: Arc::new(HistoryBuffer::new(history_capacity)),
            stream_channel_capacity: 1,
            replay_root: None,
        }
    }

    pub fn with_stream_channel_capacity(mut self, capacity: usize) -> Self {
        self.stream_channel_capacity = capacity.max(1);
        self
    }

    /// Confine stream sources to files under `root`.
    pub fn with_replay_root(mut self, root: Option<PathBuf>) -> Self {
        self.replay_root = root;
        self
    }

    pub fn layout(&self) -> &Arc<ZoneLayout> {
        &self.layout
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Chart series shared by every stream.
    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    pub fn stream_channel_capacity(&self) -> usize {
        self.stream_channel_capacity
    }

    pub fn replay_root(&self) -> Option<&Path> {
        self.replay_root.as_deref()
    }
}
