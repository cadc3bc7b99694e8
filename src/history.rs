//! Chart history and heatmap samples.
//!
//! History rows are append-only until `reset`; recent points are kept per
//! zone in fixed-capacity FIFO rings. Every write and every snapshot takes
//! the same lock, so readers always see whole frames.

use crate::error::AppError;
use crate::occupancy::{FrameUpdate, Point};
use crate::zone::ZoneId;
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use std::time::SystemTime;

pub const DEFAULT_RECENT_POINTS_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: SystemTime,
    pub per_zone_counts: BTreeMap<ZoneId, usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistorySnapshot {
    pub history: Vec<HistoryPoint>,
    /// Oldest first.
    pub recent_points: BTreeMap<ZoneId, Vec<Point>>,
}

#[derive(Debug)]
struct HistoryInner {
    history: Vec<HistoryPoint>,
    recent_points: BTreeMap<ZoneId, VecDeque<Point>>,
}

#[derive(Debug)]
pub struct HistoryBuffer {
    inner: RwLock<HistoryInner>,
    capacity: usize,
}

impl HistoryBuffer {
    /// `capacity` is clamped to at least one point per zone.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HistoryInner {
                history: Vec::new(),
                recent_points: BTreeMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(
        &self,
        per_zone_counts: BTreeMap<ZoneId, usize>,
        timestamp: SystemTime,
    ) -> Result<(), AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::StateLock)?;
        guard.history.push(HistoryPoint {
            timestamp,
            per_zone_counts,
        });
        Ok(())
    }

    pub fn append_points(
        &self,
        zone: &str,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<(), AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::StateLock)?;
        push_points(&mut guard, zone, points, self.capacity);
        Ok(())
    }

    /// Append one processed frame: its count row and its zone centers.
    pub fn record(&self, update: &FrameUpdate, timestamp: SystemTime) -> Result<(), AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::StateLock)?;
        guard.history.push(HistoryPoint {
            timestamp,
            per_zone_counts: update.metrics.per_zone_counts.clone(),
        });
        for (zone, points) in &update.centers {
            push_points(&mut guard, zone, points.iter().copied(), self.capacity);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<HistorySnapshot, AppError> {
        let guard = self.inner.read().map_err(|_| AppError::StateLock)?;
        Ok(HistorySnapshot {
            history: guard.history.clone(),
            recent_points: guard
                .recent_points
                .iter()
                .map(|(zone, points)| (zone.clone(), points.iter().copied().collect()))
                .collect(),
        })
    }

    pub fn len(&self) -> Result<usize, AppError> {
        let guard = self.inner.read().map_err(|_| AppError::StateLock)?;
        Ok(guard.history.len())
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    /// Start a new chart series.
    pub fn reset(&self) -> Result<(), AppError> {
        let mut guard = self.inner.write().map_err(|_| AppError::StateLock)?;
        guard.history.clear();
        guard.recent_points.clear();
        Ok(())
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_POINTS_CAPACITY)
    }
}

fn push_points(
    inner: &mut HistoryInner,
    zone: &str,
    points: impl IntoIterator<Item = Point>,
    capacity: usize,
) {
    let ring = inner.recent_points.entry(zone.to_string()).or_default();
    for point in points {
        if ring.len() == capacity {
            ring.pop_front();
        }
        ring.push_back(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{FrameMetrics, FrameUpdate};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    fn counts(zone1: usize, zone2: usize) -> BTreeMap<ZoneId, usize> {
        BTreeMap::from([("Zone 1".to_string(), zone1), ("Zone 2".to_string(), zone2)])
    }

    #[test]
    fn ring_keeps_last_points_in_fifo_order() -> Result<(), AppError> {
        let buffer = HistoryBuffer::new(3);

        for value in 1..=4 {
            let value = value as f64;
            buffer.append_points("Zone 1", [Point::new(value, value)])?;
        }

        let snapshot = buffer.snapshot()?;
        assert_eq!(
            snapshot.recent_points.get("Zone 1"),
            Some(&vec![
                Point::new(2.0, 2.0),
                Point::new(3.0, 3.0),
                Point::new(4.0, 4.0)
            ])
        );
        Ok(())
    }

    #[test]
    fn ring_length_is_min_of_appended_and_capacity() -> Result<(), AppError> {
        let buffer = HistoryBuffer::new(5);

        buffer.append_points("a", (0..3).map(|i| Point::new(i as f64, 0.0)))?;
        assert_eq!(buffer.snapshot()?.recent_points["a"].len(), 3);

        buffer.append_points("a", (3..12).map(|i| Point::new(i as f64, 0.0)))?;
        let snapshot = buffer.snapshot()?;
        let points = &snapshot.recent_points["a"];
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], Point::new(7.0, 0.0));
        assert_eq!(points[4], Point::new(11.0, 0.0));
        Ok(())
    }

    #[test]
    fn history_preserves_append_order() -> Result<(), AppError> {
        let buffer = HistoryBuffer::default();

        buffer.append(counts(1, 0), UNIX_EPOCH + Duration::from_secs(1))?;
        buffer.append(counts(2, 1), UNIX_EPOCH + Duration::from_secs(2))?;
        buffer.append(counts(0, 3), UNIX_EPOCH + Duration::from_secs(3))?;

        let snapshot = buffer.snapshot()?;
        assert_eq!(snapshot.history.len(), 3);
        assert!(snapshot
            .history
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        assert_eq!(snapshot.history[2].per_zone_counts["Zone 2"], 3);
        Ok(())
    }

    #[test]
    fn snapshot_is_a_copy() -> Result<(), AppError> {
        let buffer = HistoryBuffer::default();
        buffer.append(counts(1, 1), UNIX_EPOCH)?;

        let snapshot = buffer.snapshot()?;
        buffer.append(counts(2, 2), UNIX_EPOCH)?;

        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(buffer.len()?, 2);
        Ok(())
    }

    #[test]
    fn record_appends_counts_and_centers_together() -> Result<(), AppError> {
        let buffer = HistoryBuffer::new(10);
        let update = FrameUpdate {
            metrics: FrameMetrics {
                per_zone_counts: counts(1, 0),
                cumulative_count: Some(1),
                alerts: BTreeSet::new(),
            },
            annotations: Vec::new(),
            centers: BTreeMap::from([("Zone 1".to_string(), vec![Point::new(5.0, 6.0)])]),
        };

        buffer.record(&update, UNIX_EPOCH)?;

        let snapshot = buffer.snapshot()?;
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.recent_points["Zone 1"], vec![Point::new(5.0, 6.0)]);
        Ok(())
    }

    #[test]
    fn reset_clears_history_and_points() -> Result<(), AppError> {
        let buffer = HistoryBuffer::new(4);
        buffer.append(counts(1, 0), UNIX_EPOCH)?;
        buffer.append_points("Zone 1", [Point::new(1.0, 1.0)])?;

        buffer.reset()?;

        assert_eq!(buffer.snapshot()?, HistorySnapshot::default());
        Ok(())
    }

    #[test]
    fn concurrent_writers_never_lose_rows() -> Result<(), AppError> {
        let buffer = Arc::new(HistoryBuffer::new(1000));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || -> Result<(), AppError> {
                    for _ in 0..50 {
                        buffer.append(counts(1, 1), SystemTime::now())?;
                        let snapshot = buffer.snapshot()?;
                        assert!(snapshot
                            .history
                            .iter()
                            .all(|point| point.per_zone_counts.len() == 2));
                    }
                    Ok(())
                })
            })
            .collect();

        for writer in writers {
            writer
                .join()
                .map_err(|_| AppError::Source("writer panicked".to_string()))??;
        }

        assert_eq!(buffer.len()?, 200);
        Ok(())
    }
}
