//! Per-frame occupancy aggregation.
//!
//! `aggregate` turns one frame of tracker detections into current per-zone
//! occupancy, folds identities into the cumulative set and flags zones whose
//! occupancy reaches their threshold.

use crate::zone::{ZoneId, ZoneLayout};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One tracked object on one frame, as produced by the external tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `None` when the tracker could not assign a stable identity.
    pub identity: Option<TrackId>,
    pub center: Point,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(identity: Option<TrackId>, bbox: BoundingBox) -> Self {
        Self {
            identity,
            center: bbox.center(),
            bbox,
        }
    }
}

/// How a session accounts for identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountingMode {
    /// Identities are stable across frames; cumulative counts are reported.
    #[default]
    Tracked,
    /// No stable identities; every detection counts toward current occupancy
    /// and cumulative counts are never reported.
    Untracked,
}

/// Identity accounting for one session.
#[derive(Debug, Clone, Default)]
pub struct OccupancyState {
    current: BTreeMap<ZoneId, HashSet<TrackId>>,
    current_counts: BTreeMap<ZoneId, usize>,
    cumulative: HashSet<TrackId>,
}

impl OccupancyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities inside `zone` on the last processed frame; `None` for
    /// untracked sessions, which only keep counts.
    pub fn current(&self, zone: &str) -> Option<&HashSet<TrackId>> {
        self.current.get(zone)
    }

    pub fn zone_count(&self, zone: &str) -> usize {
        self.current_counts.get(zone).copied().unwrap_or(0)
    }

    pub fn zone_counts(&self) -> &BTreeMap<ZoneId, usize> {
        &self.current_counts
    }

    pub fn cumulative(&self) -> &HashSet<TrackId> {
        &self.cumulative
    }

    pub fn unique_count(&self) -> usize {
        self.cumulative.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub per_zone_counts: BTreeMap<ZoneId, usize>,
    /// `None` for sessions without stable identities.
    pub cumulative_count: Option<usize>,
    pub alerts: BTreeSet<ZoneId>,
}

impl FrameMetrics {
    pub fn count(&self, zone: &str) -> usize {
        self.per_zone_counts.get(zone).copied().unwrap_or(0)
    }

    pub fn is_alert(&self, zone: &str) -> bool {
        self.alerts.contains(zone)
    }
}

/// A detection box tagged with its zone, for overlay rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub identity: Option<TrackId>,
    pub bbox: BoundingBox,
    pub zone: ZoneId,
    pub counted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    pub metrics: FrameMetrics,
    pub annotations: Vec<Annotation>,
    /// Centers of counted detections, grouped by zone, for heatmap sampling.
    pub centers: BTreeMap<ZoneId, Vec<Point>>,
}

pub fn aggregate(
    state: &mut OccupancyState,
    mode: CountingMode,
    layout: &ZoneLayout,
    detections: &[Detection],
) -> FrameUpdate {
    let mut frame_sets: BTreeMap<ZoneId, HashSet<TrackId>> = layout
        .zone_ids()
        .map(|zone| (zone.to_string(), HashSet::new()))
        .collect();
    let mut frame_counts: BTreeMap<ZoneId, usize> = layout
        .zone_ids()
        .map(|zone| (zone.to_string(), 0))
        .collect();
    let mut centers: BTreeMap<ZoneId, Vec<Point>> = BTreeMap::new();
    let mut annotations = Vec::with_capacity(detections.len());

    for detection in detections {
        let zone = layout.classify(detection.center);
        let counted = match (mode, detection.identity) {
            (CountingMode::Tracked, Some(identity)) => {
                state.cumulative.insert(identity);
                if let Some(ids) = frame_sets.get_mut(zone) {
                    ids.insert(identity);
                }
                true
            }
            (CountingMode::Tracked, None) => false,
            (CountingMode::Untracked, _) => {
                if let Some(count) = frame_counts.get_mut(zone) {
                    *count += 1;
                }
                true
            }
        };

        if counted {
            centers
                .entry(zone.to_string())
                .or_default()
                .push(detection.center);
        }
        annotations.push(Annotation {
            identity: detection.identity,
            bbox: detection.bbox,
            zone: zone.to_string(),
            counted,
        });
    }

    if mode == CountingMode::Tracked {
        for (zone, ids) in &frame_sets {
            frame_counts.insert(zone.clone(), ids.len());
        }
    }

    let alerts = frame_counts
        .iter()
        .filter(|(zone, count)| {
            layout
                .threshold(zone)
                .is_some_and(|threshold| **count >= threshold as usize)
        })
        .map(|(zone, _)| zone.clone())
        .collect();

    state.current = match mode {
        CountingMode::Tracked => frame_sets,
        CountingMode::Untracked => BTreeMap::new(),
    };
    state.current_counts = frame_counts.clone();

    let cumulative_count = match mode {
        CountingMode::Tracked => Some(state.cumulative.len()),
        CountingMode::Untracked => None,
    };

    FrameUpdate {
        metrics: FrameMetrics {
            per_zone_counts: frame_counts,
            cumulative_count,
            alerts,
        },
        annotations,
        centers,
    }
}
