//! Zone geometry and point classification.
//!
//! A `ZoneLayout` is an ordered list of rectangular zones plus a reserved
//! catch-all zone. Classification is first-match-wins in layout order; any
//! point outside every rectangle lands in the catch-all zone.

use crate::occupancy::Point;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

pub type ZoneId = String;

pub const DEFAULT_CATCH_ALL_ID: &str = "outside";

/// Axis-aligned rectangle, bounds inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn contains(&self, point: Point) -> bool {
        (self.x1..=self.x2).contains(&point.x) && (self.y1..=self.y2).contains(&point.y)
    }

    fn is_valid(&self) -> bool {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|value| value.is_finite());
        finite && self.x1 < self.x2 && self.y1 < self.y2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub rect: Rect,
    /// Occupancy at or above this value raises the zone alert.
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("at least one zone must be configured")]
    Empty,
    #[error("zone id must not be empty")]
    EmptyId,
    #[error("duplicate zone id: {0}")]
    DuplicateId(ZoneId),
    #[error("zone id {0:?} collides with the catch-all zone")]
    CatchAllCollision(ZoneId),
    #[error("zone {0:?} has a degenerate or non-finite rectangle")]
    InvalidRect(ZoneId),
    #[error("zone {0:?} threshold must be positive")]
    InvalidThreshold(ZoneId),
}

/// Validated, immutable zone configuration shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneLayout {
    zones: Vec<Zone>,
    catch_all: ZoneId,
    catch_all_threshold: Option<u32>,
}

impl ZoneLayout {
    pub fn new(zones: Vec<Zone>, catch_all: impl Into<ZoneId>) -> Result<Self, ZoneError> {
        let catch_all = catch_all.into();
        if zones.is_empty() {
            return Err(ZoneError::Empty);
        }
        if catch_all.is_empty() {
            return Err(ZoneError::EmptyId);
        }

        let mut seen = HashSet::new();
        for zone in &zones {
            if zone.id.is_empty() {
                return Err(ZoneError::EmptyId);
            }
            if zone.id == catch_all {
                return Err(ZoneError::CatchAllCollision(zone.id.clone()));
            }
            if !seen.insert(zone.id.as_str()) {
                return Err(ZoneError::DuplicateId(zone.id.clone()));
            }
            if !zone.rect.is_valid() {
                return Err(ZoneError::InvalidRect(zone.id.clone()));
            }
            if zone.threshold == 0 {
                return Err(ZoneError::InvalidThreshold(zone.id.clone()));
            }
        }

        Ok(Self {
            zones,
            catch_all,
            catch_all_threshold: None,
        })
    }

    pub fn with_catch_all_threshold(mut self, threshold: u32) -> Result<Self, ZoneError> {
        if threshold == 0 {
            return Err(ZoneError::InvalidThreshold(self.catch_all));
        }
        self.catch_all_threshold = Some(threshold);
        Ok(self)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn catch_all(&self) -> &str {
        &self.catch_all
    }

    /// Every zone id in priority order, catch-all last.
    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones
            .iter()
            .map(|zone| zone.id.as_str())
            .chain(std::iter::once(self.catch_all.as_str()))
    }

    pub fn threshold(&self, zone: &str) -> Option<u32> {
        if zone == self.catch_all {
            return self.catch_all_threshold;
        }
        self.zones
            .iter()
            .find(|candidate| candidate.id == zone)
            .map(|candidate| candidate.threshold)
    }

    pub fn classify(&self, point: Point) -> &str {
        classify(point, &self.zones).unwrap_or(&self.catch_all)
    }
}

/// First zone whose rectangle contains `point`, or `None` when unassigned.
pub fn classify(point: Point, zones: &[Zone]) -> Option<&str> {
    zones
        .iter()
        .find(|zone| zone.rect.contains(point))
        .map(|zone| zone.id.as_str())
}
