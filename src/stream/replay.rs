//! JSON-lines replay of recorded tracker output.
//!
//! Each non-blank line is one frame:
//! `{"detections":[{"id":7,"box":[x1,y1,x2,y2]},{"box":[x1,y1,x2,y2]}]}`.
//! A detection without `id` has no tracker identity.

use crate::error::AppError;
use crate::occupancy::{BoundingBox, Detection, TrackId};
use crate::stream::{FrameInput, FrameSource};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to open replay file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read line {line}: {source}")]
    Read {
        line: u64,
        source: std::io::Error,
    },
    #[error("invalid frame on line {line}: {source}")]
    Parse {
        line: u64,
        source: serde_json::Error,
    },
}

impl From<ReplayError> for AppError {
    fn from(err: ReplayError) -> Self {
        AppError::Source(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

#[derive(Debug, Deserialize)]
struct ReplayDetection {
    #[serde(default)]
    id: Option<TrackId>,
    #[serde(rename = "box")]
    bbox: [f64; 4],
}

pub fn parse_frame(line: &str, line_number: u64) -> Result<Vec<Detection>, ReplayError> {
    let frame: ReplayFrame = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
        line: line_number,
        source,
    })?;
    Ok(frame
        .detections
        .into_iter()
        .map(|detection| {
            let [x1, y1, x2, y2] = detection.bbox;
            Detection::new(detection.id, BoundingBox::new(x1, y1, x2, y2))
        })
        .collect())
}

pub struct ReplaySource<R = BufReader<File>> {
    lines: Lines<R>,
    line_number: u64,
    next_index: u64,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReplayError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            next_index: 0,
        }
    }

    fn next_detections(&mut self) -> Result<Option<Vec<Detection>>, ReplayError> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let line = line.map_err(|source| ReplayError::Read {
                line: self.line_number,
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            return parse_frame(&line, self.line_number).map(Some);
        }
        Ok(None)
    }
}

impl<R: BufRead + Send> FrameSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Result<Option<FrameInput>, AppError> {
        let Some(detections) = self.next_detections()? else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(FrameInput {
            index,
            image: Vec::new(),
            detections,
        }))
    }

    fn release(&mut self) {
        debug!(frames = self.next_index, "Replay source closed");
    }
}
