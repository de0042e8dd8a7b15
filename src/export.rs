//! Rebuilds a time-windowed export from stored observations.
//!
//! Each exported record carries its offset in whole seconds from the start
//! of the window, so a client can replay the window as a timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{ObservationStore, PersistedObservation, QueryError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("stored {field} {value:?} is not numeric")]
    InvalidField { field: &'static str, value: String },

    #[error("window end {end} is before start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Closed interval `[start, end]` of receive instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ExportError> {
        if end < start {
            return Err(ExportError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whole seconds from the window start, truncated.
    pub fn offset_secs(&self, instant: DateTime<Utc>) -> i64 {
        (instant - self.start).num_seconds().max(0)
    }
}

/// One record of the exported timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedObservation {
    #[serde(rename = "DirTag")]
    pub dir_tag: String,
    #[serde(rename = "VehicleID")]
    pub vehicle_id: i64,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
    #[serde(rename = "Speed")]
    pub speed: i64,
    #[serde(rename = "TimeOffset")]
    pub time_offset: i64,
}

impl ExportedObservation {
    fn from_persisted(row: &PersistedObservation, window: &TimeWindow) -> Result<Self, ExportError> {
        let obs = &row.observation;
        Ok(Self {
            dir_tag: obs.dir_tag.clone(),
            vehicle_id: parse_int("vehicle_id", &obs.vehicle_id)?,
            lat: parse_float("latitude", &obs.lat)?,
            lon: parse_float("longitude", &obs.lon)?,
            speed: parse_int("speed", &obs.speed)?,
            time_offset: window.offset_secs(row.received_at),
        })
    }
}

pub struct Exporter<S> {
    store: Arc<S>,
}

impl<S: ObservationStore> Exporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Everything recorded for `route_tag` inside `window`, oldest first.
    /// An empty window is not an error.
    pub fn export(
        &self,
        route_tag: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ExportedObservation>, ExportError> {
        let rows = self
            .store
            .observations_between(route_tag, window.start(), window.end())?;
        debug!(route_tag, rows = rows.len(), "Loaded stored observations");

        rows.iter()
            .map(|row| ExportedObservation::from_persisted(row, window))
            .collect()
    }
}

// Speeds occasionally arrive with a fractional part; those are truncated.
fn parse_int(field: &'static str, value: &str) -> Result<i64, ExportError> {
    let trimmed = value.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
        .ok_or_else(|| ExportError::InvalidField {
            field,
            value: value.to_string(),
        })
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, ExportError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| ExportError::InvalidField {
            field,
            value: value.to_string(),
        })
}
