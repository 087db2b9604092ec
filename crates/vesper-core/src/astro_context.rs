//! Astronomical context carried by a [`crate::target::Target`]
//!
//! The trigonometry itself lives in `vesper-astro`; this module only holds
//! the plain-data snapshot a Target stores between recomputations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Equatorial sky coordinates of a target (spec GLOSSARY: RA/Dec).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquatorialCoords {
    /// Right ascension, in hours [0, 24).
    pub ra_hours: f64,
    /// Declination, in degrees [-90, 90].
    pub dec_deg: f64,
}

/// Horizontal coordinates as seen by an observer (spec GLOSSARY: Alt/Az).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltAz {
    pub altitude_deg: f64,
    pub azimuth_deg: f64,
}

/// Observer location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

/// The contiguous UTC interval during which a target is above the configured
/// minimum altitude (spec GLOSSARY: Observability window). `None` start/end
/// denotes an empty window (no qualifying interval in the next 24h).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ObservabilityWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub peak_altitude_deg: Option<f64>,
}

impl ObservabilityWindow {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() || self.end.is_none()
    }

    /// Whether `now` falls inside `[start, end]`.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => now >= s && now <= e,
            _ => false,
        }
    }
}

/// One entry in a Target's exposure plan (spec GLOSSARY: Exposure plan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposurePlanEntry {
    pub filter: String,
    pub duration_secs: f64,
    pub count: u32,
    pub progress: u32,
}

impl ExposurePlanEntry {
    pub fn new(filter: impl Into<String>, duration_secs: f64, count: u32) -> Self {
        Self {
            filter: filter.into(),
            duration_secs,
            count,
            progress: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= self.count
    }
}

/// The astronomical context owned by a Target, mutated only by the thread
/// executing that Target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstroContext {
    pub coords: EquatorialCoords,
    pub min_altitude_deg: f64,
    pub observability: ObservabilityWindow,
    pub current_alt_az: Option<AltAz>,
    pub meridian_flip_at: Option<DateTime<Utc>>,
    pub exposure_plan: Vec<ExposurePlanEntry>,
    pub current_exposure_plan_index: usize,
}

impl AstroContext {
    pub fn new(coords: EquatorialCoords, min_altitude_deg: f64) -> Self {
        Self {
            coords,
            min_altitude_deg,
            observability: ObservabilityWindow::default(),
            current_alt_az: None,
            meridian_flip_at: None,
            exposure_plan: Vec::new(),
            current_exposure_plan_index: 0,
        }
    }

    /// Increments the progress of the current exposure-plan entry by one,
    /// advancing to the next entry once it is complete ("the
    /// exposure plan's per-entry progress count increments by one per
    /// successful capture task completion").
    pub fn record_capture(&mut self) {
        if let Some(entry) = self.exposure_plan.get_mut(self.current_exposure_plan_index) {
            entry.progress += 1;
            if entry.is_complete() && self.current_exposure_plan_index + 1 < self.exposure_plan.len()
            {
                self.current_exposure_plan_index += 1;
            }
        }
    }
}
