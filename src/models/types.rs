//! types.rs
//! Value types shared by the engine (positions, destinations, crowd samples,
//! routes, assessments) and the configuration of each component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NavError, Result};

// --------------------------------------
// Geometry
// --------------------------------------

/// WGS84 point in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        let c = Self { lat, lon };
        if !c.is_valid() {
            return Err(NavError::InvalidData(format!("coordinates out of range: {lat},{lon}")));
        }
        Ok(c)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

// --------------------------------------
// Entities
// --------------------------------------

/// A location reading. Replaced wholesale on every update, never edited.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coords: Coord,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    /// accuracy_m above the tracker threshold; still usable, the UI decides
    /// whether to draw an accuracy radius.
    pub low_confidence: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub display_name: String,
    pub coordinates: Coord,
    pub facility_tags: Vec<String>,
}

impl Destination {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        coordinates: Coord,
        facility_tags: Vec<String>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(NavError::InvalidData("destination id is empty".into()));
        }
        if !coordinates.is_valid() {
            return Err(NavError::InvalidDestination(id));
        }
        Ok(Self { id, display_name: display_name.into(), coordinates, facility_tags })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.facility_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Point-weighted density estimate, intensity in [0,1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrowdSample {
    pub coordinates: Coord,
    pub intensity: f64,
    pub sampled_at: DateTime<Utc>,
}

impl CrowdSample {
    pub fn new(coordinates: Coord, intensity: f64, sampled_at: DateTime<Utc>) -> Result<Self> {
        if !coordinates.is_valid() {
            return Err(NavError::InvalidData("crowd sample outside WGS84 range".into()));
        }
        if !(0.0..=1.0).contains(&intensity) {
            return Err(NavError::InvalidData(format!("crowd intensity {intensity} not in [0,1]")));
        }
        Ok(Self { coordinates, intensity, sampled_at })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub origin: Position,
    pub destination: Destination,
    pub polyline: Vec<Coord>,
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<RouteStep>,
}

impl Route {
    pub fn steps_distance_m(&self) -> f64 {
        self.steps.iter().map(|s| s.distance_m).sum()
    }

    pub fn duration_min(&self) -> u32 {
        (self.duration_s / 60.0).round().max(0.0) as u32
    }
}

// --------------------------------------
// Crowd risk
// --------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_intensity(x: f64, thr: &RiskThresholds) -> Self {
        if x >= thr.critical {
            RiskLevel::Critical
        } else if x >= thr.high {
            RiskLevel::High
        } else if x >= thr.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// High and critical gate route commitment.
    #[inline]
    pub fn is_elevated(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Very High",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            RiskLevel::Low => "#28a745",
            RiskLevel::Medium => "#ffc107",
            RiskLevel::High => "#fd7e14",
            RiskLevel::Critical => "#dc3545",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrowdAssessment {
    pub destination: Destination,
    pub average_intensity: f64,
    pub risk: RiskLevel,
    pub alternatives: Vec<Destination>,
}

impl CrowdAssessment {
    pub fn needs_confirmation(&self) -> bool {
        self.risk.is_elevated()
    }
}

// --------------------------------------
// Configuration
// --------------------------------------

/// Lower bounds of medium/high/critical. Uncalibrated defaults, hence configurable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { medium: 0.4, high: 0.7, critical: 0.8 }
    }
}

impl RiskThresholds {
    pub fn is_monotonic(&self) -> bool {
        let in01 = |x: f64| (0.0..=1.0).contains(&x);
        in01(self.medium)
            && in01(self.high)
            && in01(self.critical)
            && self.medium <= self.high
            && self.high <= self.critical
    }

    /// Self if usable, defaults otherwise.
    pub fn validated(self) -> Self {
        if self.is_monotonic() { self } else { Self::default() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AdvisorCfg {
    /// Radius of the density query around a destination
    pub radius_m: f64,
    pub thresholds: RiskThresholds,
    /// Cap on alternatives offered with a high/critical assessment
    pub max_alternatives: usize,
}

impl Default for AdvisorCfg {
    fn default() -> Self {
        Self { radius_m: 100.0, thresholds: RiskThresholds::default(), max_alternatives: 3 }
    }
}

#[derive(Clone, Debug)]
pub struct TrackerCfg {
    /// Readings less accurate than this are tagged low-confidence
    pub low_confidence_m: f64,
    /// Deadline for a one-shot fix
    pub fix_timeout: Duration,
    /// Oldest tracked reading still usable as a route origin
    pub max_fix_age: Duration,
}

impl Default for TrackerCfg {
    fn default() -> Self {
        Self {
            low_confidence_m: 100.0,
            fix_timeout: Duration::from_secs(10),
            max_fix_age: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppCfg {
    /// HTTP bind address (Axum)
    pub bind: String,

    /// OSRM base url used for walking directions
    pub osrm_url: String,

    /// Crowd reporting feed. None: built-in simulated dataset only
    pub crowd_url: Option<String>,

    /// Crowd feed refresh period (seconds)
    pub t_crowd_s: u64,

    /// Registry CSV (id,name,lat,lon,tags). None: built-in registry
    pub registry_path: Option<String>,

    /// Deadline for a route computation (seconds)
    pub route_timeout_s: u64,

    /// H3 resolution for the hex overlay (9 ~ 0.1 km²)
    pub hex_res: u8,

    pub tracker: TrackerCfg,
    pub advisor: AdvisorCfg,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            osrm_url: "https://router.project-osrm.org".into(),
            crowd_url: None,
            t_crowd_s: 60,
            registry_path: None,
            route_timeout_s: 15,
            hex_res: 9,
            tracker: TrackerCfg::default(),
            advisor: AdvisorCfg::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_follow_thresholds() {
        let thr = RiskThresholds::default();
        assert_eq!(RiskLevel::from_intensity(0.85, &thr), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_intensity(0.8, &thr), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_intensity(0.75, &thr), RiskLevel::High);
        assert_eq!(RiskLevel::from_intensity(0.5, &thr), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_intensity(0.4, &thr), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_intensity(0.1, &thr), RiskLevel::Low);
        assert!(RiskLevel::High.is_elevated() && !RiskLevel::Medium.is_elevated());
    }

    #[test]
    fn non_monotonic_thresholds_fall_back() {
        let bad = RiskThresholds { medium: 0.6, high: 0.5, critical: 0.9 };
        assert_eq!(bad.validated(), RiskThresholds::default());
        let custom = RiskThresholds { medium: 0.3, high: 0.6, critical: 0.9 };
        assert_eq!(custom.validated(), custom);
    }

    #[test]
    fn sample_construction_is_validated() {
        let c = Coord::new(23.13, 75.79).unwrap();
        assert!(CrowdSample::new(c, 1.2, Utc::now()).is_err());
        assert!(CrowdSample::new(c, -0.1, Utc::now()).is_err());
        assert!(CrowdSample::new(c, 0.0, Utc::now()).is_ok());
        assert!(Coord::new(91.0, 0.0).is_err());
        assert!(Coord::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn destination_requires_id() {
        let c = Coord::new(23.13, 75.79).unwrap();
        assert!(Destination::new(" ", "x", c, vec![]).is_err());
        let d = Destination::new("ghat", "Ghat", c, vec!["Medical Post".into()]).unwrap();
        assert!(d.has_tag("medical post"));
    }
}
