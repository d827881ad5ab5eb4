//! model.rs
//!
//! Crowd density model: the current set of samples plus an R-tree over them.
//!
//! - `load_samples` swaps the whole set at once (no partial application).
//! - `density_near` is the mean intensity of samples within a haversine radius.
//!   No samples in range reads as 0: callers cannot tell "no data" from
//!   "confirmed empty".

use chrono::{DateTime, Utc};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

use crate::distance::{haversine_m, EARTH_RADIUS_M};
use crate::models::types::{Coord, CrowdSample};

/// Where the current sample set came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdOrigin {
    #[default]
    Empty,
    Live,
    Simulated,
}

#[derive(Clone, Copy, Debug)]
struct SampleItem {
    idx: usize,
    pt: [f64; 2], // (lon, lat)
}

impl RTreeObject for SampleItem {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pt)
    }
}

#[derive(Debug)]
pub struct CrowdModel {
    samples: Vec<CrowdSample>,
    tree: RTree<SampleItem>,
    origin: CrowdOrigin,
    loaded_at: Option<DateTime<Utc>>,
}

impl Default for CrowdModel {
    fn default() -> Self {
        Self { samples: Vec::new(), tree: RTree::new(), origin: CrowdOrigin::Empty, loaded_at: None }
    }
}

impl CrowdModel {
    pub fn new(samples: Vec<CrowdSample>) -> Self {
        let mut m = Self::default();
        m.load_samples(samples);
        m
    }

    /// Replaces the entire sample set.
    pub fn load_samples(&mut self, samples: Vec<CrowdSample>) {
        self.load_samples_from(samples, CrowdOrigin::Live);
    }

    pub fn load_samples_from(&mut self, samples: Vec<CrowdSample>, origin: CrowdOrigin) {
        let items: Vec<SampleItem> = samples
            .iter()
            .enumerate()
            .map(|(idx, s)| SampleItem { idx, pt: [s.coordinates.lon, s.coordinates.lat] })
            .collect();
        // build first, then swap: readers never see a half-loaded set
        let tree = RTree::bulk_load(items);
        self.samples = samples;
        self.tree = tree;
        self.origin = origin;
        self.loaded_at = Some(Utc::now());
    }

    pub fn samples(&self) -> &[CrowdSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn origin(&self) -> CrowdOrigin {
        self.origin
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Mean intensity within `radius_m` of `point`, in [0,1]; 0 when nothing is in range.
    pub fn density_near(&self, point: Coord, radius_m: f64) -> f64 {
        if self.samples.is_empty() || !(radius_m >= 0.0) || !point.is_valid() {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut n = 0usize;
        for it in self.tree.locate_in_envelope(&search_box(point, radius_m)) {
            let s = &self.samples[it.idx];
            if haversine_m(point, s.coordinates) <= radius_m {
                sum += s.intensity;
                n += 1;
            }
        }
        if n == 0 {
            return 0.0;
        }
        let mean = sum / n as f64;
        if mean.is_finite() { mean.clamp(0.0, 1.0) } else { 0.0 }
    }
}

/// Lon/lat box containing the haversine circle, slightly padded. Falls back to
/// the full longitude range near the poles or across the antimeridian.
fn search_box(point: Coord, radius_m: f64) -> AABB<[f64; 2]> {
    let dlat = (radius_m / EARTH_RADIUS_M).to_degrees() * 1.01;
    let min_lat = (point.lat - dlat).max(-90.0);
    let max_lat = (point.lat + dlat).min(90.0);

    let cos = min_lat.to_radians().cos().min(max_lat.to_radians().cos());
    let (min_lon, max_lon) = if cos < 1e-6 {
        (-180.0, 180.0)
    } else {
        let dlon = dlat / cos;
        let (lo, hi) = (point.lon - dlon, point.lon + dlon);
        if lo < -180.0 || hi > 180.0 { (-180.0, 180.0) } else { (lo, hi) }
    };
    AABB::from_corners([min_lon, min_lat], [max_lon, max_lat])
}
